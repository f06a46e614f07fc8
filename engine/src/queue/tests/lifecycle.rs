//! Job lifecycle tests: cancel, failures, return, reschedule, heartbeats, erase.

use super::*;

#[test]
fn test_cancel_pending_is_idempotent() {
    let env = setup();
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);

    q.cancel(&submitter(), id).unwrap();
    assert_eq!(q.get_status(id), Some(ObservedStatus::Canceled));
    assert!(record(q, id).time_done > 0);

    q.cancel(&submitter(), id).unwrap();
    q.cancel(&submitter(), 777).unwrap();
    assert_eq!(q.get_status(id), Some(ObservedStatus::Canceled));
    assert_eq!(q.statistics().canceled, 1);
    assert!(dispatch_at(q, "w1", &[], env.now).is_none());
}

#[test]
fn test_cancel_running_then_result_ignored() {
    let env = setup();
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);
    dispatch_at(q, "w1", &[], env.now).unwrap();

    q.cancel(&submitter(), id).unwrap();
    q.put_result_at(&worker("w1"), id, 0, "late", env.now).unwrap();

    assert_eq!(q.get_status(id), Some(ObservedStatus::Canceled));
    assert_eq!(record(q, id).output, "");
}

#[test]
fn test_cancel_requires_submitter_access() {
    let env = setup_with(|p| p.subm_hosts = vec!["submit-host".to_string()]);
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);

    let err = q.cancel(&Client::new("elsewhere"), id).unwrap_err();
    assert!(matches!(err, SchedError::AccessDenied(_)));
    assert_eq!(q.get_status(id), Some(ObservedStatus::Pending));
}

#[test]
fn test_failures_exhaust_retries() {
    let env = setup_with(|p| {
        p.failed_retries = 2;
        p.blacklist_time = 0;
    });
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);

    for attempt in 1..=2 {
        dispatch_at(q, "w1", &[], env.now).unwrap();
        q.job_failed_at(&worker("w1"), id, "err", "partial", 10 + attempt, env.now)
            .unwrap();
        assert_eq!(q.get_status(id), Some(ObservedStatus::Returned));
    }

    dispatch_at(q, "w1", &[], env.now).unwrap();
    q.job_failed_at(&worker("w1"), id, "final", "out", 99, env.now + 5)
        .unwrap();

    let rec = record(q, id);
    assert_eq!(rec.status, JobStatus::Failed);
    assert_eq!(rec.err_msg, "final");
    assert_eq!(rec.output, "out");
    assert_eq!(rec.ret_code, 99);
    assert_eq!(rec.run_counter, 3);
    assert_eq!(rec.time_done, env.now + 5);
    let stats = q.statistics();
    assert_eq!(stats.returned, 2);
    assert_eq!(stats.failed, 1);
}

#[test]
fn test_job_failed_ignored_unless_running() {
    let env = setup();
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);

    q.job_failed_at(&worker("w1"), id, "err", "", 1, env.now)
        .unwrap();
    assert_eq!(q.get_status(id), Some(ObservedStatus::Pending));
    assert_eq!(record(q, id).err_msg, "");
}

#[test]
fn test_return_job_does_not_count_attempt() {
    let env = setup();
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);
    dispatch_at(q, "w1", &[], env.now).unwrap();

    q.return_job(&worker("w1"), id).unwrap();

    assert_eq!(q.get_status(id), Some(ObservedStatus::Returned));
    assert_eq!(record(q, id).run_counter, 0);
    assert_eq!(q.count_status(ObservedStatus::Returned, None), 1);
    assert_eq!(q.count_status(ObservedStatus::Pending, None), 0);

    // Returned jobs are dispatchable again, and the label goes away.
    assert_eq!(dispatch_at(q, "w1", &[], env.now).unwrap().id, id);
    assert_eq!(q.get_status(id), Some(ObservedStatus::Running));
    assert_eq!(record(q, id).run_counter, 1);
    assert_eq!(q.count_status(ObservedStatus::Returned, None), 0);
}

#[test]
fn test_returned_is_not_persisted() {
    let env = setup();
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);
    dispatch_at(q, "w1", &[], env.now).unwrap();
    q.return_job(&worker("w1"), id).unwrap();

    assert_eq!(record(q, id).status, JobStatus::Pending);
    let descr = q
        .get_job_descr(id, Some(ObservedStatus::Returned))
        .unwrap()
        .unwrap();
    assert_eq!(descr.status, ObservedStatus::Returned);
    assert!(q
        .get_job_descr(id, Some(ObservedStatus::Pending))
        .unwrap()
        .is_none());
}

#[test]
fn test_force_reschedule_terminal_job() {
    let env = setup();
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);
    dispatch_at(q, "w1", &[], env.now).unwrap();
    q.put_result_at(&worker("w1"), id, 0, "out", env.now).unwrap();

    q.force_reschedule(id).unwrap();

    assert_eq!(q.get_status(id), Some(ObservedStatus::Pending));
    let rec = record(q, id);
    assert_eq!(rec.time_done, 0);
    assert_eq!(rec.run_counter, 1);
    assert_eq!(dispatch_at(q, "w2", &[], env.now).unwrap().id, id);

    q.force_reschedule(31337).unwrap();
    assert_eq!(q.get_status(31337), None);
}

#[test]
fn test_delay_expiration_extends_deadline() {
    let env = setup_with(|p| p.run_timeout = 10);
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);
    dispatch_at(q, "w1", &[], env.now).unwrap();

    q.job_delay_expiration_at(&worker("w1"), id, 20, env.now + 5)
        .unwrap();
    assert_eq!(record(q, id).run_timeout, 25);

    assert_eq!(q.check_execution_timeout_at(env.now + 11), 0);
    assert_eq!(q.get_status(id), Some(ObservedStatus::Running));
    assert_eq!(q.check_execution_timeout_at(env.now + 26), 1);
    assert_eq!(q.get_status(id), Some(ObservedStatus::Returned));

    // The extension does not carry over to the next run.
    dispatch_at(q, "w1", &[], env.now + 30).unwrap();
    assert_eq!(record(q, id).run_timeout, 0);
}

#[test]
fn test_delay_expiration_ignored_unless_running() {
    let env = setup();
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);

    q.job_delay_expiration_at(&worker("w1"), id, 100, env.now)
        .unwrap();
    assert_eq!(record(q, id).run_timeout, 0);
}

#[test]
fn test_progress_message() {
    let env = setup_with(|p| p.max_output_size = 32);
    let q = &env.queue;
    let id = submit_at(q, "x", env.now);
    dispatch_at(q, "w1", &[], env.now).unwrap();

    q.put_progress_msg(&worker("w1"), id, "50%").unwrap();
    assert_eq!(record(q, id).progress_msg, "50%");

    let err = q
        .put_progress_msg(&worker("w1"), id, &"p".repeat(33))
        .unwrap_err();
    assert!(matches!(err, SchedError::DataTooLong { what: "progress message", .. }));
}

#[test]
fn test_drop_job_hides_immediately() {
    let env = setup();
    let q = &env.queue;
    let id = submit_req_at(q, SubmitRequest::new("x").with_affinity("grp"), env.now);
    let other = submit_at(q, "y", env.now);

    assert!(q.drop_job(id).unwrap());
    assert!(!q.drop_job(id).unwrap());

    assert_eq!(q.get_status(id), None);
    assert!(q.get_job_descr(id, None).unwrap().is_none());
    assert_eq!(q.count_status(ObservedStatus::Pending, Some("grp")), 0);
    assert_eq!(dispatch_at(q, "w1", &[], env.now).unwrap().id, other);
    // The record stays until the reaper runs.
    assert!(q.load_job(id).unwrap().is_some());
}

#[test]
fn test_count_status_by_affinity() {
    let env = setup();
    let q = &env.queue;
    for token in ["a", "a", "b"] {
        submit_req_at(q, SubmitRequest::new(token).with_affinity(token), env.now);
    }
    submit_at(q, "none", env.now);

    assert_eq!(q.count_status(ObservedStatus::Pending, None), 4);
    assert_eq!(q.count_status(ObservedStatus::Pending, Some("a")), 2);
    assert_eq!(q.count_status(ObservedStatus::Pending, Some("b")), 1);
    assert_eq!(q.count_status(ObservedStatus::Pending, Some("zzz")), 0);
}
