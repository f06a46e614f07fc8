//! Query tests: selection over statuses, ids and tags; projection.

use super::*;
use crate::queue::types::format_timestamp;

/// Jobs 1..=6: 1 Done, 2 Running, 3 Returned, 4 Canceled, 5-6 Pending.
fn populated() -> TestEnv {
    let env = setup();
    let q = &env.queue;
    let reqs = vec![
        SubmitRequest::new("a").with_tag("owner", "alice").with_tag("kind", "sim"),
        SubmitRequest::new("b").with_tag("owner", "bob"),
        SubmitRequest::new("c").with_tag("owner", "alice"),
        SubmitRequest::new("d").with_tag("kind", "sim"),
        SubmitRequest::new("e").with_affinity("grp"),
        SubmitRequest::new("f"),
    ];
    q.submit_batch_at(&submitter(), &reqs, env.now).unwrap();

    for _ in 0..3 {
        dispatch_at(q, "w1", &[], env.now).unwrap();
    }
    q.put_result_at(&worker("w1"), 1, 0, "result", env.now).unwrap();
    q.return_job(&worker("w1"), 3).unwrap();
    q.cancel(&submitter(), 4).unwrap();
    env
}

fn select(q: &Queue, expr: &str) -> Vec<u64> {
    q.exec_select(expr).unwrap().iter().collect()
}

#[test]
fn test_select_by_status() {
    let env = populated();
    let q = &env.queue;

    assert_eq!(select(q, "status = Done"), vec![1]);
    assert_eq!(select(q, "status = pending"), vec![5, 6]);
    assert_eq!(select(q, "status = Returned"), vec![3]);
    assert_eq!(select(q, "status IN (Running, Canceled)"), vec![2, 4]);
    assert_eq!(select(q, "status != Pending"), vec![1, 2, 3, 4]);
    assert_eq!(select(q, "status NOT IN (Pending, Returned)"), vec![1, 2, 4]);
}

#[test]
fn test_select_by_id_and_wildcard() {
    let env = populated();
    let q = &env.queue;

    assert_eq!(select(q, "id = 2"), vec![2]);
    assert_eq!(select(q, "id = 99"), Vec::<u64>::new());
    assert_eq!(select(q, "id IN (1, 3, 99)"), vec![1, 3]);
    assert_eq!(select(q, "*"), vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_select_by_tag() {
    let env = populated();
    let q = &env.queue;

    assert_eq!(select(q, "tag.owner = alice"), vec![1, 3]);
    assert_eq!(select(q, "tag.owner = 'bob'"), vec![2]);
    assert_eq!(select(q, "tag.owner = *"), vec![1, 2, 3]);
    assert_eq!(select(q, "tag.kind != sim"), vec![2, 3, 5, 6]);
}

#[test]
fn test_select_boolean_operators() {
    let env = populated();
    let q = &env.queue;

    assert_eq!(select(q, "tag.owner = alice AND status = Done"), vec![1]);
    assert_eq!(select(q, "tag.owner = bob OR tag.kind = sim"), vec![1, 2, 4]);
    assert_eq!(select(q, "tag.owner = alice XOR tag.kind = sim"), vec![3, 4]);
    assert_eq!(select(q, "* SUB status = Pending"), vec![1, 2, 3, 4]);
    assert_eq!(select(q, "NOT (id = 1 OR id = 2)"), vec![3, 4, 5, 6]);
    assert_eq!(
        select(q, "status = Pending OR tag.owner = alice AND status = Done"),
        vec![1, 5, 6]
    );
}

#[test]
fn test_select_syntax_error() {
    let env = populated();
    let err = env.queue.exec_select("status = Sleeping").unwrap_err();
    assert!(matches!(err, SchedError::QuerySyntax { .. }));
    let err = env.queue.exec_select("id = 1 AND").unwrap_err();
    assert!(matches!(err, SchedError::QuerySyntax { .. }));
}

#[test]
fn test_select_skips_erased() {
    let env = populated();
    let q = &env.queue;
    q.drop_job(1).unwrap();

    assert_eq!(select(q, "tag.owner = alice"), vec![3]);
    assert_eq!(select(q, "*"), vec![2, 3, 4, 5, 6]);
}

#[test]
fn test_project_fields() {
    let env = populated();
    let q = &env.queue;
    let jobs = q.exec_select("id IN (1, 3, 5)").unwrap();

    let projection = q
        .exec_project(&jobs, &["id", "status", "output", "tag.owner", "affinity", "worker"])
        .unwrap();

    assert_eq!(
        projection.fields,
        vec!["id", "status", "output", "tag.owner", "affinity", "worker"]
    );
    assert_eq!(
        projection.rows,
        vec![
            vec!["1", "Done", "result", "alice", "", "w1"],
            vec!["3", "Returned", "", "alice", "", "w1"],
            vec!["5", "Pending", "", "", "grp", ""],
        ]
    );
}

#[test]
fn test_project_timestamps_and_unknown_field() {
    let env = populated();
    let q = &env.queue;
    let jobs = q.exec_select("id = 6").unwrap();

    let projection = q.exec_project(&jobs, &["time_submit", "time_run"]).unwrap();
    assert_eq!(projection.rows.len(), 1);
    assert_eq!(projection.rows[0][0], format_timestamp(env.now));
    assert_eq!(projection.rows[0][1], format_timestamp(0));

    let err = q.exec_project(&jobs, &["id", "shoe_size"]).unwrap_err();
    assert!(matches!(err, SchedError::QuerySyntax { .. }));
}

#[test]
fn test_project_skips_vanished_jobs() {
    let env = populated();
    let q = &env.queue;
    let jobs = q.exec_select("*").unwrap();
    q.drop_job(2).unwrap();

    let projection = q.exec_project(&jobs, &["id"]).unwrap();
    let ids: Vec<&str> = projection.rows.iter().map(|r| r[0].as_str()).collect();
    assert_eq!(ids, vec!["1", "3", "4", "5", "6"]);
}
