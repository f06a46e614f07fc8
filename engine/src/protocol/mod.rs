//! Job data model shared by the queue engine and its callers.

mod types;

pub use types::{
    Client, DispatchedJob, JobDescr, JobRecord, JobStatus, ObservedStatus, QueueInfo, QueueKind,
    SubmitRequest, SubmitterNotify, MAX_WORKER_NODES,
};

pub(crate) use types::client_version;
