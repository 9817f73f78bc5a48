use crate::run_status::RunStatus;
use serde::{Deserialize, Serialize};

/// Work published to the queue: what to execute and where to report the result
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct JobMessage {
    pub command: String,
    pub webhook: String,
}

/// The outcome of a job that a worker posts back to the job's webhook
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResultMessage {
    pub status: i64,
    pub output: String,
}

impl ResultMessage {
    pub fn run_status(&self) -> RunStatus {
        RunStatus::from_exit_code(self.status)
    }
}
