use thiserror::Error;

use crate::engine::EngineClass;
use crate::scheduler::{JobRef, SessionId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    #[error("Allocation refused: {0}")]
    AllocationFailure(&'static str),

    #[error("Short write: {0} bytes, need at least 8")]
    ShortWrite(usize),

    #[error("No engine registered for class {0}")]
    InvalidRoute(EngineClass),

    #[error("Session closed: {0}")]
    SessionClosed(SessionId),

    #[error("Job not found: {0}")]
    JobNotFound(JobRef),

    #[error("Invalid interlock: {0}")]
    InvalidInterlock(String),

    #[error("Scheduler service unavailable")]
    Unavailable,

    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

pub type Result<T> = std::result::Result<T, SchedError>;
