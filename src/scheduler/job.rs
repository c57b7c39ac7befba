use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::EngineClass;
use crate::scheduler::session::SessionId;
use crate::scheduler::wait::StatusWait;

/// Stable arena index of a job. Never reused, so a smaller value was
/// always allocated earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobRef(pub u64);

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Encoded job type: engine class in bits 16..24, operation code elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKind(pub u32);

impl JobKind {
    /// Marker kind of an interlock placeholder.
    pub const INTERLOCK_WAITING: JobKind = JobKind(u32::MAX);

    pub fn new(class: EngineClass, op: u16) -> Self {
        JobKind((u32::from(class.0) << 16) | u32::from(op))
    }

    pub fn engine_class(self) -> EngineClass {
        EngineClass(((self.0 & 0x00FF_0000) >> 16) as u8)
    }

    pub fn is_placeholder(self) -> bool {
        self == Self::INTERLOCK_WAITING
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_placeholder() {
            write!(f, "interlock")
        } else {
            write!(f, "{:#010x}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Invalid,
    Ready,
    Running,
    Complete,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Aborted)
    }

    /// Numeric code used on the read path.
    pub fn code(self) -> u32 {
        match self {
            JobStatus::Invalid => 0,
            JobStatus::Ready => 1,
            JobStatus::Running => 2,
            JobStatus::Complete => 3,
            JobStatus::Aborted => 4,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => JobStatus::Ready,
            2 => JobStatus::Running,
            3 => JobStatus::Complete,
            4 => JobStatus::Aborted,
            _ => JobStatus::Invalid,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Invalid => write!(f, "invalid"),
            JobStatus::Ready => write!(f, "ready"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Aborted => write!(f, "aborted"),
        }
    }
}

/// A job owned by the registry.
///
/// Placeholders carry no payload and exist only to hold a position in a
/// session's pending queue until their predecessor (in another session)
/// drains.
#[derive(Debug)]
pub struct Job {
    pub job_ref: JobRef,
    pub session: SessionId,
    pub kind: JobKind,
    pub id: u32,
    /// Submitted bytes, replaced by the engine's output on completion.
    pub payload: Vec<u8>,
    pub size: usize,
    pub status: JobStatus,
    /// Set once the job has been handed to its engine router.
    pub forwarded: bool,
    pub predecessor: Option<JobRef>,
    pub successor: Option<JobRef>,
    pub(crate) waiters: Vec<StatusWait>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Fresh job, shaped as a placeholder until the caller fills it in.
    pub fn new(job_ref: JobRef, session: SessionId) -> Self {
        Self {
            job_ref,
            session,
            kind: JobKind::INTERLOCK_WAITING,
            id: 0,
            payload: Vec::new(),
            size: 0,
            status: JobStatus::Ready,
            forwarded: false,
            predecessor: None,
            successor: None,
            waiters: Vec::new(),
            submitted_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.kind.is_placeholder()
    }

    /// A placeholder with nothing left to wait for.
    pub fn is_unblocked_placeholder(&self) -> bool {
        self.is_placeholder() && self.predecessor.is_none()
    }

    pub fn engine_class(&self) -> EngineClass {
        self.kind.engine_class()
    }
}

/// A finished job handed back to its session by a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedJob {
    pub job_ref: JobRef,
    pub kind: JobKind,
    pub id: u32,
    pub status: JobStatus,
    pub payload: Vec<u8>,
}

impl From<Job> for CompletedJob {
    fn from(job: Job) -> Self {
        Self {
            job_ref: job.job_ref,
            kind: job.kind,
            id: job.id,
            status: job.status,
            payload: job.payload,
        }
    }
}
