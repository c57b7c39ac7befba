//! File-like surface over the scheduler.
//!
//! A [`SessionFile`] is what a client holds after opening the device: writes
//! submit framed jobs, reads return framed results, `fsync` blocks until the
//! session's current work drains and `interlock_after` orders this session
//! behind another one.

use tokio::sync::watch;

use crate::error::{Result, SchedError};
use crate::scheduler::{CloseSummary, JobRef, JobStatus, Priority, Readiness, SessionId, SessionSnapshot};
use crate::service::SchedulerHandle;
use crate::wire::{ReadFrame, WriteFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Completions are kept for reading.
    ReadWrite,
    /// Completions are discarded once reported.
    WriteOnly,
}

impl OpenMode {
    pub fn readable(self) -> bool {
        matches!(self, OpenMode::ReadWrite)
    }
}

/// Entry point for opening sessions.
#[derive(Debug, Clone)]
pub struct Device {
    handle: SchedulerHandle,
}

impl Device {
    pub fn new(handle: SchedulerHandle) -> Self {
        Self { handle }
    }

    /// Open a session at the caller's priority.
    pub async fn open(&self, priority: Priority, mode: OpenMode) -> Result<SessionFile> {
        let (id, readiness) = self.handle.open_session(priority, mode.readable()).await?;
        Ok(SessionFile {
            id,
            handle: self.handle.clone(),
            readiness,
        })
    }

    /// Open a session at the configured default priority.
    pub async fn open_default(&self, mode: OpenMode) -> Result<SessionFile> {
        self.open(self.handle.default_priority(), mode).await
    }
}

/// One open session.
#[derive(Debug)]
pub struct SessionFile {
    id: SessionId,
    handle: SchedulerHandle,
    readiness: watch::Receiver<Readiness>,
}

impl SessionFile {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Submit one framed job. Frames shorter than the header, or with no
    /// payload, are dropped without creating a job.
    pub async fn write(&self, buf: &[u8]) -> Result<Option<JobRef>> {
        let frame = match WriteFrame::decode(buf) {
            Ok(frame) => frame,
            Err(SchedError::ShortWrite(len)) => {
                tracing::debug!(session = %self.id, len, "Dropping short write");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if frame.payload.is_empty() {
            tracing::debug!(session = %self.id, "Dropping zero size write");
            return Ok(None);
        }
        let job = self
            .handle
            .admit(self.id, frame.kind, frame.id, frame.payload)
            .await?;
        Ok(Some(job))
    }

    /// Take the oldest result. Empty when nothing is ready or the job was
    /// submitted without a correlation id.
    pub async fn read(&self) -> Result<Vec<u8>> {
        match self.handle.pop_next_completed(self.id).await? {
            Some(job) => Ok(ReadFrame::encode(&job)),
            None => Ok(Vec::new()),
        }
    }

    pub fn poll_readable(&self) -> bool {
        self.readiness.borrow().is_readable()
    }

    /// Wait until a result is available. Fails once the session is closed.
    pub async fn wait_readable(&mut self) -> Result<()> {
        let id = self.id;
        let state = self
            .readiness
            .wait_for(|r| *r != Readiness::Pending(0))
            .await
            .map(|r| *r)
            .map_err(|_| SchedError::SessionClosed(id))?;
        match state {
            Readiness::Closed => Err(SchedError::SessionClosed(id)),
            Readiness::Pending(_) => Ok(()),
        }
    }

    /// Block until all work pending at the time of the call has drained.
    pub async fn fsync(&self) -> Result<JobStatus> {
        self.handle.await_status(self.id).await
    }

    /// Order all later work of this session after what is pending in `other`.
    pub async fn interlock_after(&self, other: &SessionFile) -> Result<()> {
        self.handle.interlock(self.id, other.id).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.handle.snapshot(self.id).await
    }

    /// Tear the session down. Returns after every job is released.
    pub async fn release(self) -> Result<CloseSummary> {
        self.handle.close_session(self.id).await
    }
}
