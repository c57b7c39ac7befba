use std::collections::HashMap;

use serde::Serialize;

use crate::error::{Result, SchedError};
use crate::scheduler::job::{Job, JobRef};
use crate::scheduler::session::{Priority, Session, SessionId};

/// Owns every job and session. Callers hold `JobRef`/`SessionId` handles.
#[derive(Debug)]
pub struct Registry {
    jobs: HashMap<JobRef, Job>,
    sessions: HashMap<SessionId, Session>,
    next_job: u64,
    max_jobs: usize,
    max_sessions: usize,
}

/// Live object counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub jobs: usize,
    pub sessions: usize,
}

impl Registry {
    pub fn new(max_jobs: usize, max_sessions: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            sessions: HashMap::new(),
            next_job: 1,
            max_jobs,
            max_sessions,
        }
    }

    /// Allocate a job for `session`. Fails without side effects when the
    /// registry is at capacity or the session is gone.
    pub fn create_job(&mut self, session: SessionId) -> Result<JobRef> {
        match self.sessions.get(&session) {
            Some(s) if !s.closing => {}
            _ => return Err(SchedError::SessionClosed(session)),
        }
        if self.jobs.len() >= self.max_jobs {
            return Err(SchedError::AllocationFailure("job capacity reached"));
        }
        let job_ref = JobRef(self.next_job);
        self.next_job += 1;
        self.jobs.insert(job_ref, Job::new(job_ref, session));
        Ok(job_ref)
    }

    pub fn open_session(&mut self, priority: Priority, readable: bool) -> Result<SessionId> {
        if self.sessions.len() >= self.max_sessions {
            return Err(SchedError::AllocationFailure("session capacity reached"));
        }
        let id = SessionId::new();
        self.sessions.insert(id, Session::new(id, priority, readable));
        Ok(id)
    }

    pub fn job(&self, job: JobRef) -> Option<&Job> {
        self.jobs.get(&job)
    }

    pub fn job_mut(&mut self, job: JobRef) -> Option<&mut Job> {
        self.jobs.get_mut(&job)
    }

    /// Drop a job from the arena, handing ownership to the caller.
    pub fn take_job(&mut self, job: JobRef) -> Option<Job> {
        self.jobs.remove(&job)
    }

    pub fn session(&self, id: SessionId) -> Result<&Session> {
        self.sessions.get(&id).ok_or(SchedError::SessionClosed(id))
    }

    pub fn session_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions.get_mut(&id).ok_or(SchedError::SessionClosed(id))
    }

    pub fn remove_session(&mut self, id: SessionId) -> Option<Session> {
        self.sessions.remove(&id)
    }

    /// Split borrow used when a job and its session change together.
    pub fn job_and_session_mut(
        &mut self,
        job: JobRef,
    ) -> Option<(&mut Job, &mut Session)> {
        let job = self.jobs.get_mut(&job)?;
        let session = self.sessions.get_mut(&job.session)?;
        Some((job, session))
    }

    /// Jobs in a session's pending queue, in order.
    pub fn pending_jobs(&self, id: SessionId) -> Vec<&Job> {
        self.sessions
            .get(&id)
            .map(|s| s.pending.iter().filter_map(|j| self.jobs.get(j)).collect())
            .unwrap_or_default()
    }

    pub fn jobs_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.values_mut()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            jobs: self.jobs.len(),
            sessions: self.sessions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.sessions.is_empty()
    }
}
