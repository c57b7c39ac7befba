use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

use crate::config::SchedulerConfig;
use crate::engine::{EngineJob, EngineSet};
use crate::error::{Result, SchedError};
use crate::scheduler::events::SchedulerEvent;
use crate::scheduler::job::{CompletedJob, JobKind, JobRef, JobStatus};
use crate::scheduler::registry::{Registry, RegistryStats};
use crate::scheduler::session::{Priority, Readiness, SessionId};

/// Dependency graph manager.
///
/// Owns the registry and the engine routers. Every method takes `&mut self`
/// and runs to completion; the service task is the only caller in a running
/// system, which is what keeps the interlock graph consistent.
#[derive(Debug)]
pub struct Graph {
    pub(crate) registry: Registry,
    pub(crate) engines: EngineSet,
    events: broadcast::Sender<SchedulerEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_ref: JobRef,
    pub kind: JobKind,
    pub id: u32,
    pub status: JobStatus,
    pub size: usize,
    pub forwarded: bool,
    pub predecessor: Option<JobRef>,
    pub successor: Option<JobRef>,
    /// Callers blocked on this placeholder.
    pub waiters: usize,
    pub submitted_at: DateTime<Utc>,
}

/// Best-effort diagnostic view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub priority: Priority,
    pub interlock_count: usize,
    pub readable: bool,
    pub pending: Vec<JobSnapshot>,
    pub completed: usize,
}

impl Graph {
    pub fn new(config: &SchedulerConfig, engines: EngineSet) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            registry: Registry::new(config.max_jobs, config.max_sessions),
            engines,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SchedulerEvent> {
        self.events.clone()
    }

    pub(crate) fn emit(&self, event: SchedulerEvent) {
        // No subscribers is the common case.
        let _ = self.events.send(event);
    }

    pub fn open_session(
        &mut self,
        priority: Priority,
        readable: bool,
    ) -> Result<(SessionId, watch::Receiver<Readiness>)> {
        let id = self.registry.open_session(priority, readable)?;
        let readiness = self.registry.session(id)?.subscribe_readiness();
        tracing::info!(session = %id, priority = %priority, readable, "Session opened");
        Ok((id, readiness))
    }

    /// Admit a real job. It is forwarded at once unless the session is
    /// held behind an interlock.
    pub fn admit(
        &mut self,
        session: SessionId,
        kind: JobKind,
        id: u32,
        payload: Vec<u8>,
    ) -> Result<JobRef> {
        let class = kind.engine_class();
        if kind.is_placeholder() || !self.engines.contains(class) {
            tracing::warn!(session = %session, kind = %kind, "Rejecting job with no engine route");
            return Err(SchedError::InvalidRoute(class));
        }

        let job_ref = self.registry.create_job(session)?;
        let held = {
            let Some((job, sess)) = self.registry.job_and_session_mut(job_ref) else {
                return Err(SchedError::JobNotFound(job_ref));
            };
            job.kind = kind;
            job.id = id;
            job.size = payload.len();
            job.payload = payload;
            job.status = JobStatus::Ready;
            sess.pending.push_back(job_ref);
            sess.interlock_count > 0
        };

        if held {
            tracing::debug!(job = %job_ref, session = %session, "Job held behind interlock");
        } else {
            self.forward(job_ref);
        }
        self.emit(SchedulerEvent::JobAdded { class });
        Ok(job_ref)
    }

    /// Hand a real job to its engine. No-op for placeholders and for jobs
    /// that already went out.
    pub(crate) fn forward(&mut self, job_ref: JobRef) {
        let Some((job, sess)) = self.registry.job_and_session_mut(job_ref) else {
            return;
        };
        if job.is_placeholder() || job.forwarded {
            return;
        }
        job.forwarded = true;
        job.status = JobStatus::Running;
        let class = job.engine_class();
        let engine_job = EngineJob {
            job: job_ref,
            session: job.session,
            kind: job.kind,
            id: job.id,
            priority: sess.priority,
            payload: job.payload.clone(),
        };
        tracing::debug!(job = %job_ref, class = %class, priority = %sess.priority, "Forwarding job to engine");
        if let Err(e) = self.engines.admit(class, engine_job) {
            // Routes are checked at admission, so this only trips if a
            // router vanished in between.
            tracing::warn!(job = %job_ref, error = %e, "Engine route lost");
        }
    }

    /// Remove and return the oldest completed job of a session.
    pub fn pop_next_completed(&mut self, session: SessionId) -> Result<Option<CompletedJob>> {
        let Some(job_ref) = self.registry.session_mut(session)?.pop_completed() else {
            return Ok(None);
        };
        Ok(self.registry.take_job(job_ref).map(CompletedJob::from))
    }

    pub fn snapshot(&self, session: SessionId) -> Result<SessionSnapshot> {
        let sess = self.registry.session(session)?;
        let pending = self
            .registry
            .pending_jobs(session)
            .into_iter()
            .map(|job| JobSnapshot {
                job_ref: job.job_ref,
                kind: job.kind,
                id: job.id,
                status: job.status,
                size: job.size,
                forwarded: job.forwarded,
                predecessor: job.predecessor,
                successor: job.successor,
                waiters: job.waiters.len(),
                submitted_at: job.submitted_at,
            })
            .collect();
        Ok(SessionSnapshot {
            id: sess.id,
            priority: sess.priority,
            interlock_count: sess.interlock_count,
            readable: sess.readable,
            pending,
            completed: sess.completed.len(),
        })
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
