//! Boundary to the hardware engines that actually run jobs.
//!
//! Each engine class (bits 16..24 of a job kind) is served by one
//! [`EngineRouter`]. The scheduling core calls into routers synchronously
//! while it holds the only mutation point, so router methods must be quick
//! and must never call back into the scheduler inline. Completion is
//! reported later through [`SchedulerHandle::complete`].
//!
//! [`SchedulerHandle::complete`]: crate::service::SchedulerHandle::complete

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedError};
use crate::scheduler::{JobKind, JobRef, Priority, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineClass(pub u8);

impl std::fmt::Display for EngineClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job handed to an engine, with its own copy of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineJob {
    pub job: JobRef,
    pub session: SessionId,
    pub kind: JobKind,
    pub id: u32,
    pub priority: Priority,
    pub payload: Vec<u8>,
}

/// Downstream execution queue for one engine class.
pub trait EngineRouter: Send + Sync {
    /// Queue a job for execution. The router must later report exactly one
    /// completion for it, unless it is aborted first.
    fn admit(&self, job: EngineJob);

    /// Drop a job. The scheduler completes it as aborted itself; any later
    /// completion report for it is ignored. Returns the payload if the router
    /// still held it.
    fn abort(&self, job: JobRef) -> Option<Vec<u8>>;

    /// Move a queued job to a new priority.
    fn reorder(&self, job: JobRef, priority: Priority);

    /// The scheduler no longer tracks this job; release engine-side state.
    fn release(&self, _job: JobRef) {}
}

/// Routers indexed by engine class.
#[derive(Clone)]
pub struct EngineSet {
    routers: Vec<Option<Arc<dyn EngineRouter>>>,
}

impl std::fmt::Debug for EngineSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let classes: Vec<usize> = self
            .routers
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(i, _)| i)
            .collect();
        f.debug_struct("EngineSet").field("classes", &classes).finish()
    }
}

impl EngineSet {
    pub fn new(max_classes: usize) -> Self {
        Self {
            routers: vec![None; max_classes],
        }
    }

    /// Register the router for a class, replacing any previous one.
    pub fn register(&mut self, class: EngineClass, router: Arc<dyn EngineRouter>) -> Result<()> {
        let slot = self
            .routers
            .get_mut(usize::from(class.0))
            .ok_or(SchedError::InvalidRoute(class))?;
        *slot = Some(router);
        tracing::info!(class = %class, "Engine router registered");
        Ok(())
    }

    pub fn with_router(mut self, class: EngineClass, router: Arc<dyn EngineRouter>) -> Result<Self> {
        self.register(class, router)?;
        Ok(self)
    }

    pub fn router(&self, class: EngineClass) -> Result<&Arc<dyn EngineRouter>> {
        self.routers
            .get(usize::from(class.0))
            .and_then(Option::as_ref)
            .ok_or(SchedError::InvalidRoute(class))
    }

    pub fn contains(&self, class: EngineClass) -> bool {
        self.router(class).is_ok()
    }

    pub fn admit(&self, class: EngineClass, job: EngineJob) -> Result<()> {
        self.router(class)?.admit(job);
        Ok(())
    }

    pub fn abort(&self, class: EngineClass, job: JobRef) -> Option<Vec<u8>> {
        self.router(class).ok().and_then(|r| r.abort(job))
    }

    pub fn reorder(&self, class: EngineClass, job: JobRef, priority: Priority) {
        if let Ok(router) = self.router(class) {
            router.reorder(job, priority);
        }
    }

    pub fn release(&self, class: EngineClass, job: JobRef) {
        if let Ok(router) = self.router(class) {
            router.release(job);
        }
    }
}
