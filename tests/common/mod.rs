//! Shared helpers for integration tests.
//!
//! [`RecordingEngine`] stands in for hardware: it records every call the
//! scheduler makes and never completes anything on its own, so tests decide
//! exactly when and in what order jobs finish.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mm_sched::config::SchedulerConfig;
use mm_sched::engine::{EngineClass, EngineJob, EngineRouter, EngineSet};
use mm_sched::scheduler::{Graph, JobKind, JobRef, Priority};
use mm_sched::service::{Scheduler, SchedulerHandle};

pub const CLASS_A: EngineClass = EngineClass(1);
pub const CLASS_B: EngineClass = EngineClass(2);

#[derive(Debug, Default)]
struct Calls {
    admitted: Vec<EngineJob>,
    aborted: Vec<JobRef>,
    reordered: Vec<(JobRef, Priority)>,
    released: Vec<JobRef>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEngine {
    calls: Arc<Mutex<Calls>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Job refs in admission order.
    pub fn admitted(&self) -> Vec<JobRef> {
        self.calls.lock().unwrap().admitted.iter().map(|j| j.job).collect()
    }

    pub fn admitted_jobs(&self) -> Vec<EngineJob> {
        self.calls.lock().unwrap().admitted.clone()
    }

    pub fn aborted(&self) -> Vec<JobRef> {
        self.calls.lock().unwrap().aborted.clone()
    }

    pub fn reordered(&self) -> Vec<(JobRef, Priority)> {
        self.calls.lock().unwrap().reordered.clone()
    }

    pub fn released(&self) -> Vec<JobRef> {
        self.calls.lock().unwrap().released.clone()
    }

    /// Payload the scheduler handed over for `job`.
    pub fn payload_of(&self, job: JobRef) -> Option<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .admitted
            .iter()
            .find(|j| j.job == job)
            .map(|j| j.payload.clone())
    }
}

impl EngineRouter for RecordingEngine {
    fn admit(&self, job: EngineJob) {
        self.calls.lock().unwrap().admitted.push(job);
    }

    fn abort(&self, job: JobRef) -> Option<Vec<u8>> {
        let mut calls = self.calls.lock().unwrap();
        calls.aborted.push(job);
        None
    }

    fn reorder(&self, job: JobRef, priority: Priority) {
        self.calls.lock().unwrap().reordered.push((job, priority));
    }

    fn release(&self, job: JobRef) {
        self.calls.lock().unwrap().released.push(job);
    }
}

/// Engine set with the same recording engine behind classes A and B.
pub fn recording_engines() -> (EngineSet, RecordingEngine) {
    let engine = RecordingEngine::new();
    let router: Arc<dyn EngineRouter> = Arc::new(engine.clone());
    let set = EngineSet::new(SchedulerConfig::default().max_engine_classes)
        .with_router(CLASS_A, router.clone())
        .unwrap()
        .with_router(CLASS_B, router)
        .unwrap();
    (set, engine)
}

pub fn test_graph() -> (Graph, RecordingEngine) {
    test_graph_with(SchedulerConfig::default())
}

pub fn test_graph_with(config: SchedulerConfig) -> (Graph, RecordingEngine) {
    let (engines, engine) = recording_engines();
    (Graph::new(&config, engines), engine)
}

pub fn kind_a() -> JobKind {
    JobKind::new(CLASS_A, 1)
}

pub fn kind_b() -> JobKind {
    JobKind::new(CLASS_B, 1)
}

/// A running service task backed by a recording engine.
pub struct TestScheduler {
    pub handle: SchedulerHandle,
    pub engine: RecordingEngine,
    pub shutdown: CancellationToken,
    pub task: JoinHandle<()>,
}

pub fn spawn_scheduler() -> TestScheduler {
    spawn_scheduler_with(SchedulerConfig::default())
}

pub fn spawn_scheduler_with(config: SchedulerConfig) -> TestScheduler {
    let (engines, engine) = recording_engines();
    let shutdown = CancellationToken::new();
    let (handle, task) = Scheduler::spawn(&config, engines, shutdown.clone());
    TestScheduler {
        handle,
        engine,
        shutdown,
        task,
    }
}

/// Encode a write frame.
pub fn write_frame(kind: JobKind, id: u32, payload: &[u8]) -> Vec<u8> {
    mm_sched::wire::WriteFrame {
        kind,
        id,
        payload: payload.to_vec(),
    }
    .encode()
}
