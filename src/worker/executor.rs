use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::engine::{EngineClass, EngineJob, EngineRouter};
use crate::error::SchedError;
use crate::scheduler::{JobKind, JobRef, JobStatus, Priority};
use crate::service::SchedulerHandle;

/// Result of running one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub job: JobRef,
    pub status: JobStatus,
    pub output: Vec<u8>,
}

/// What the simulated hardware does with a payload.
pub trait JobHandler: Send + Sync + 'static {
    fn process(&self, kind: JobKind, payload: Vec<u8>) -> (JobStatus, Vec<u8>);
}

/// Hands the payload back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

impl JobHandler for EchoHandler {
    fn process(&self, _kind: JobKind, payload: Vec<u8>) -> (JobStatus, Vec<u8>) {
        (JobStatus::Complete, payload)
    }
}

/// Engine-side queue, highest precedence first, FIFO within a priority.
#[derive(Debug, Default)]
struct EngineQueue {
    waiting: BTreeMap<(Priority, u64), EngineJob>,
    keys: HashMap<JobRef, (Priority, u64)>,
    running: HashSet<JobRef>,
    /// Running jobs the scheduler already aborted; their result is dropped.
    cancelled: HashSet<JobRef>,
    seq: u64,
}

impl EngineQueue {
    fn push(&mut self, job: EngineJob) {
        self.seq += 1;
        let key = (job.priority, self.seq);
        self.keys.insert(job.job, key);
        self.waiting.insert(key, job);
    }

    fn pop(&mut self) -> Option<EngineJob> {
        let (_, job) = self.waiting.pop_first()?;
        self.keys.remove(&job.job);
        self.running.insert(job.job);
        Some(job)
    }
}

/// In-process engine for one class.
///
/// Admitted jobs wait in a priority queue; `concurrency` tasks take them in
/// order, sleep for a random latency, run the [`JobHandler`] and report the
/// outcome through the scheduler handle.
#[derive(Clone)]
pub struct EngineWorker {
    class: EngineClass,
    config: WorkerConfig,
    queue: Arc<Mutex<EngineQueue>>,
    ready: Arc<Notify>,
    handler: Arc<dyn JobHandler>,
}

impl std::fmt::Debug for EngineWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineWorker")
            .field("class", &self.class)
            .field("config", &self.config)
            .finish()
    }
}

impl EngineWorker {
    pub fn new(class: EngineClass, config: WorkerConfig) -> Self {
        Self::with_handler(class, config, Arc::new(EchoHandler))
    }

    pub fn with_handler(class: EngineClass, config: WorkerConfig, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            class,
            config,
            queue: Arc::new(Mutex::new(EngineQueue::default())),
            ready: Arc::new(Notify::new()),
            handler,
        }
    }

    pub fn class(&self) -> EngineClass {
        self.class
    }

    fn lock(&self) -> MutexGuard<'_, EngineQueue> {
        // The queue holds no invariants a panicking holder could break.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Jobs admitted but not yet started, in execution order.
    pub fn queued(&self) -> Vec<(JobRef, Priority)> {
        self.lock()
            .waiting
            .iter()
            .map(|((priority, _), job)| (job.job, *priority))
            .collect()
    }

    pub fn running(&self) -> usize {
        self.lock().running.len()
    }

    /// Start the execution tasks.
    pub fn start(&self, handle: SchedulerHandle, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|lane| {
                let worker = self.clone();
                let handle = handle.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(lane, handle, shutdown).await })
            })
            .collect()
    }

    async fn run(&self, lane: usize, handle: SchedulerHandle, shutdown: CancellationToken) {
        tracing::info!(class = %self.class, lane, "Engine worker started");
        loop {
            let next = self.lock().pop();
            let Some(job) = next else {
                tokio::select! {
                    _ = self.ready.notified() => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            };

            let latency = self.random_latency();
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = shutdown.cancelled() => break,
            }

            let result = self.execute(job);
            let aborted = {
                let mut queue = self.lock();
                queue.running.remove(&result.job);
                queue.cancelled.remove(&result.job)
            };
            if aborted {
                tracing::debug!(job = %result.job, "Dropping result of aborted job");
                continue;
            }

            match handle
                .complete(result.job, result.status, Some(result.output))
                .await
            {
                Ok(()) => {}
                Err(SchedError::JobNotFound(job)) => {
                    tracing::debug!(job = %job, "Job was torn down before completion");
                }
                Err(e) => {
                    tracing::warn!(class = %self.class, error = %e, "Failed to report completion");
                    break;
                }
            }
        }
        tracing::info!(class = %self.class, lane, "Engine worker stopped");
    }

    /// Run one job through the handler.
    pub fn execute(&self, job: EngineJob) -> ExecutionResult {
        tracing::debug!(job = %job.job, kind = %job.kind, priority = %job.priority, "Executing job");
        let (status, output) = self.handler.process(job.kind, job.payload);
        ExecutionResult {
            job: job.job,
            status,
            output,
        }
    }

    fn random_latency(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let ms = rng.gen_range(self.config.latency_min_ms..=self.config.latency_max_ms);
        Duration::from_millis(ms)
    }
}

impl EngineRouter for EngineWorker {
    fn admit(&self, job: EngineJob) {
        self.lock().push(job);
        self.ready.notify_one();
    }

    fn abort(&self, job: JobRef) -> Option<Vec<u8>> {
        let mut queue = self.lock();
        if let Some(key) = queue.keys.remove(&job) {
            return queue.waiting.remove(&key).map(|j| j.payload);
        }
        if queue.running.contains(&job) {
            queue.cancelled.insert(job);
        }
        None
    }

    fn reorder(&self, job: JobRef, priority: Priority) {
        let mut queue = self.lock();
        let Some(key) = queue.keys.get(&job).copied() else {
            return;
        };
        if let Some(mut pending) = queue.waiting.remove(&key) {
            pending.priority = priority;
            let new_key = (priority, key.1);
            queue.keys.insert(job, new_key);
            queue.waiting.insert(new_key, pending);
            tracing::debug!(job = %job, priority = %priority, "Engine job reordered");
        }
    }

    fn release(&self, job: JobRef) {
        let mut queue = self.lock();
        queue.running.remove(&job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SessionId;

    fn engine_job(job: u64, priority: i32) -> EngineJob {
        EngineJob {
            job: JobRef(job),
            session: SessionId::new(),
            kind: JobKind(0x0001_0000),
            id: job as u32,
            priority: Priority(priority),
            payload: vec![job as u8],
        }
    }

    #[test]
    fn test_queue_orders_by_priority_then_arrival() {
        let worker = EngineWorker::new(EngineClass(1), WorkerConfig::default());
        worker.admit(engine_job(1, 120));
        worker.admit(engine_job(2, 10));
        worker.admit(engine_job(3, 120));
        worker.admit(engine_job(4, 10));

        let order: Vec<JobRef> = worker.queued().into_iter().map(|(j, _)| j).collect();
        assert_eq!(order, vec![JobRef(2), JobRef(4), JobRef(1), JobRef(3)]);
    }

    #[test]
    fn test_reorder_moves_job_ahead() {
        let worker = EngineWorker::new(EngineClass(1), WorkerConfig::default());
        worker.admit(engine_job(1, 50));
        worker.admit(engine_job(2, 120));
        worker.reorder(JobRef(2), Priority(5));

        assert_eq!(
            worker.queued(),
            vec![(JobRef(2), Priority(5)), (JobRef(1), Priority(50))]
        );
    }

    #[test]
    fn test_abort_returns_queued_payload() {
        let worker = EngineWorker::new(EngineClass(1), WorkerConfig::default());
        worker.admit(engine_job(7, 120));
        assert_eq!(worker.abort(JobRef(7)), Some(vec![7]));
        assert!(worker.queued().is_empty());
        assert_eq!(worker.abort(JobRef(7)), None);
    }

    #[test]
    fn test_abort_of_running_job_marks_it_cancelled() {
        let worker = EngineWorker::new(EngineClass(1), WorkerConfig::default());
        worker.admit(engine_job(3, 120));
        let job = worker.lock().pop().unwrap();
        assert_eq!(worker.running(), 1);
        assert_eq!(worker.abort(job.job), None);
        assert!(worker.lock().cancelled.contains(&JobRef(3)));
    }

    #[test]
    fn test_echo_handler_returns_payload() {
        let worker = EngineWorker::new(EngineClass(1), WorkerConfig::default());
        let result = worker.execute(engine_job(9, 120));
        assert_eq!(result.job, JobRef(9));
        assert_eq!(result.status, JobStatus::Complete);
        assert_eq!(result.output, vec![9]);
    }
}
