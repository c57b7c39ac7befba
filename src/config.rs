use crate::scheduler::Priority;

const DEFAULT_MAX_JOBS: usize = 10_000;
const DEFAULT_MAX_SESSIONS: usize = 1_024;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ENGINE_CLASSES: usize = 8;

/// Configuration for the scheduling core.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on live jobs (real jobs and interlock placeholders).
    pub max_jobs: usize,
    /// Upper bound on open sessions.
    pub max_sessions: usize,
    /// Capacity of the request channel feeding the service task.
    pub channel_capacity: usize,
    /// Number of engine classes that can be registered.
    /// Kinds whose class is at or above this bound are unroutable.
    pub max_engine_classes: usize,
    /// Priority given to sessions opened without an explicit one.
    pub default_priority: Priority,
    /// Capacity of the scheduler event broadcast.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_engine_classes: DEFAULT_ENGINE_CLASSES,
            default_priority: Priority::NORMAL,
            event_capacity: 1_024,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Configuration for the in-process simulated engine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed concurrently by one engine.
    pub concurrency: usize,
    /// Simulated execution latency range, inclusive.
    pub latency_min_ms: u64,
    pub latency_max_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            latency_min_ms: 1,
            latency_max_ms: 5,
        }
    }
}

impl WorkerConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            ..Default::default()
        }
    }

    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_min_ms = min_ms.min(max_ms);
        self.latency_max_ms = max_ms.max(min_ms);
        self
    }
}
