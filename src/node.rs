use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{SchedulerConfig, WorkerConfig};
use crate::device::Device;
use crate::engine::{EngineClass, EngineRouter, EngineSet};
use crate::error::Result;
use crate::service::{Scheduler, SchedulerHandle};
use crate::worker::EngineWorker;

/// A scheduler service together with one simulated engine per class.
pub struct Node {
    pub config: SchedulerConfig,
    pub workers: Vec<EngineWorker>,
}

impl Node {
    pub fn new(config: SchedulerConfig, worker: WorkerConfig, classes: &[EngineClass]) -> Self {
        let workers = classes
            .iter()
            .map(|&class| EngineWorker::new(class, worker.clone()))
            .collect();
        Self { config, workers }
    }

    /// Start the service task and the engine lanes.
    ///
    /// Everything stops when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRoute` if a worker's class does not fit the configured
    /// number of engine classes.
    pub fn start(&self, shutdown: CancellationToken) -> Result<RunningNode> {
        let mut engines = EngineSet::new(self.config.max_engine_classes);
        for worker in &self.workers {
            let router: Arc<dyn EngineRouter> = Arc::new(worker.clone());
            engines.register(worker.class(), router)?;
        }

        let (handle, service) = Scheduler::spawn(&self.config, engines, shutdown.clone());
        let mut tasks = vec![service];
        for worker in &self.workers {
            tasks.extend(worker.start(handle.clone(), shutdown.clone()));
        }
        tracing::info!(
            engines = self.workers.len(),
            max_jobs = self.config.max_jobs,
            "Node started"
        );

        Ok(RunningNode {
            handle,
            shutdown,
            tasks,
        })
    }
}

/// Tasks of a started [`Node`].
pub struct RunningNode {
    pub handle: SchedulerHandle,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningNode {
    pub fn device(&self) -> Device {
        Device::new(self.handle.clone())
    }

    /// Cancel every task and wait for them to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Node task ended abnormally");
            }
        }
    }
}
