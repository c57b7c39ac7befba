//! The single mutation point.
//!
//! One task owns the [`Graph`] and drains a bounded request channel, running
//! each request to completion before taking the next. [`SchedulerHandle`]
//! wraps every request in a message carrying a oneshot reply and awaits that
//! reply, so a call returns only after its side effects are in place.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::engine::EngineSet;
use crate::error::{Result, SchedError};
use crate::scheduler::{
    CloseSummary, CompletedJob, Graph, JobKind, JobRef, JobStatus, Priority, Readiness,
    RegistryStats, SchedulerEvent, SessionId, SessionSnapshot, StatusWait, WaitId,
};

/// Requests handled by the service task
#[derive(Debug)]
pub enum SchedulerMessage {
    OpenSession {
        priority: Priority,
        readable: bool,
        response_tx: oneshot::Sender<Result<(SessionId, watch::Receiver<Readiness>)>>,
    },
    Admit {
        session: SessionId,
        kind: JobKind,
        id: u32,
        payload: Vec<u8>,
        response_tx: oneshot::Sender<Result<JobRef>>,
    },
    /// Order `to_session` after the work pending in `from_session`
    Interlock {
        to_session: SessionId,
        from_session: SessionId,
        response_tx: oneshot::Sender<Result<()>>,
    },
    /// Attach a status wait behind everything pending in a session
    Flush {
        session: SessionId,
        wait: StatusWait,
        response_tx: oneshot::Sender<Result<JobRef>>,
    },
    CancelWait {
        wait: WaitId,
        response_tx: oneshot::Sender<bool>,
    },
    PopCompleted {
        session: SessionId,
        response_tx: oneshot::Sender<Result<Option<CompletedJob>>>,
    },
    /// Engine completion report
    Complete {
        job: JobRef,
        status: JobStatus,
        output: Option<Vec<u8>>,
        response_tx: oneshot::Sender<Result<()>>,
    },
    Close {
        session: SessionId,
        response_tx: oneshot::Sender<Result<CloseSummary>>,
    },
    Snapshot {
        session: SessionId,
        response_tx: oneshot::Sender<Result<SessionSnapshot>>,
    },
    Stats {
        response_tx: oneshot::Sender<RegistryStats>,
    },
}

/// Owner of all scheduling state.
pub struct Scheduler {
    graph: Graph,
    default_priority: Priority,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        engines: EngineSet,
    ) -> (Self, SchedulerHandle, mpsc::Receiver<SchedulerMessage>) {
        let (message_tx, message_rx) = mpsc::channel(config.channel_capacity.max(1));
        let graph = Graph::new(config, engines);
        let handle = SchedulerHandle {
            message_tx,
            events: graph.event_sender(),
            default_priority: config.default_priority,
        };
        let scheduler = Self {
            graph,
            default_priority: config.default_priority,
        };
        (scheduler, handle, message_rx)
    }

    /// Build the scheduler and run it on its own task.
    pub fn spawn(
        config: &SchedulerConfig,
        engines: EngineSet,
        shutdown: CancellationToken,
    ) -> (SchedulerHandle, JoinHandle<()>) {
        let (scheduler, handle, message_rx) = Self::new(config, engines);
        let task = tokio::spawn(scheduler.run(message_rx, shutdown));
        (handle, task)
    }

    /// Service loop. Exits when every handle is gone or on shutdown.
    pub async fn run(
        mut self,
        mut message_rx: mpsc::Receiver<SchedulerMessage>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(default_priority = %self.default_priority, "Scheduler service started");
        loop {
            tokio::select! {
                msg = message_rx.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => break,
                },
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, stopping scheduler service");
                    break;
                }
            }
        }
        let stats = self.graph.stats();
        tracing::info!(jobs = stats.jobs, sessions = stats.sessions, "Scheduler service stopped");
    }

    fn handle_message(&mut self, msg: SchedulerMessage) {
        // A caller that stopped waiting just drops its reply.
        match msg {
            SchedulerMessage::OpenSession {
                priority,
                readable,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.open_session(priority, readable));
            }
            SchedulerMessage::Admit {
                session,
                kind,
                id,
                payload,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.admit(session, kind, id, payload));
            }
            SchedulerMessage::Interlock {
                to_session,
                from_session,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.interlock(to_session, from_session));
            }
            SchedulerMessage::Flush {
                session,
                wait,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.flush(session, wait));
            }
            SchedulerMessage::CancelWait { wait, response_tx } => {
                let _ = response_tx.send(self.graph.cancel_wait(wait));
            }
            SchedulerMessage::PopCompleted {
                session,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.pop_next_completed(session));
            }
            SchedulerMessage::Complete {
                job,
                status,
                output,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.complete(job, status, output));
            }
            SchedulerMessage::Close {
                session,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.close_session(session));
            }
            SchedulerMessage::Snapshot {
                session,
                response_tx,
            } => {
                let _ = response_tx.send(self.graph.snapshot(session));
            }
            SchedulerMessage::Stats { response_tx } => {
                let _ = response_tx.send(self.graph.stats());
            }
        }
    }
}

/// Cloneable entry point to the service task.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    message_tx: mpsc::Sender<SchedulerMessage>,
    events: broadcast::Sender<SchedulerEvent>,
    default_priority: Priority,
}

impl SchedulerHandle {
    /// Send a request and wait for the service task to finish it.
    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SchedulerMessage) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.message_tx
            .send(build(response_tx))
            .await
            .map_err(|_| SchedError::Unavailable)?;
        response_rx.await.map_err(|_| SchedError::Unavailable)
    }

    pub fn default_priority(&self) -> Priority {
        self.default_priority
    }

    /// Observe admissions and completions from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.events.subscribe()
    }

    pub async fn open_session(
        &self,
        priority: Priority,
        readable: bool,
    ) -> Result<(SessionId, watch::Receiver<Readiness>)> {
        self.call(|response_tx| SchedulerMessage::OpenSession {
            priority,
            readable,
            response_tx,
        })
        .await?
    }

    pub async fn admit(
        &self,
        session: SessionId,
        kind: JobKind,
        id: u32,
        payload: Vec<u8>,
    ) -> Result<JobRef> {
        self.call(|response_tx| SchedulerMessage::Admit {
            session,
            kind,
            id,
            payload,
            response_tx,
        })
        .await?
    }

    pub async fn interlock(&self, to_session: SessionId, from_session: SessionId) -> Result<()> {
        self.call(|response_tx| SchedulerMessage::Interlock {
            to_session,
            from_session,
            response_tx,
        })
        .await?
    }

    /// Queue `wait` behind the work pending in `session`. Returns the final
    /// status straight away if the session is already gone.
    async fn attach_wait(&self, session: SessionId, wait: StatusWait) -> Result<Option<JobStatus>> {
        match self
            .call(|response_tx| SchedulerMessage::Flush {
                session,
                wait,
                response_tx,
            })
            .await?
        {
            Ok(_) => Ok(None),
            Err(SchedError::SessionClosed(_)) => Ok(Some(JobStatus::Aborted)),
            Err(e) => Err(e),
        }
    }

    /// Block until everything currently pending in `session` has drained.
    /// Returns `Aborted` if the session is torn down first.
    ///
    /// Dropping the returned future detaches the wait entry.
    pub async fn await_status(&self, session: SessionId) -> Result<JobStatus> {
        let (wait, status_rx) = StatusWait::new();
        let guard = WaitGuard::new(self.message_tx.clone(), wait.id);
        if let Some(status) = self.attach_wait(session, wait).await? {
            guard.disarm();
            return Ok(status);
        }
        let status = status_rx.await.unwrap_or(JobStatus::Aborted);
        guard.disarm();
        Ok(status)
    }

    /// Like [`await_status`](Self::await_status) but gives up after
    /// `limit`, detaching the wait entry so it does not outlive the caller.
    pub async fn await_status_timeout(
        &self,
        session: SessionId,
        limit: Duration,
    ) -> Result<JobStatus> {
        let (wait, mut status_rx) = StatusWait::new();
        let wait_id = wait.id;
        let guard = WaitGuard::new(self.message_tx.clone(), wait_id);
        if let Some(status) = self.attach_wait(session, wait).await? {
            guard.disarm();
            return Ok(status);
        }

        let result = match tokio::time::timeout(limit, &mut status_rx).await {
            Ok(status) => Ok(status.unwrap_or(JobStatus::Aborted)),
            Err(_) => {
                let removed = self
                    .call(|response_tx| SchedulerMessage::CancelWait {
                        wait: wait_id,
                        response_tx,
                    })
                    .await?;
                if removed {
                    Err(SchedError::DeadlineExceeded)
                } else {
                    // Delivered between the timeout and the cancel.
                    status_rx.try_recv().map_err(|_| SchedError::DeadlineExceeded)
                }
            }
        };
        guard.disarm();
        result
    }

    pub async fn pop_next_completed(&self, session: SessionId) -> Result<Option<CompletedJob>> {
        self.call(|response_tx| SchedulerMessage::PopCompleted {
            session,
            response_tx,
        })
        .await?
    }

    /// Report an engine-side completion.
    pub async fn complete(
        &self,
        job: JobRef,
        status: JobStatus,
        output: Option<Vec<u8>>,
    ) -> Result<()> {
        self.call(|response_tx| SchedulerMessage::Complete {
            job,
            status,
            output,
            response_tx,
        })
        .await?
    }

    pub async fn close_session(&self, session: SessionId) -> Result<CloseSummary> {
        self.call(|response_tx| SchedulerMessage::Close {
            session,
            response_tx,
        })
        .await?
    }

    pub async fn snapshot(&self, session: SessionId) -> Result<SessionSnapshot> {
        self.call(|response_tx| SchedulerMessage::Snapshot {
            session,
            response_tx,
        })
        .await?
    }

    pub async fn stats(&self) -> Result<RegistryStats> {
        self.call(|response_tx| SchedulerMessage::Stats { response_tx })
            .await
    }
}

/// Detaches a status wait when its caller stops waiting early.
///
/// Drop cannot await, so the cancel request is queued without blocking and
/// handed to a task only when the channel is full.
struct WaitGuard {
    message_tx: mpsc::Sender<SchedulerMessage>,
    wait: WaitId,
    armed: bool,
}

impl WaitGuard {
    fn new(message_tx: mpsc::Sender<SchedulerMessage>, wait: WaitId) -> Self {
        Self {
            message_tx,
            wait,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let (response_tx, _) = oneshot::channel();
        let msg = SchedulerMessage::CancelWait {
            wait: self.wait,
            response_tx,
        };
        match self.message_tx.try_send(msg) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(msg)) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let message_tx = self.message_tx.clone();
                    runtime.spawn(async move {
                        let _ = message_tx.send(msg).await;
                    });
                }
                Err(_) => {
                    tracing::warn!(wait = self.wait.0, "Could not detach abandoned status wait");
                }
            },
        }
    }
}
