//! Simulated engines for running the scheduler without hardware.
//!
//! - [`EngineWorker`]: an [`EngineRouter`](crate::engine::EngineRouter) for
//!   one engine class, with a priority-ordered wait queue and a fixed number
//!   of execution lanes
//! - [`JobHandler`]: what a lane does with a payload
//!   ([`EchoHandler`] hands it back unchanged)
//!
//! # Execution Flow
//!
//! 1. The scheduler forwards a job; [`EngineWorker`] queues it by priority
//! 2. A lane takes the next job and waits a random latency
//! 3. The handler produces a status and output buffer
//! 4. The lane reports the outcome through
//!    [`SchedulerHandle::complete`](crate::service::SchedulerHandle::complete)
//!
//! Jobs aborted by session teardown while running have their result dropped.

pub mod executor;

pub use executor::{EchoHandler, EngineWorker, ExecutionResult, JobHandler};
