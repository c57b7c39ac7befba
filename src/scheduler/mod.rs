pub mod completion;
pub mod events;
pub mod graph;
pub mod interlock;
pub mod job;
pub mod registry;
pub mod session;
pub mod wait;

pub use completion::CloseSummary;
pub use events::SchedulerEvent;
pub use graph::{Graph, JobSnapshot, SessionSnapshot};
pub use job::{CompletedJob, Job, JobKind, JobRef, JobStatus};
pub use registry::{Registry, RegistryStats};
pub use session::{Priority, Readiness, Session, SessionId};
pub use wait::{StatusWait, WaitId};
