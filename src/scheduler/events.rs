use serde::Serialize;

use crate::engine::EngineClass;
use crate::scheduler::job::JobStatus;

/// Notifications for observers such as frequency scaling or profiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerEvent {
    /// A real job was admitted for the class.
    JobAdded { class: EngineClass },
    /// An engine reported a job finished.
    JobCompleted { class: EngineClass, status: JobStatus },
    /// A job was dropped during session teardown.
    JobRemoved { class: EngineClass },
}
