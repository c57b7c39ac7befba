use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::scheduler::job::JobStatus;

static NEXT_WAIT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(pub u64);

/// A caller blocked on a placeholder's terminal status.
///
/// Lives on the placeholder's wait list until the placeholder resolves or
/// the caller cancels the wait.
#[derive(Debug)]
pub struct StatusWait {
    pub id: WaitId,
    tx: oneshot::Sender<JobStatus>,
}

impl StatusWait {
    /// Create a wait entry and the receiver its owner blocks on.
    pub fn new() -> (Self, oneshot::Receiver<JobStatus>) {
        let (tx, rx) = oneshot::channel();
        let id = WaitId(NEXT_WAIT_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, tx }, rx)
    }

    /// Deliver the status. A caller that already gave up is ignored.
    pub fn resolve(self, status: JobStatus) {
        if self.tx.send(status).is_err() {
            tracing::debug!(wait = self.id.0, "Status waiter already gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_status() {
        let (wait, rx) = StatusWait::new();
        wait.resolve(JobStatus::Complete);
        assert_eq!(rx.await.unwrap(), JobStatus::Complete);
    }

    #[test]
    fn test_resolve_after_receiver_dropped_is_harmless() {
        let (wait, rx) = StatusWait::new();
        drop(rx);
        wait.resolve(JobStatus::Aborted);
    }

    #[test]
    fn test_wait_ids_are_unique() {
        let (a, _ra) = StatusWait::new();
        let (b, _rb) = StatusWait::new();
        assert_ne!(a.id, b.id);
    }
}
