use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::scheduler::job::JobRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority. Lower values take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGHEST: Priority = Priority(0);
    pub const NORMAL: Priority = Priority(120);
    pub const LOWEST: Priority = Priority(139);

    /// True if `self` takes precedence over `other` or matches it.
    pub fn dominates(self, other: Priority) -> bool {
        self.0 <= other.0
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a reader polling the session can expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Number of completed jobs waiting to be read.
    Pending(usize),
    /// The session has been torn down.
    Closed,
}

impl Readiness {
    pub fn is_readable(self) -> bool {
        matches!(self, Readiness::Pending(n) if n > 0)
    }
}

/// A client's queue context.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub pending: VecDeque<JobRef>,
    pub completed: VecDeque<JobRef>,
    pub priority: Priority,
    pub interlock_count: usize,
    pub readable: bool,
    pub closing: bool,
    readiness: watch::Sender<Readiness>,
}

impl Session {
    pub fn new(id: SessionId, priority: Priority, readable: bool) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending(0));
        Self {
            id,
            pending: VecDeque::new(),
            completed: VecDeque::new(),
            priority,
            interlock_count: 0,
            readable,
            closing: false,
            readiness,
        }
    }

    pub fn subscribe_readiness(&self) -> watch::Receiver<Readiness> {
        self.readiness.subscribe()
    }

    pub fn head(&self) -> Option<JobRef> {
        self.pending.front().copied()
    }

    /// Remove a job from the pending queue wherever it sits.
    pub fn remove_pending(&mut self, job: JobRef) -> bool {
        match self.pending.iter().position(|&j| j == job) {
            Some(pos) => {
                self.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn push_completed(&mut self, job: JobRef) {
        self.completed.push_back(job);
        self.publish_readiness();
    }

    pub fn pop_completed(&mut self) -> Option<JobRef> {
        let job = self.completed.pop_front();
        self.publish_readiness();
        job
    }

    pub(crate) fn publish_readiness(&self) {
        let state = if self.closing {
            Readiness::Closed
        } else {
            Readiness::Pending(self.completed.len())
        };
        self.readiness.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority(2).dominates(Priority(10)));
        assert!(Priority(2).dominates(Priority(2)));
        assert!(!Priority(10).dominates(Priority(2)));
        assert!(Priority::HIGHEST < Priority::NORMAL);
    }

    #[test]
    fn test_remove_pending_from_middle() {
        let mut session = Session::new(SessionId::new(), Priority::NORMAL, true);
        session.pending.extend([JobRef(1), JobRef(2), JobRef(3)]);
        assert!(session.remove_pending(JobRef(2)));
        assert!(!session.remove_pending(JobRef(2)));
        assert_eq!(session.pending, [JobRef(1), JobRef(3)]);
        assert_eq!(session.head(), Some(JobRef(1)));
    }

    #[test]
    fn test_readiness_tracks_completed_queue() {
        let mut session = Session::new(SessionId::new(), Priority::NORMAL, true);
        let rx = session.subscribe_readiness();
        assert!(!rx.borrow().is_readable());

        session.push_completed(JobRef(4));
        assert_eq!(*rx.borrow(), Readiness::Pending(1));

        assert_eq!(session.pop_completed(), Some(JobRef(4)));
        assert_eq!(*rx.borrow(), Readiness::Pending(0));

        session.closing = true;
        session.publish_readiness();
        assert_eq!(*rx.borrow(), Readiness::Closed);
    }
}
