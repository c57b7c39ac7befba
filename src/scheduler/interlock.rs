//! Cross-session ordering.
//!
//! An interlock edge joins two placeholders: `from`, queued at the tail of
//! the session whose current work must drain first, and `to`, queued at the
//! tail of the waiting session. While `to` has a predecessor its session's
//! `interlock_count` is non-zero and newly admitted jobs are held. When the
//! jobs ahead of `from` complete, `from` becomes an unblocked head and is
//! resolved, which resolves `to` and releases the held work.

use crate::error::{Result, SchedError};
use crate::scheduler::graph::Graph;
use crate::scheduler::job::{JobRef, JobStatus};
use crate::scheduler::session::{Priority, SessionId};
use crate::scheduler::wait::{StatusWait, WaitId};

enum Step {
    Resolve(JobRef),
    Advance(SessionId),
    Wake(Vec<StatusWait>, JobStatus),
}

impl Graph {
    /// Order all work admitted to `to_session` from now on after everything
    /// currently pending in `from_session`.
    pub fn interlock(&mut self, to_session: SessionId, from_session: SessionId) -> Result<()> {
        if to_session == from_session {
            return Err(SchedError::InvalidInterlock(format!(
                "session {} cannot wait on itself",
                to_session
            )));
        }
        // Make sure both sessions are live before allocating anything.
        self.registry.session(to_session)?;
        self.registry.session(from_session)?;

        let from = self.registry.create_job(from_session)?;
        let to = match self.registry.create_job(to_session) {
            Ok(to) => to,
            Err(e) => {
                self.registry.take_job(from);
                return Err(e);
            }
        };
        self.request_interlock(Some(from), to, None);
        Ok(())
    }

    /// Queue a placeholder behind everything pending in `session` and attach
    /// `wait` to it. The wait resolves once all that work has drained.
    pub fn flush(&mut self, session: SessionId, wait: StatusWait) -> Result<JobRef> {
        let to = self.registry.create_job(session)?;
        self.request_interlock(None, to, Some(wait));
        Ok(to)
    }

    /// Link `from` -> `to`, queue both placeholders and resolve whichever
    /// is already at the head of an otherwise empty queue.
    pub(crate) fn request_interlock(
        &mut self,
        from: Option<JobRef>,
        to: JobRef,
        wait: Option<StatusWait>,
    ) {
        let Some(to_job) = self.registry.job_mut(to) else {
            return;
        };
        if let Some(wait) = wait {
            to_job.waiters.push(wait);
        }
        let to_session = to_job.session;

        let mut from_session = None;
        if let Some(from) = from {
            debug_assert!(from < to, "predecessor must be allocated first");
            let Some((from_job, sess)) = self.registry.job_and_session_mut(from) else {
                return;
            };
            from_job.status = JobStatus::Ready;
            from_job.successor = Some(to);
            sess.pending.push_back(from);
            from_session = Some(from_job.session);

            if let Some(to_job) = self.registry.job_mut(to) {
                to_job.predecessor = Some(from);
            }
            let priority = match self.registry.session_mut(to_session) {
                Ok(sess) => {
                    sess.interlock_count += 1;
                    sess.priority
                }
                Err(_) => return,
            };
            tracing::debug!(from = %from, to = %to, session = %to_session, "Interlock linked");
            self.propagate_priority(from, priority);
        }

        let Some((to_job, sess)) = self.registry.job_and_session_mut(to) else {
            return;
        };
        to_job.status = JobStatus::Ready;
        sess.pending.push_back(to);
        let to_alone = sess.pending.len() == 1;

        match (from, from_session) {
            (None, _) if to_alone => self.resolve_interlock(to),
            (Some(from), Some(sid)) => {
                let from_alone = self
                    .registry
                    .session(sid)
                    .map(|s| s.pending.len() == 1)
                    .unwrap_or(false);
                if from_alone {
                    self.resolve_interlock(from);
                }
            }
            _ => {}
        }
    }

    /// Raise the precedence of every session whose pending work `start`
    /// waits behind. Walks predecessor edges and stops at sessions that
    /// already dominate `priority`.
    ///
    /// Only the part of a session's queue up to and including the reached
    /// node is visited. Work queued behind it does not block the waiter.
    pub(crate) fn propagate_priority(&mut self, start: JobRef, priority: Priority) {
        let mut worklist = vec![start];
        while let Some(node) = worklist.pop() {
            let Some(session_id) = self.registry.job(node).map(|j| j.session) else {
                continue;
            };
            let Ok(sess) = self.registry.session_mut(session_id) else {
                continue;
            };
            if sess.priority.dominates(priority) {
                continue;
            }
            tracing::debug!(
                session = %session_id,
                from = %sess.priority,
                to = %priority,
                "Raising session priority"
            );
            sess.priority = priority;

            let mut ahead = Vec::new();
            for &job_ref in &sess.pending {
                ahead.push(job_ref);
                if job_ref == node {
                    break;
                }
            }
            for job_ref in ahead {
                let Some(job) = self.registry.job(job_ref) else {
                    continue;
                };
                if job.is_placeholder() {
                    if let Some(pred) = job.predecessor {
                        worklist.push(pred);
                    }
                } else if job.forwarded {
                    self.engines.reorder(job.engine_class(), job_ref, priority);
                }
            }
        }
    }

    /// Resolve a placeholder and everything its resolution unblocks.
    ///
    /// Successors are resolved before the placeholder's own session advances,
    /// and its waiters are woken last. The whole cascade runs off an explicit
    /// stack so chain length does not affect stack depth.
    pub(crate) fn resolve_interlock(&mut self, placeholder: JobRef) {
        let mut work = vec![Step::Resolve(placeholder)];
        while let Some(step) = work.pop() {
            match step {
                Step::Resolve(job_ref) => {
                    let Some(mut job) = self.registry.take_job(job_ref) else {
                        continue;
                    };
                    debug_assert!(job.is_placeholder());
                    let status = match self.registry.session_mut(job.session) {
                        Ok(sess) => {
                            sess.remove_pending(job_ref);
                            if job.predecessor.is_some() {
                                debug_assert!(sess.interlock_count > 0);
                                sess.interlock_count = sess.interlock_count.saturating_sub(1);
                            }
                            if sess.closing {
                                JobStatus::Aborted
                            } else {
                                JobStatus::Complete
                            }
                        }
                        Err(_) => JobStatus::Aborted,
                    };
                    if let Some(pred) = job.predecessor.take() {
                        if let Some(pred_job) = self.registry.job_mut(pred) {
                            pred_job.successor = None;
                        }
                    }

                    job.status = status;
                    tracing::debug!(job = %job_ref, session = %job.session, status = %status, "Interlock resolved");
                    if !job.waiters.is_empty() {
                        work.push(Step::Wake(std::mem::take(&mut job.waiters), status));
                    }
                    work.push(Step::Advance(job.session));
                    if let Some(succ) = job.successor.take() {
                        work.push(Step::Resolve(succ));
                    }
                }
                Step::Advance(session_id) => {
                    let Ok(sess) = self.registry.session(session_id) else {
                        continue;
                    };
                    // Teardown drains its own queue.
                    if sess.closing {
                        continue;
                    }
                    let Some(head) = sess.head().and_then(|h| self.registry.job(h)) else {
                        continue;
                    };
                    if head.is_placeholder() {
                        if head.predecessor.is_none() {
                            work.push(Step::Resolve(head.job_ref));
                        }
                        continue;
                    }
                    let runnable: Vec<JobRef> = sess
                        .pending
                        .iter()
                        .map_while(|&j| {
                            self.registry
                                .job(j)
                                .filter(|job| !job.is_placeholder())
                                .map(|_| j)
                        })
                        .collect();
                    for job_ref in runnable {
                        self.forward(job_ref);
                    }
                }
                Step::Wake(waiters, status) => {
                    for wait in waiters {
                        wait.resolve(status);
                    }
                }
            }
        }
    }

    /// Detach a wait entry whose caller gave up. Returns false if it was
    /// already delivered.
    pub fn cancel_wait(&mut self, wait: WaitId) -> bool {
        for job in self.registry.jobs_mut() {
            if let Some(pos) = job.waiters.iter().position(|w| w.id == wait) {
                job.waiters.remove(pos);
                tracing::debug!(job = %job.job_ref, wait = wait.0, "Status wait cancelled");
                return true;
            }
        }
        false
    }
}
