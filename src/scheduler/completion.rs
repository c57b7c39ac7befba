use chrono::Utc;
use serde::Serialize;

use crate::error::{Result, SchedError};
use crate::scheduler::events::SchedulerEvent;
use crate::scheduler::graph::Graph;
use crate::scheduler::job::{JobRef, JobStatus};
use crate::scheduler::session::SessionId;

/// What a session teardown released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CloseSummary {
    /// Forwarded jobs aborted at their engine.
    pub aborted: usize,
    /// Jobs still held behind an interlock, dropped without running.
    pub discarded: usize,
    /// Interlock placeholders unwound.
    pub placeholders: usize,
    /// Finished jobs that were never read.
    pub freed_completed: usize,
}

impl Graph {
    /// Completion cascade for a job an engine reports as finished.
    ///
    /// `output` replaces the payload when present; otherwise the submitted
    /// payload is handed back as is.
    pub fn complete(
        &mut self,
        job_ref: JobRef,
        status: JobStatus,
        output: Option<Vec<u8>>,
    ) -> Result<()> {
        match self.registry.job(job_ref) {
            Some(job) if job.forwarded && !job.is_placeholder() => {}
            _ => {
                tracing::warn!(job = %job_ref, status = %status, "Completion for unknown job ignored");
                return Err(SchedError::JobNotFound(job_ref));
            }
        }
        self.finish(job_ref, status, output);
        Ok(())
    }

    /// Shared tail of engine completion and teardown abort.
    fn finish(&mut self, job_ref: JobRef, status: JobStatus, output: Option<Vec<u8>>) {
        let Some((job, sess)) = self.registry.job_and_session_mut(job_ref) else {
            return;
        };
        sess.remove_pending(job_ref);
        job.status = status;
        job.completed_at = Some(Utc::now());
        if let Some(output) = output {
            job.size = output.len();
            job.payload = output;
        }
        let class = job.engine_class();
        let session_id = sess.id;
        let retain = sess.readable && !sess.closing;
        if retain {
            sess.push_completed(job_ref);
        }

        self.engines.release(class, job_ref);
        self.emit(SchedulerEvent::JobCompleted { class, status });
        tracing::debug!(job = %job_ref, session = %session_id, status = %status, retained = retain, "Job finished");

        if !retain {
            self.registry.take_job(job_ref);
        }
        self.resolve_unblocked_head(session_id);
    }

    /// A placeholder that reached the head with nothing ahead of it in
    /// another session is done waiting.
    fn resolve_unblocked_head(&mut self, session: SessionId) {
        let head = self
            .registry
            .session(session)
            .ok()
            .filter(|s| !s.closing)
            .and_then(|s| s.head())
            .and_then(|h| self.registry.job(h))
            .filter(|job| job.is_unblocked_placeholder())
            .map(|job| job.job_ref);
        if let Some(head) = head {
            self.resolve_interlock(head);
        }
    }

    /// Tear a session down: abort or discard pending work, unwind its
    /// placeholders, release waiters and free unread results.
    pub fn close_session(&mut self, session: SessionId) -> Result<CloseSummary> {
        let sess = self.registry.session_mut(session)?;
        sess.closing = true;
        sess.publish_readiness();

        let mut summary = CloseSummary::default();
        while let Some(head) = self.registry.session(session)?.head() {
            let (class, placeholder, forwarded) = match self.registry.job(head) {
                Some(job) => (job.engine_class(), job.is_placeholder(), job.forwarded),
                None => {
                    self.registry.session_mut(session)?.remove_pending(head);
                    continue;
                }
            };
            if placeholder {
                summary.placeholders += 1;
                self.resolve_interlock(head);
            } else if forwarded {
                summary.aborted += 1;
                let returned = self.engines.abort(class, head);
                self.finish(head, JobStatus::Aborted, returned);
                self.emit(SchedulerEvent::JobRemoved { class });
            } else {
                summary.discarded += 1;
                self.registry.session_mut(session)?.remove_pending(head);
                self.registry.take_job(head);
                self.emit(SchedulerEvent::JobRemoved { class });
            }
        }

        let sess = self.registry.session_mut(session)?;
        let unread: Vec<JobRef> = sess.completed.drain(..).collect();
        sess.publish_readiness();
        summary.freed_completed = unread.len();
        for job_ref in unread {
            self.registry.take_job(job_ref);
        }
        self.registry.remove_session(session);

        tracing::info!(
            session = %session,
            aborted = summary.aborted,
            discarded = summary.discarded,
            placeholders = summary.placeholders,
            freed_completed = summary.freed_completed,
            "Session closed"
        );
        Ok(summary)
    }
}
