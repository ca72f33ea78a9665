//! Job lifecycle trail.
//!
//! The dispatcher and the workers record one event per transition. Operators
//! read it back per job (why did this article never go out?) or per tenant.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::job::{Job, JobKind};
use crate::util::{JobId, TenantId};

/// Lifecycle transition recorded in the trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    /// Accepted by the dispatcher.
    Enqueued,
    /// Created by a running job (auto-publish, source fan-out).
    FollowUpEnqueued,
    /// An attempt was claimed.
    Started,
    /// Finished successfully.
    Completed,
    /// Terminated by a business rule.
    Rejected,
    /// Stopped on operator request.
    Cancelled,
    /// Failed; another attempt is scheduled.
    Retried,
    /// Retry budget exhausted or permanent failure.
    DeadLettered,
    /// Put back on its queue by an operator.
    Requeued,
}

/// One recorded transition of a content job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Job the event belongs to.
    pub job_id: JobId,
    /// Kind of content work.
    pub kind: JobKind,
    /// Queue the job lives on.
    pub queue: String,
    /// Owning tenant, when known.
    pub tenant: Option<TenantId>,
    /// Transition.
    pub action: JobAction,
    /// Attempt the transition belongs to; 0 before the first claim.
    pub attempt: u32,
    /// Engine-clock time of the transition.
    pub at: DateTime<Utc>,
    /// Failure or rejection reason.
    pub detail: Option<String>,
}

impl AuditEvent {
    /// Event for `job` at `at`.
    pub fn new(job: &Job, action: JobAction, at: DateTime<Utc>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            job_id: job.id,
            kind: job.kind,
            queue: job.queue.clone(),
            tenant: job.tenant,
            action,
            attempt: job.attempts,
            at,
            detail: None,
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination of audit events.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Bounded in-memory trail; the oldest events are evicted first.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Trail holding at most `max_events`.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(4096)),
            max_events,
        }
    }

    /// Snapshot of stored events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }

    /// Events recorded for one job, oldest first.
    pub fn events_for(&self, job_id: JobId) -> Vec<AuditEvent> {
        self.filtered(|e| e.job_id == job_id)
    }

    /// Events recorded for one tenant's jobs, oldest first.
    pub fn events_for_tenant(&self, tenant: TenantId) -> Vec<AuditEvent> {
        self.filtered(|e| e.tenant == Some(tenant))
    }

    fn filtered(&self, keep: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        self.events.iter().filter(|e| keep(e)).cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}
