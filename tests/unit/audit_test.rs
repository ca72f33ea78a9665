//! Tests for the job audit trail

use autoblog_engine::core::{
    AuditEvent, AuditSink, InMemoryAuditSink, Job, JobAction, JobKind, NewJob,
};
use autoblog_engine::util::TenantId;
use chrono::Utc;
use serde_json::json;

fn job(kind: JobKind, tenant: TenantId) -> Job {
    NewJob::new(kind, json!({}))
        .with_tenant(tenant)
        .into_job(Utc::now())
}

#[test]
fn test_event_carries_job_identity() {
    let tenant = TenantId::new();
    let publish = job(JobKind::Publish, tenant);
    let at = Utc::now();

    let event = AuditEvent::new(&publish, JobAction::DeadLettered, at)
        .with_detail("AdapterTransientError: 503");

    assert_eq!(event.job_id, publish.id);
    assert_eq!(event.kind, JobKind::Publish);
    assert_eq!(event.queue, "publishing");
    assert_eq!(event.tenant, Some(tenant));
    assert_eq!(event.attempt, 0);
    assert_eq!(event.at, at);
    assert_eq!(event.detail.as_deref(), Some("AdapterTransientError: 503"));
}

#[test]
fn test_audit_sink_overflow() {
    let tenant = TenantId::new();
    let mut sink = InMemoryAuditSink::new(2);
    let jobs: Vec<Job> = (0..3).map(|_| job(JobKind::Generate, tenant)).collect();
    for j in &jobs {
        sink.record(AuditEvent::new(j, JobAction::Enqueued, Utc::now()));
    }

    let events = sink.events();
    assert_eq!(events.len(), 2);
    // oldest evicted
    assert_eq!(events[0].job_id, jobs[1].id);
    assert_eq!(events[1].job_id, jobs[2].id);
}

#[test]
fn test_zero_capacity_records_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(AuditEvent::new(
        &job(JobKind::Maintenance, TenantId::new()),
        JobAction::Enqueued,
        Utc::now(),
    ));
    assert!(sink.events().is_empty());
}

#[test]
fn test_events_for_filters_by_job_and_tenant() {
    let (acme, globex) = (TenantId::new(), TenantId::new());
    let first = job(JobKind::Publish, acme);
    let second = job(JobKind::Generate, globex);
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(AuditEvent::new(&first, JobAction::Started, Utc::now()));
    sink.record(AuditEvent::new(&second, JobAction::Started, Utc::now()));
    sink.record(AuditEvent::new(&first, JobAction::Completed, Utc::now()));

    let actions: Vec<JobAction> = sink.events_for(first.id).into_iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![JobAction::Started, JobAction::Completed]);

    let theirs = sink.events_for_tenant(globex);
    assert_eq!(theirs.len(), 1);
    assert_eq!(theirs[0].kind, JobKind::Generate);
}

#[test]
fn test_action_serializes_snake_case() {
    let value = serde_json::to_value(JobAction::FollowUpEnqueued).unwrap();
    assert_eq!(value, json!("follow_up_enqueued"));
}
