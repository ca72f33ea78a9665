//! Tests for utility functions

use autoblog_engine::util::{Clock, JobId, ManualClock, Priority, ResourceKind, TenantId};
use chrono::{Duration, TimeZone, Utc};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_resource_kind_names() {
    assert_eq!(ResourceKind::GenerationUnits.to_string(), "generation_units");
    assert_eq!(ResourceKind::PublishActions.as_str(), "publish_actions");
}

#[test]
fn test_ids_serialize_as_plain_uuid() {
    let id = JobId::new();
    let json = serde_json::to_value(id).unwrap();
    assert_eq!(json, serde_json::Value::String(id.to_string()));
    let back: JobId = serde_json::from_value(json).unwrap();
    assert_eq!(back, id);
    assert_ne!(TenantId::new(), TenantId::new());
}

#[test]
fn test_manual_clock() {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let clock = ManualClock::new(start);
    assert_eq!(clock.now(), start);
    clock.advance(Duration::hours(25));
    assert_eq!(clock.now(), start + Duration::hours(25));
    clock.set(start);
    assert_eq!(clock.now(), start);
}
