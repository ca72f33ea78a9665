//! Tests for the quota governor

use std::sync::Arc;

use autoblog_engine::core::{QuotaGovernor, QuotaLimits};
use autoblog_engine::util::{ResourceKind, TenantId};
use futures::future::join_all;

fn limited(generation: u64) -> Arc<QuotaGovernor> {
    Arc::new(QuotaGovernor::new(QuotaLimits {
        generation_units: Some(generation),
        publish_actions: Some(5),
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reservations_never_exceed_limit() {
    let quota = limited(100);
    let tenant = TenantId::new();

    let tasks = (0..50).map(|_| {
        let quota = Arc::clone(&quota);
        tokio::spawn(async move {
            quota
                .reserve(tenant, ResourceKind::GenerationUnits, 10)
                .ok()
        })
    });
    let grants: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.expect("task completes"))
        .collect();

    let granted: Vec<_> = grants.into_iter().flatten().collect();
    assert_eq!(granted.len(), 10);
    for grant in granted {
        quota.commit(grant);
    }
    assert_eq!(quota.used(tenant, ResourceKind::GenerationUnits), 100);
    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 1)
        .is_err());
}

#[test]
fn test_usage_reports_reserved_and_used() {
    let quota = limited(1_000);
    let tenant = TenantId::new();

    let committed = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 300)
        .unwrap();
    quota.commit_partial(committed, 120);
    let _live = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 200)
        .unwrap();

    let usage = quota.usage(tenant);
    let generation = usage
        .iter()
        .find(|u| u.kind == ResourceKind::GenerationUnits)
        .unwrap();
    assert_eq!(generation.used, 120);
    assert_eq!(generation.reserved, 200);
    assert_eq!(generation.limit, Some(1_000));
}

#[test]
fn test_partial_commit_is_clamped_to_reservation() {
    let quota = limited(1_000);
    let tenant = TenantId::new();

    let grant = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 100)
        .unwrap();
    quota.commit_partial(grant, 5_000);

    assert_eq!(quota.used(tenant, ResourceKind::GenerationUnits), 100);
}

#[test]
fn test_release_restores_headroom() {
    let quota = limited(100);
    let tenant = TenantId::new();

    let grant = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 100)
        .unwrap();
    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 1)
        .is_err());
    quota.release(grant);

    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 100)
        .is_ok());
    assert_eq!(quota.used(tenant, ResourceKind::GenerationUnits), 0);
}

#[test]
fn test_reset_period_keeps_live_reservations() {
    let quota = limited(100);
    let tenant = TenantId::new();

    let spent = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 60)
        .unwrap();
    quota.commit(spent);
    let live = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 40)
        .unwrap();

    quota.reset_period(tenant);

    assert_eq!(quota.used(tenant, ResourceKind::GenerationUnits), 0);
    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 61)
        .is_err());
    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 60)
        .is_ok());
    drop(live);
}

#[test]
fn test_tenants_are_isolated() {
    let quota = limited(10);
    let a = TenantId::new();
    let b = TenantId::new();

    let _grant = quota.reserve(a, ResourceKind::PublishActions, 5).unwrap();
    assert!(quota.reserve(a, ResourceKind::PublishActions, 1).is_err());
    assert!(quota.reserve(b, ResourceKind::PublishActions, 5).is_ok());
}

#[test]
fn test_limits_can_be_lifted() {
    let quota = limited(10);
    let tenant = TenantId::new();
    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 50)
        .is_err());

    quota.set_limits(tenant, QuotaLimits::default());

    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 50)
        .is_ok());
}

#[test]
fn test_reservation_up_to_the_limit_is_granted() {
    let quota = limited(1_000);
    let tenant = TenantId::new();
    quota.seed_usage(tenant, ResourceKind::GenerationUnits, 700);

    assert!(quota
        .reserve(tenant, ResourceKind::GenerationUnits, 301)
        .is_err());
    let exact = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 300)
        .unwrap();
    let denied = quota
        .reserve(tenant, ResourceKind::GenerationUnits, 1)
        .unwrap_err();
    assert_eq!(denied.limit, 1_000);
    assert_eq!(denied.outstanding, 1_000);

    quota.commit(exact);
    assert_eq!(quota.used(tenant, ResourceKind::GenerationUnits), 1_000);
}
