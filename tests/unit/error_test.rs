//! Tests for error types

use autoblog_engine::core::{AdapterError, GenerationError, QuotaGovernor, QuotaLimits};
use autoblog_engine::util::{ResourceKind, TenantId};
use autoblog_engine::{EngineError, FailureClass};

#[test]
fn test_quota_exceeded_error() {
    let err = EngineError::QuotaExceeded("tenant over budget".to_string());
    assert_eq!(format!("{}", err), "QuotaExceeded: tenant over budget");
    assert!(err.is_rejection());
}

#[test]
fn test_adapter_errors_map_by_class() {
    let transient: EngineError = AdapterError::Transient("502 bad gateway".into()).into();
    let permanent: EngineError = AdapterError::Permanent("403 forbidden".into()).into();
    let config: EngineError = AdapterError::InvalidConfig("feed_url missing".into()).into();

    assert_eq!(transient.classification(), FailureClass::Transient);
    assert_eq!(permanent.classification(), FailureClass::Permanent);
    assert_eq!(format!("{}", config), "InvalidAdapterConfig: feed_url missing");
    assert_eq!(config.classification(), FailureClass::Permanent);
}

#[test]
fn test_generation_error_keeps_retry_hint() {
    let err: EngineError = GenerationError::retryable("rate limited").into();
    assert_eq!(format!("{}", err), "GenerationServiceError: rate limited");
    assert_eq!(err.classification(), FailureClass::Transient);

    let err: EngineError = GenerationError::fatal("content policy").into();
    assert_eq!(err.classification(), FailureClass::Permanent);
}

#[test]
fn test_denied_reservation_becomes_quota_exceeded() {
    let quota = QuotaGovernor::new(QuotaLimits {
        generation_units: Some(10),
        publish_actions: None,
    });
    let denied = quota
        .reserve(TenantId::new(), ResourceKind::GenerationUnits, 11)
        .unwrap_err();
    let err: EngineError = denied.into();
    assert!(err.to_string().starts_with("QuotaExceeded"));
    assert_eq!(err.kind_name(), "QuotaExceeded");
}

#[test]
fn test_time_limit_and_panic_are_transient() {
    assert_eq!(
        EngineError::TimeLimitExceeded("hard limit".into()).classification(),
        FailureClass::Transient
    );
    assert_eq!(
        EngineError::Panic("boom".into()).classification(),
        FailureClass::Transient
    );
    assert_eq!(
        EngineError::Cancelled("operator".into()).classification(),
        FailureClass::Permanent
    );
}
