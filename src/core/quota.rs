//! Per-tenant quota governor.
//!
//! Each tenant/resource pair keeps two atomics: `outstanding` (committed usage
//! plus live reservations) and `used` (committed only). `reserve` is a
//! compare-and-swap loop on `outstanding` against the limit, so concurrent
//! reservations can never overshoot it and committed usage never exceeds it.
//!
//! A [`Grant`] is a move-only token. [`QuotaGovernor::commit`] and
//! [`QuotaGovernor::release`] consume it; a grant dropped without either (an
//! aborted job, a hard time limit) is released automatically.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::QuotaConfig;
use crate::core::error::EngineError;
use crate::util::{ResourceKind, TenantId};

const UNLIMITED: u64 = u64::MAX;

#[derive(Debug)]
struct Counter {
    limit: AtomicU64,
    outstanding: AtomicU64,
    used: AtomicU64,
}

impl Counter {
    fn new(limit: Option<u64>) -> Self {
        Self {
            limit: AtomicU64::new(limit.unwrap_or(UNLIMITED)),
            outstanding: AtomicU64::new(0),
            used: AtomicU64::new(0),
        }
    }

    fn try_reserve(&self, amount: u64) -> Result<(), u64> {
        let limit = self.limit.load(Ordering::Acquire);
        let mut current = self.outstanding.load(Ordering::Acquire);
        loop {
            let next = current.checked_add(amount).ok_or(current)?;
            if next > limit {
                return Err(current);
            }
            match self.outstanding.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, amount: u64) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(amount))
            });
    }

    fn commit(&self, amount: u64) {
        self.used.fetch_add(amount, Ordering::AcqRel);
    }
}

#[derive(Debug)]
struct TenantQuota {
    generation: Counter,
    publish: Counter,
}

impl TenantQuota {
    fn new(limits: QuotaLimits) -> Self {
        Self {
            generation: Counter::new(limits.generation_units),
            publish: Counter::new(limits.publish_actions),
        }
    }

    const fn counter(&self, kind: ResourceKind) -> &Counter {
        match kind {
            ResourceKind::GenerationUnits => &self.generation,
            ResourceKind::PublishActions => &self.publish,
        }
    }
}

/// Per-period limits; `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Generation units (tokens).
    pub generation_units: Option<u64>,
    /// Publish actions (posts).
    pub publish_actions: Option<u64>,
}

impl QuotaLimits {
    /// Limit for one kind.
    pub const fn get(&self, kind: ResourceKind) -> Option<u64> {
        match kind {
            ResourceKind::GenerationUnits => self.generation_units,
            ResourceKind::PublishActions => self.publish_actions,
        }
    }
}

impl From<&QuotaConfig> for QuotaLimits {
    fn from(cfg: &QuotaConfig) -> Self {
        Self {
            generation_units: cfg.default_generation_limit,
            publish_actions: cfg.default_publish_limit,
        }
    }
}

/// A provisional hold against a tenant's budget.
#[must_use = "a grant must be committed or released"]
pub struct Grant {
    tenant: TenantId,
    kind: ResourceKind,
    amount: u64,
    quota: Arc<TenantQuota>,
    settled: bool,
}

impl Grant {
    /// Tenant charged.
    pub const fn tenant(&self) -> TenantId {
        self.tenant
    }

    /// Resource reserved.
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Amount reserved.
    pub const fn amount(&self) -> u64 {
        self.amount
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant")
            .field("tenant", &self.tenant)
            .field("kind", &self.kind)
            .field("amount", &self.amount)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for Grant {
    fn drop(&mut self) {
        if !self.settled {
            self.quota.counter(self.kind).release(self.amount);
            debug!(tenant = %self.tenant, kind = %self.kind, amount = self.amount, "unsettled grant released on drop");
        }
    }
}

/// Why a reservation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denied {
    /// Tenant refused.
    pub tenant: TenantId,
    /// Resource refused.
    pub kind: ResourceKind,
    /// Amount asked for.
    pub requested: u64,
    /// Committed plus reserved at the time of refusal.
    pub outstanding: u64,
    /// Limit in force.
    pub limit: u64,
}

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} limit reached for tenant {}: requested {}, in use {}, limit {}",
            self.kind, self.tenant, self.requested, self.outstanding, self.limit
        )
    }
}

impl std::error::Error for Denied {}

impl From<Denied> for EngineError {
    fn from(d: Denied) -> Self {
        Self::QuotaExceeded(d.to_string())
    }
}

/// Usage snapshot for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Resource.
    pub kind: ResourceKind,
    /// Committed this period.
    pub used: u64,
    /// Held by live reservations.
    pub reserved: u64,
    /// Limit; `None` when unlimited.
    pub limit: Option<u64>,
}

/// Admission control for governed resources.
pub struct QuotaGovernor {
    tenants: RwLock<HashMap<TenantId, Arc<TenantQuota>>>,
    defaults: QuotaLimits,
}

impl QuotaGovernor {
    /// Governor applying `defaults` to tenants seen for the first time.
    pub fn new(defaults: QuotaLimits) -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
            defaults,
        }
    }

    fn tenant(&self, tenant: TenantId) -> Arc<TenantQuota> {
        if let Some(q) = self.tenants.read().get(&tenant) {
            return Arc::clone(q);
        }
        let mut tenants = self.tenants.write();
        Arc::clone(
            tenants
                .entry(tenant)
                .or_insert_with(|| Arc::new(TenantQuota::new(self.defaults))),
        )
    }

    /// Set a tenant's limits (creates the tenant if needed).
    pub fn set_limits(&self, tenant: TenantId, limits: QuotaLimits) {
        let quota = self.tenant(tenant);
        for kind in ResourceKind::ALL {
            quota
                .counter(kind)
                .limit
                .store(limits.get(kind).unwrap_or(UNLIMITED), Ordering::Release);
        }
        info!(tenant = %tenant, ?limits, "quota limits updated");
    }

    /// Restore committed usage loaded from persistence.
    pub fn seed_usage(&self, tenant: TenantId, kind: ResourceKind, used: u64) {
        let quota = self.tenant(tenant);
        let counter = quota.counter(kind);
        let previous = counter.used.swap(used, Ordering::AcqRel);
        let _ = counter
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(previous).saturating_add(used))
            });
    }

    /// Reserve `amount` of `kind` for `tenant`.
    ///
    /// # Errors
    ///
    /// Returns [`Denied`] when committed usage plus live reservations plus
    /// `amount` would exceed the limit. Denial is terminal for the caller.
    pub fn reserve(&self, tenant: TenantId, kind: ResourceKind, amount: u64) -> Result<Grant, Denied> {
        let quota = self.tenant(tenant);
        let counter = quota.counter(kind);
        match counter.try_reserve(amount) {
            Ok(()) => {
                debug!(tenant = %tenant, kind = %kind, amount, "quota reserved");
                Ok(Grant {
                    tenant,
                    kind,
                    amount,
                    quota: Arc::clone(&quota),
                    settled: false,
                })
            }
            Err(outstanding) => Err(Denied {
                tenant,
                kind,
                requested: amount,
                outstanding,
                limit: counter.limit.load(Ordering::Acquire),
            }),
        }
    }

    /// Confirm the whole reservation was consumed.
    pub fn commit(&self, grant: Grant) {
        let amount = grant.amount;
        self.commit_partial(grant, amount);
    }

    /// Confirm `actual` units were consumed; the remainder is released.
    ///
    /// `actual` is clamped to the reserved amount.
    pub fn commit_partial(&self, mut grant: Grant, actual: u64) {
        let counter = grant.quota.counter(grant.kind);
        let consumed = actual.min(grant.amount);
        counter.commit(consumed);
        counter.release(grant.amount - consumed);
        grant.settled = true;
        debug!(tenant = %grant.tenant, kind = %grant.kind, consumed, "quota committed");
    }

    /// Return the reservation unused.
    pub fn release(&self, mut grant: Grant) {
        grant.quota.counter(grant.kind).release(grant.amount);
        grant.settled = true;
        debug!(tenant = %grant.tenant, kind = %grant.kind, amount = grant.amount, "quota released");
    }

    /// Usage for every resource kind of a tenant.
    pub fn usage(&self, tenant: TenantId) -> Vec<QuotaUsage> {
        let quota = self.tenant(tenant);
        ResourceKind::ALL
            .iter()
            .map(|&kind| {
                let c = quota.counter(kind);
                let used = c.used.load(Ordering::Acquire);
                let outstanding = c.outstanding.load(Ordering::Acquire);
                let limit = c.limit.load(Ordering::Acquire);
                QuotaUsage {
                    kind,
                    used,
                    reserved: outstanding.saturating_sub(used),
                    limit: (limit != UNLIMITED).then_some(limit),
                }
            })
            .collect()
    }

    /// Committed usage of one resource.
    pub fn used(&self, tenant: TenantId, kind: ResourceKind) -> u64 {
        self.tenant(tenant).counter(kind).used.load(Ordering::Acquire)
    }

    /// Start a new billing period: committed usage drops to zero, live
    /// reservations are kept.
    pub fn reset_period(&self, tenant: TenantId) {
        let quota = self.tenant(tenant);
        for kind in ResourceKind::ALL {
            let counter = quota.counter(kind);
            let used = counter.used.swap(0, Ordering::AcqRel);
            counter.release(used);
        }
        info!(tenant = %tenant, "quota period reset");
    }
}

impl Default for QuotaGovernor {
    fn default() -> Self {
        Self::new(QuotaLimits::default())
    }
}
