//! Beat scheduler: turns due schedules, publish-ready artifacts, failed
//! publications and sources whose monitoring interval elapsed into jobs, and
//! enqueues the periodic maintenance work.
//!
//! One scheduler runs per deployment. Every job it creates carries a
//! deterministic idempotency key derived from the due instant, and the
//! schedule's `next_run_at` is advanced with a compare-and-set after the
//! enqueue, so a crash or a second scheduler re-fires the same key and the job
//! store collapses the duplicate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SchedulerTickConfig;
use crate::core::dispatch::Dispatcher;
use crate::core::error::EngineResult;
use crate::core::job::{
    GeneratePayload, JobKind, MaintenancePayload, MonitorSourcePayload, NewJob, PublishPayload,
};
use crate::core::model::ScheduleConfig;
use crate::core::repository::Repositories;
use crate::core::retry::{self, RetryPolicy};
use crate::util::{Clock, JobId, Priority};

/// What one full tick produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Generate jobs created for due schedules.
    pub generation_jobs: Vec<JobId>,
    /// Schedules that had no `next_run_at` and were initialised.
    pub schedules_initialised: usize,
    /// Publish jobs created for due artifacts.
    pub publish_jobs: Vec<JobId>,
    /// Monitor jobs created for sources.
    pub monitor_jobs: Vec<JobId>,
    /// Daily maintenance job, when created on this tick.
    pub maintenance_job: Option<JobId>,
    /// Health-check job, when one was due on this tick.
    pub health_check_job: Option<JobId>,
    /// Publish jobs created for reopened failed publications.
    pub republish_jobs: Vec<JobId>,
}

/// Failed publications reopened per sweep.
const REPUBLISH_BATCH: usize = 100;

/// Periodic job producer.
pub struct Scheduler {
    repos: Repositories,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
    config: SchedulerTickConfig,
    cleanup_days_old: i64,
    persist_policy: RetryPolicy,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl Scheduler {
    /// Scheduler over `repos`, enqueueing through `dispatcher`.
    pub fn new(
        repos: Repositories,
        dispatcher: Arc<Dispatcher>,
        clock: Arc<dyn Clock>,
        config: SchedulerTickConfig,
        cleanup_days_old: i64,
    ) -> Self {
        Self {
            repos,
            dispatcher,
            clock,
            config,
            cleanup_days_old,
            persist_policy: RetryPolicy::new()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(50))
                .with_max_delay(Duration::from_secs(1)),
            last_tick: Mutex::new(None),
        }
    }

    /// Time of the most recent tick.
    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        *self.last_tick.lock()
    }

    fn beat(&self, now: DateTime<Utc>) {
        *self.last_tick.lock() = Some(now);
    }

    /// Run every check once at `now`.
    ///
    /// # Errors
    ///
    /// Repository errors from listing schedules, artifacts or sources.
    pub async fn tick(&self, now: DateTime<Utc>) -> EngineResult<TickReport> {
        let (generation_jobs, schedules_initialised) = self.tick_schedules(now).await?;
        let report = TickReport {
            generation_jobs,
            schedules_initialised,
            publish_jobs: self.tick_publish(now)?,
            monitor_jobs: self.tick_sources(now)?,
            maintenance_job: self.tick_maintenance(now)?,
            health_check_job: self.tick_health_check(now)?,
            republish_jobs: self.tick_failed_publications(now)?,
        };
        self.beat(now);
        Ok(report)
    }

    /// Enqueue a generate job for every due active schedule.
    ///
    /// Returns the jobs created and the number of schedules initialised.
    ///
    /// # Errors
    ///
    /// Repository error from listing schedules.
    pub async fn tick_schedules(&self, now: DateTime<Utc>) -> EngineResult<(Vec<JobId>, usize)> {
        let mut created = Vec::new();
        let mut initialised = 0;
        for schedule in self.repos.schedules.list_active()? {
            match schedule.next_run_at {
                None => {
                    let next = schedule.next_run_after(now);
                    if self.persist(&schedule, None, schedule.last_run_at, next).await {
                        debug!(schedule_id = %schedule.id, ?next, "schedule initialised");
                        initialised += 1;
                    }
                }
                Some(due) if due <= now => {
                    if let Some(id) = self.fire(&schedule, due, now).await {
                        created.push(id);
                    }
                }
                Some(_) => {}
            }
        }
        Ok((created, initialised))
    }

    async fn fire(&self, schedule: &ScheduleConfig, due: DateTime<Utc>, now: DateTime<Utc>) -> Option<JobId> {
        let payload = GeneratePayload {
            agent_id: schedule.agent_id,
            schedule_id: Some(schedule.id),
            auto_publish: Some(schedule.auto_publish),
            ..GeneratePayload::default()
        };
        let job = match NewJob::typed(JobKind::Generate, &payload) {
            Ok(job) => job
                .with_idempotency_key(format!("schedule:{}:{}", schedule.id, due.timestamp()))
                .with_tenant(schedule.tenant),
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %e, "could not build generate job");
                return None;
            }
        };
        let outcome = match self.dispatcher.enqueue(job) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(schedule_id = %schedule.id, error = %e, "scheduled enqueue failed; will retry next tick");
                return None;
            }
        };
        // Recomputed from now, not from the old due time, so a long outage
        // produces one run instead of a backlog.
        let next = schedule.next_run_after(now);
        if self.persist(schedule, Some(due), Some(now), next).await {
            info!(schedule_id = %schedule.id, job_id = %outcome.id(), ?next, "schedule fired");
        }
        outcome.is_created().then(|| outcome.id())
    }

    async fn persist(
        &self,
        schedule: &ScheduleConfig,
        expected: Option<DateTime<Utc>>,
        last: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> bool {
        let schedules = &self.repos.schedules;
        let result = retry::execute_classified(&self.persist_policy, |_| {
            std::future::ready(schedules.advance(schedule.id, expected, last, next))
        })
        .await;
        match result {
            Ok(true) => true,
            Ok(false) => {
                debug!(schedule_id = %schedule.id, "schedule already advanced elsewhere");
                false
            }
            Err(e) => {
                let attempts = e.attempts();
                let error = e.into_inner();
                warn!(schedule_id = %schedule.id, attempts, error = %error, "could not persist schedule");
                false
            }
        }
    }

    /// Enqueue publish jobs for scheduled artifacts whose time has come.
    ///
    /// # Errors
    ///
    /// Repository error from listing artifacts.
    pub fn tick_publish(&self, now: DateTime<Utc>) -> EngineResult<Vec<JobId>> {
        let mut created = Vec::new();
        for artifact in self.repos.artifacts.due_for_publish(now)? {
            let payload = PublishPayload {
                artifact_id: artifact.id,
                publisher_id: artifact.publisher_id,
            };
            let job = NewJob::typed(JobKind::Publish, &payload)?
                .with_idempotency_key(artifact.publish_key())
                .with_tenant(artifact.tenant);
            match self.dispatcher.enqueue(job) {
                Ok(outcome) if outcome.is_created() => created.push(outcome.id()),
                Ok(_) => {}
                Err(e) => warn!(artifact_id = %artifact.id, error = %e, "publish enqueue failed"),
            }
        }
        if !created.is_empty() {
            info!(count = created.len(), "publish jobs enqueued");
        }
        Ok(created)
    }

    /// Enqueue monitor jobs for sources whose interval elapsed.
    ///
    /// # Errors
    ///
    /// Repository error from listing sources.
    pub fn tick_sources(&self, now: DateTime<Utc>) -> EngineResult<Vec<JobId>> {
        let mut created = Vec::new();
        for source in self.repos.sources.list_monitored()? {
            let Some(due) = source.monitor_due_at() else {
                continue;
            };
            if !source.is_active || due > now {
                continue;
            }
            let payload = MonitorSourcePayload {
                source_id: source.id,
                auto_generate: source.auto_generate,
                limit: None,
            };
            let job = NewJob::typed(JobKind::MonitorSource, &payload)?
                .with_idempotency_key(format!("monitor:{}:{}", source.id, due.timestamp()))
                .with_tenant(source.tenant)
                .with_priority(Priority::Low);
            match self.dispatcher.enqueue(job) {
                Ok(outcome) if outcome.is_created() => created.push(outcome.id()),
                Ok(_) => {}
                Err(e) => warn!(source_id = %source.id, error = %e, "monitor enqueue failed"),
            }
        }
        Ok(created)
    }

    /// Enqueue the daily cleanup once the maintenance hour has passed.
    ///
    /// # Errors
    ///
    /// Payload serialization errors.
    pub fn tick_maintenance(&self, now: DateTime<Utc>) -> EngineResult<Option<JobId>> {
        if now.hour() < self.config.maintenance_hour {
            return Ok(None);
        }
        let job = NewJob::typed(
            JobKind::Maintenance,
            &MaintenancePayload::Cleanup {
                days_old: self.cleanup_days_old,
            },
        )?
        .with_idempotency_key(format!("maintenance:cleanup:{}", now.date_naive()))
        .with_priority(Priority::Low);
        match self.dispatcher.enqueue(job) {
            Ok(outcome) if outcome.is_created() => Ok(Some(outcome.id())),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(error = %e, "maintenance enqueue failed");
                Ok(None)
            }
        }
    }

    /// Enqueue a health check once per `health_check_tick_secs` window.
    ///
    /// # Errors
    ///
    /// Payload serialization errors.
    pub fn tick_health_check(&self, now: DateTime<Utc>) -> EngineResult<Option<JobId>> {
        let every = i64::try_from(self.config.health_check_tick_secs).unwrap_or(i64::MAX);
        if every == 0 {
            return Ok(None);
        }
        let window = now.timestamp().div_euclid(every);
        let job = NewJob::typed(JobKind::Maintenance, &MaintenancePayload::HealthCheck)?
            .with_idempotency_key(format!("maintenance:health:{window}"))
            .with_priority(Priority::Low);
        match self.dispatcher.enqueue(job) {
            Ok(outcome) if outcome.is_created() => Ok(Some(outcome.id())),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(error = %e, "health check enqueue failed");
                Ok(None)
            }
        }
    }

    /// Reopen failed publications that have retries left and enqueue a
    /// publish job for each.
    ///
    /// Validation failures are never picked up. An artifact whose enqueue
    /// fails stays scheduled and is caught by the next publish tick.
    ///
    /// # Errors
    ///
    /// Repository errors.
    pub fn tick_failed_publications(&self, now: DateTime<Utc>) -> EngineResult<Vec<JobId>> {
        let max = self.config.max_publication_retries;
        if max == 0 {
            return Ok(Vec::new());
        }
        let mut created = Vec::new();
        for mut artifact in self.repos.artifacts.failed_publications(max, REPUBLISH_BATCH)? {
            let reason = artifact.failure_reason.clone().unwrap_or_default();
            artifact.reopen_for_publish(now)?;
            self.repos.artifacts.upsert(artifact.clone())?;
            info!(artifact_id = %artifact.id, retry = artifact.publish_retries, %reason, "failed publication reopened");
            let payload = PublishPayload {
                artifact_id: artifact.id,
                publisher_id: artifact.publisher_id,
            };
            let job = NewJob::typed(JobKind::Publish, &payload)?
                .with_idempotency_key(artifact.publish_key())
                .with_tenant(artifact.tenant);
            match self.dispatcher.enqueue(job) {
                Ok(outcome) if outcome.is_created() => created.push(outcome.id()),
                Ok(_) => {}
                Err(e) => warn!(artifact_id = %artifact.id, error = %e, "republish enqueue failed"),
            }
        }
        Ok(created)
    }

    /// Tick on the configured intervals until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut schedules = interval(self.config.schedule_tick_secs);
        let mut publish = interval(self.config.publish_tick_secs);
        let mut sources = interval(self.config.source_tick_secs);
        let mut health = interval(self.config.health_check_tick_secs);
        let mut republish = interval(self.config.publication_retry_tick_secs);
        let health_enabled = self.config.health_check_tick_secs > 0;
        let republish_enabled = self.config.publication_retry_tick_secs > 0;
        info!(
            schedule_tick_secs = self.config.schedule_tick_secs,
            publish_tick_secs = self.config.publish_tick_secs,
            source_tick_secs = self.config.source_tick_secs,
            health_check_tick_secs = self.config.health_check_tick_secs,
            publication_retry_tick_secs = self.config.publication_retry_tick_secs,
            "scheduler started"
        );
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = schedules.tick() => {
                    let now = self.clock.now();
                    if let Err(e) = self.tick_schedules(now).await {
                        warn!(error = %e, "schedule tick failed");
                    }
                    if let Err(e) = self.tick_maintenance(now) {
                        warn!(error = %e, "maintenance tick failed");
                    }
                    self.beat(now);
                }
                _ = publish.tick() => {
                    let now = self.clock.now();
                    if let Err(e) = self.tick_publish(now) {
                        warn!(error = %e, "publish tick failed");
                    }
                    self.beat(now);
                }
                _ = sources.tick() => {
                    let now = self.clock.now();
                    if let Err(e) = self.tick_sources(now) {
                        warn!(error = %e, "source tick failed");
                    }
                    self.beat(now);
                }
                _ = health.tick(), if health_enabled => {
                    let now = self.clock.now();
                    if let Err(e) = self.tick_health_check(now) {
                        warn!(error = %e, "health check tick failed");
                    }
                    self.beat(now);
                }
                _ = republish.tick(), if republish_enabled => {
                    let now = self.clock.now();
                    if let Err(e) = self.tick_failed_publications(now) {
                        warn!(error = %e, "failed publication sweep failed");
                    }
                    self.beat(now);
                }
            }
        }
        info!("scheduler stopped");
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
