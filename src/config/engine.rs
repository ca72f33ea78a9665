//! Engine configuration structures.
//!
//! Every section has serde defaults so a partial JSON document (or none at all)
//! produces a runnable configuration. `EngineConfig::from_env` layers `.env`,
//! an optional JSON file and individual `AUTOBLOG_*` overrides.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::core::error::AppResult;
use crate::core::job::queues;

/// One named queue with its own bounded worker set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name (`generation`, `publishing`, `sources`, `maintenance`).
    pub name: String,
    /// Number of dedicated worker threads.
    pub concurrency: usize,
    /// Soft limit in seconds: the job is asked to stop cooperatively.
    pub soft_time_limit_secs: u64,
    /// Hard limit in seconds: the attempt is abandoned and classified transient.
    pub hard_time_limit_secs: u64,
    /// Capacity of the wake-up channel feeding this queue's workers.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

const fn default_max_pending() -> usize {
    1024
}

impl QueueConfig {
    /// Queue with the default one-hour hard limit and 50 minute soft limit.
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency,
            soft_time_limit_secs: 3000,
            hard_time_limit_secs: 3600,
            max_pending: default_max_pending(),
        }
    }

    /// Override both time limits.
    #[must_use]
    pub const fn with_time_limits(mut self, soft: Duration, hard: Duration) -> Self {
        self.soft_time_limit_secs = soft.as_secs();
        self.hard_time_limit_secs = hard.as_secs();
        self
    }

    /// Soft limit as a `Duration`.
    pub const fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    /// Hard limit as a `Duration`.
    pub const fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }

    /// Validate queue values.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("queue name must not be empty".into());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be greater than 0".into());
        }
        if self.hard_time_limit_secs == 0 {
            return Err("hard_time_limit_secs must be greater than 0".into());
        }
        if self.soft_time_limit_secs > self.hard_time_limit_secs {
            return Err("soft_time_limit_secs must not exceed hard_time_limit_secs".into());
        }
        if self.max_pending == 0 {
            return Err("max_pending must be greater than 0".into());
        }
        Ok(())
    }
}

/// Retry/backoff defaults applied to every queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor between consecutive retries.
    pub multiplier: f64,
    /// Upper bound on any single delay, in seconds.
    pub max_delay_secs: u64,
    /// Symmetric jitter fraction in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_secs: 600,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Validate retry values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be >= 1.0".into());
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err("jitter must be within [0, 1)".into());
        }
        Ok(())
    }
}

/// Beat tick intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerTickConfig {
    /// How often standing schedules are evaluated.
    pub schedule_tick_secs: u64,
    /// How often publish-ready artifacts are scanned.
    pub publish_tick_secs: u64,
    /// How often sources are checked for an elapsed monitoring interval.
    pub source_tick_secs: u64,
    /// UTC hour of the daily maintenance job.
    pub maintenance_hour: u32,
    /// Publish hour used when a schedule does not set one.
    pub default_publish_hour: u32,
    /// How often a health-check job is enqueued; 0 disables it.
    pub health_check_tick_secs: u64,
    /// How often failed publications are swept for another try; 0 disables it.
    pub publication_retry_tick_secs: u64,
    /// Sweeps a failed publication gets before it stays failed.
    pub max_publication_retries: u32,
}

impl Default for SchedulerTickConfig {
    fn default() -> Self {
        Self {
            schedule_tick_secs: 300,
            publish_tick_secs: 60,
            source_tick_secs: 1_800,
            maintenance_hour: 3,
            default_publish_hour: 10,
            health_check_tick_secs: 300,
            publication_retry_tick_secs: 3_600,
            max_publication_retries: 3,
        }
    }
}

impl SchedulerTickConfig {
    /// Validate tick values.
    pub fn validate(&self) -> Result<(), String> {
        if self.schedule_tick_secs == 0 || self.publish_tick_secs == 0 || self.source_tick_secs == 0 {
            return Err("tick intervals must be greater than 0".into());
        }
        if self.maintenance_hour > 23 || self.default_publish_hour > 23 {
            return Err("hours must be within 0..=23".into());
        }
        Ok(())
    }
}

/// Pipeline thresholds, reservation sizes and call timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum quality score (0-100) for an artifact to be kept.
    pub quality_threshold: f64,
    /// Minimum body length in words.
    pub min_word_count: usize,
    /// Jaccard similarity at or above which an artifact is a near-duplicate.
    pub duplicate_threshold: f64,
    /// How many recent artifacts of the tenant are compared.
    pub duplicate_window: usize,
    /// Generation units reserved for a draft-only run.
    pub generation_reserve_units: u64,
    /// Generation units reserved when the run will auto-publish.
    pub auto_publish_reserve_units: u64,
    /// Publish actions reserved per publish call.
    pub publish_reserve_units: u64,
    /// Timeout for source/publisher adapter calls, in seconds.
    pub adapter_timeout_secs: u64,
    /// Timeout for research and generation calls, in seconds.
    pub generation_timeout_secs: u64,
    /// Items fetched per source during topic discovery.
    pub discovery_fetch_limit: usize,
    /// Generation jobs spawned per monitored source run.
    pub monitor_auto_generate_limit: usize,
    /// Age in days after which terminal jobs are pruned by maintenance.
    pub cleanup_days_old: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quality_threshold: 30.0,
            min_word_count: 300,
            duplicate_threshold: 0.8,
            duplicate_window: 20,
            generation_reserve_units: 3_000,
            auto_publish_reserve_units: 5_000,
            publish_reserve_units: 1,
            adapter_timeout_secs: 30,
            generation_timeout_secs: 300,
            discovery_fetch_limit: 10,
            monitor_auto_generate_limit: 3,
            cleanup_days_old: 7,
        }
    }
}

impl PipelineConfig {
    /// Adapter timeout as a `Duration`.
    pub const fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    /// Generation timeout as a `Duration`.
    pub const fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    /// Validate pipeline values.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.quality_threshold) {
            return Err("quality_threshold must be within 0..=100".into());
        }
        if !(0.0..=1.0).contains(&self.duplicate_threshold) {
            return Err("duplicate_threshold must be within 0..=1".into());
        }
        if self.adapter_timeout_secs == 0 || self.generation_timeout_secs == 0 {
            return Err("timeouts must be greater than 0".into());
        }
        if self.cleanup_days_old < 0 {
            return Err("cleanup_days_old must not be negative".into());
        }
        Ok(())
    }
}

/// Default per-tenant limits applied when a tenant is first seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Generation units per period; `None` means unlimited.
    pub default_generation_limit: Option<u64>,
    /// Publish actions per period; `None` means unlimited.
    pub default_publish_limit: Option<u64>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_generation_limit: Some(100_000),
            default_publish_limit: Some(50),
        }
    }
}

/// Root engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Named queues.
    pub queues: Vec<QueueConfig>,
    /// Retry defaults.
    pub retry: RetryConfig,
    /// Beat configuration.
    pub scheduler: SchedulerTickConfig,
    /// Pipeline thresholds.
    pub pipeline: PipelineConfig,
    /// Quota defaults.
    pub quota: QuotaConfig,
    /// How often idle workers re-check the store for delayed jobs, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = num_cpus::get().max(1);
        Self {
            queues: vec![
                QueueConfig::new(queues::GENERATION, cpus.min(4)),
                QueueConfig::new(queues::PUBLISHING, 2),
                QueueConfig::new(queues::SOURCES, 2),
                QueueConfig::new(queues::MAINTENANCE, 1),
            ],
            retry: RetryConfig::default(),
            scheduler: SchedulerTickConfig::default(),
            pipeline: PipelineConfig::default(),
            quota: QuotaConfig::default(),
            poll_interval_ms: 250,
        }
    }
}

impl EngineConfig {
    /// Look up a queue by name.
    pub fn queue(&self, name: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Poll interval as a `Duration`.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate every section and require the four standard queues.
    pub fn validate(&self) -> Result<(), String> {
        for required in queues::ALL {
            if self.queue(required).is_none() {
                return Err(format!("queue `{required}` must be configured"));
            }
        }
        for queue in &self.queues {
            queue
                .validate()
                .map_err(|e| format!("queue `{}` invalid: {e}", queue.name))?;
        }
        let mut names: Vec<&str> = self.queues.iter().map(|q| q.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.queues.len() {
            return Err("queue names must be unique".into());
        }
        self.retry.validate().map_err(|e| format!("retry invalid: {e}"))?;
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler invalid: {e}"))?;
        self.pipeline
            .validate()
            .map_err(|e| format!("pipeline invalid: {e}"))?;
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from the process environment.
    ///
    /// Reads `.env` if present, then `AUTOBLOG_CONFIG` (path to a JSON file),
    /// then the individual overrides below.
    ///
    /// # Errors
    ///
    /// Fails when the JSON file cannot be read or parsed, an override does not
    /// parse, or the resulting configuration is invalid.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var("AUTOBLOG_CONFIG") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config file {path}"))?;
                serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))?
            }
            Err(_) => Self::default(),
        };

        if let Some(n) = env_parse::<usize>("AUTOBLOG_GENERATION_WORKERS")? {
            cfg.set_concurrency(queues::GENERATION, n);
        }
        if let Some(n) = env_parse::<usize>("AUTOBLOG_PUBLISHING_WORKERS")? {
            cfg.set_concurrency(queues::PUBLISHING, n);
        }
        if let Some(n) = env_parse::<u32>("AUTOBLOG_MAX_ATTEMPTS")? {
            cfg.retry.max_attempts = n;
        }
        if let Some(v) = env_parse::<f64>("AUTOBLOG_QUALITY_THRESHOLD")? {
            cfg.pipeline.quality_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("AUTOBLOG_SCHEDULE_TICK_SECS")? {
            cfg.scheduler.schedule_tick_secs = v;
        }
        if let Some(v) = env_parse::<u64>("AUTOBLOG_HEALTH_CHECK_TICK_SECS")? {
            cfg.scheduler.health_check_tick_secs = v;
        }
        if let Some(v) = env_parse::<u32>("AUTOBLOG_MAX_PUBLICATION_RETRIES")? {
            cfg.scheduler.max_publication_retries = v;
        }
        if let Some(v) = env_parse::<u64>("AUTOBLOG_DEFAULT_TOKENS_LIMIT")? {
            cfg.quota.default_generation_limit = Some(v);
        }
        if let Some(v) = env_parse::<u64>("AUTOBLOG_DEFAULT_POSTS_LIMIT")? {
            cfg.quota.default_publish_limit = Some(v);
        }

        cfg.validate().map_err(|e| anyhow!("invalid engine config: {e}"))?;
        Ok(cfg)
    }

    fn set_concurrency(&mut self, queue: &str, n: usize) {
        if let Some(q) = self.queues.iter_mut().find(|q| q.name == queue) {
            q.concurrency = n;
        }
    }
}

fn env_parse<T>(key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("{key}: {e}")),
        Err(_) => Ok(None),
    }
}
