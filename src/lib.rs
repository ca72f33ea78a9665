//! # Autoblog Engine
//!
//! Background job orchestration for scheduled content generation and
//! publishing.
//!
//! The engine turns schedules into generation jobs, runs each job through a
//! discover / research / generate / validate / publish pipeline, and delivers
//! the result to a destination through pluggable adapters. Paid calls are
//! guarded by a per-tenant quota governor, failures are retried with bounded
//! exponential backoff, and jobs that cannot succeed end in an operator-visible
//! dead-letter set.
//!
//! ## Components
//!
//! - **Quota Governor** ([`crate::core::quota`]): reserve / commit / release against
//!   per-tenant budgets for generation units and publish actions; concurrent
//!   reservations never exceed the limit.
//! - **Adapter Registry** ([`crate::core::registry`]): type tag to source or publisher
//!   implementation; built-in `rss` and `webhook` adapters live in
//!   [`adapters`].
//! - **Pipeline Orchestrator** ([`crate::core::pipeline`]): the per-job state machine.
//! - **Retry/Backoff Engine** ([`crate::core::retry`]): `execute(policy, unit)` and the
//!   shared retry decision used by the workers.
//! - **Worker Pool** ([`crate::core::worker_pool`]): named queues served by dedicated
//!   OS threads, with soft and hard time limits and single-flight claims.
//! - **Scheduler** ([`crate::core::scheduler`]): periodic ticks that enqueue due work
//!   with deterministic idempotency keys.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use autoblog_engine::builders::EngineBuilder;
//! use autoblog_engine::config::EngineConfig;
//!
//! let engine = EngineBuilder::new(EngineConfig::from_env()?)
//!     .with_generation_service(Arc::new(my_llm_client))
//!     .build()?;
//! engine.start()?;
//!
//! // ... serve requests: engine.trigger(..), engine.status(..), engine.health()
//!
//! engine.drain(Duration::from_secs(30)).await;
//! engine.shutdown();
//! ```
//!
//! For complete scenarios, see:
//! - `tests/pipeline_test.rs` - generation, publishing, quota and outage paths
//! - `tests/scheduler_test.rs` - schedule firing over simulated days

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Built-in HTTP source and publisher adapters.
#[cfg(feature = "http-adapters")]
pub mod adapters;
/// Builders that wire the engine from configuration.
pub mod builders;
/// Configuration models for queues, retries, ticks and thresholds.
pub mod config;
/// Domain model, pipeline, quota, retry, scheduling and worker pool.
pub mod core;
/// In-memory job store and repositories.
pub mod infra;
/// Engine facade and lifecycle.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use builders::EngineBuilder;
pub use config::EngineConfig;
pub use crate::core::error::{EngineError, EngineResult, FailureClass};
pub use runtime::{Engine, Health};
