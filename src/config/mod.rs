//! Configuration models for queues, retries, the scheduler, and the pipeline.

pub mod engine;

pub use engine::{
    EngineConfig, PipelineConfig, QueueConfig, QuotaConfig, RetryConfig, SchedulerTickConfig,
};
