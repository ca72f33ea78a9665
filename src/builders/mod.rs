//! Builders that wire an [`Engine`](crate::runtime::Engine) from configuration.

pub mod engine_builder;

pub use engine_builder::EngineBuilder;
