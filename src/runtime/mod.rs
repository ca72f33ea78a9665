//! Engine facade and lifecycle.

pub mod api;

pub use api::{Engine, Health};
