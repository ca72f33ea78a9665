//! Shared utilities: clocks, identifiers, and telemetry setup.

pub mod clock;
pub mod serde;
pub mod telemetry;

pub use clock::*;
pub use serde::*;
pub use telemetry::*;
