//! Runtime bootstrap: telemetry and the errors it can raise.

pub mod error;
pub mod telemetry;
