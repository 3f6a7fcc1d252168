//! Infrastructure adapters and runtime bootstrap.

pub mod checker;
pub mod error;
pub mod http;
pub mod services;
pub mod telemetry;
