//! Infrastructure layer module
//!
//! Process-level plumbing around the generator:
//! - Configuration management (figment, YAML plus environment)
//! - Logging infrastructure (tracing-subscriber, tracing-appender)

pub mod config;
pub mod logging;
