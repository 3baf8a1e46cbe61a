//! Domain layer for replaygen
//!
//! This module contains the execution-trace model, its errors, and the port
//! traits the decision engine uses to reach its collaborators.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
