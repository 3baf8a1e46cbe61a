//! Replay runtime port - live re-execution of assembled test cases.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ObservedValue, TestCase};

/// What happened when the assembled statements were run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// The target call returned this value.
    Returned { value: ObservedValue },
    /// The target call threw an exception of this type.
    Threw { exception: String },
}

/// Runs an assembled test case against the real code under test.
#[async_trait]
pub trait ReplayRuntime: Send + Sync {
    /// Runtime name, for logs.
    fn name(&self) -> &'static str;

    /// Execute the case's statements and target call, reporting the outcome.
    async fn replay(&self, case: &TestCase) -> DomainResult<ReplayOutcome>;
}
