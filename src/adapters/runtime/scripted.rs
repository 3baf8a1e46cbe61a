//! In-memory runtime and probe for tests and dry runs.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ExecutionId, ExecutionTrace, MethodDescriptor, MethodId, ObservedValue, TestCase, ValueId,
};
use crate::domain::ports::{ConstructionProbe, ProbeOutcome, ReplayOutcome, ReplayRuntime};

/// Replay runtime answering from a script.
///
/// Outcomes are looked up by test case name first, then by target
/// execution. A case with no scripted outcome fails to replay.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReplayRuntime {
    by_name: HashMap<String, ReplayOutcome>,
    by_target: HashMap<ExecutionId, ReplayOutcome>,
    delay: Option<Duration>,
}

impl ScriptedReplayRuntime {
    /// Runtime with no scripted outcomes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime that reports every execution's recorded outcome, so a replay
    /// reproduces the recording whenever the assembled case targets it.
    pub fn echoing(trace: &ExecutionTrace) -> DomainResult<Self> {
        let mut runtime = Self::new();
        for execution in trace.executions().filter(|e| e.is_completed()) {
            let outcome = if let Some(exception) = execution.exception() {
                ReplayOutcome::Threw {
                    exception: exception.to_string(),
                }
            } else {
                let value = match execution.return_value() {
                    Some(value) => trace.to_observed(value)?,
                    None => ObservedValue::Null,
                };
                ReplayOutcome::Returned { value }
            };
            runtime.by_target.insert(execution.id, outcome);
        }
        Ok(runtime)
    }

    /// Outcome for the case called `case_name`.
    pub fn with_outcome(mut self, case_name: impl Into<String>, outcome: ReplayOutcome) -> Self {
        self.by_name.insert(case_name.into(), outcome);
        self
    }

    /// Outcome for any case targeting `target`.
    pub fn with_target_outcome(mut self, target: ExecutionId, outcome: ReplayOutcome) -> Self {
        self.by_target.insert(target, outcome);
        self
    }

    /// Delay every replay, e.g. to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ReplayRuntime for ScriptedReplayRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn replay(&self, case: &TestCase) -> DomainResult<ReplayOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.by_name
            .get(&case.name)
            .or_else(|| self.by_target.get(&case.target))
            .cloned()
            .ok_or_else(|| DomainError::ReplayFailed(format!("no scripted outcome for {}", case.name)))
    }
}

/// Construction probe answering from a script. Unscripted methods are
/// unsupported.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    outcomes: HashMap<MethodId, ProbeOutcome>,
}

impl ScriptedProbe {
    /// Probe that supports nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// `method` constructs `product` when invoked.
    pub fn with_product(mut self, method: MethodId, product: ObservedValue) -> Self {
        self.outcomes.insert(method, ProbeOutcome::Produced(product));
        self
    }

    /// `method` throws `exception` when invoked.
    pub fn with_exception(mut self, method: MethodId, exception: impl Into<String>) -> Self {
        self.outcomes
            .insert(method, ProbeOutcome::Threw(exception.into()));
        self
    }
}

impl ConstructionProbe for ScriptedProbe {
    fn invoke(
        &self,
        _trace: &ExecutionTrace,
        method: &MethodDescriptor,
        _args: &[ValueId],
    ) -> ProbeOutcome {
        self.outcomes
            .get(&method.id)
            .cloned()
            .unwrap_or(ProbeOutcome::Unsupported)
    }
}
