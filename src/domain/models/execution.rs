//! Recorded method executions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::errors::{DomainError, DomainResult};

use super::{ExecutionId, MethodId, ValueId};

/// Accessibility constraint on the package a generated test must live in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredPackage {
    /// Any package works.
    #[default]
    Any,
    /// The test must be declared in this package.
    Package(String),
    /// Two constraints name different packages.
    Unsatisfiable,
}

impl RequiredPackage {
    /// Combine two constraints.
    pub fn unify(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Unsatisfiable, _) | (_, Self::Unsatisfiable) => Self::Unsatisfiable,
            (Self::Any, x) | (x, Self::Any) => x.clone(),
            (Self::Package(a), Self::Package(b)) if a == b => Self::Package(a.clone()),
            _ => Self::Unsatisfiable,
        }
    }

    /// Whether some package satisfies the constraint.
    pub fn is_satisfiable(&self) -> bool {
        !matches!(self, Self::Unsatisfiable)
    }

    /// Package name for the generated test; empty means "any".
    pub fn as_package_name(&self) -> Option<&str> {
        match self {
            Self::Any => Some(""),
            Self::Package(p) => Some(p),
            Self::Unsatisfiable => None,
        }
    }
}

/// A stub registration needed when a value ends up as a test double.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MockOccurrence {
    /// The value replaced by a test double.
    pub mock: ValueId,
    /// The recorded call made on the double.
    pub execution: ExecutionId,
    /// Method called on the double.
    pub method: MethodId,
    /// Arguments of the call.
    pub args: Vec<ValueId>,
    /// Value the stub answers with.
    pub returns: Option<ValueId>,
    /// Exception the stub throws.
    pub throws: Option<String>,
}

/// A direct field read performed inside an execution's body.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldAccess {
    /// Object whose field was read.
    pub owner: ValueId,
    /// Field name.
    pub field: String,
}

/// One observed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodExecution {
    /// Recording order id.
    pub id: ExecutionId,
    /// Called method.
    pub method: MethodId,
    /// Receiver before the call; `None` for static calls and constructors.
    pub receiver: Option<ValueId>,
    /// Arguments as passed.
    pub params: Vec<ValueId>,
    return_value: Option<ValueId>,
    /// Receiver state after the call (constructed object for constructors).
    result_this: Option<ValueId>,
    /// Fully qualified type of the thrown exception.
    exception: Option<String>,
    /// Owning test; `None` when recorded outside any test.
    pub test_name: Option<String>,
    /// Cleared when the execution cannot be a target at all.
    pub can_test: bool,
    /// Set once all outcome fields have been recorded.
    completed: bool,
    /// Recorded by a construction probe rather than observed in a test run.
    pub synthetic: bool,
    /// Memoized package constraint of the call.
    pub required_package: Option<RequiredPackage>,
    /// Stubs the call needs when its inputs are doubled.
    pub mock_occurrences: Vec<MockOccurrence>,
    /// Fields read directly in the call's body.
    pub fields_read: BTreeSet<FieldAccess>,
}

impl MethodExecution {
    /// A freshly started call with no outcome yet.
    pub fn new(
        id: ExecutionId,
        method: MethodId,
        receiver: Option<ValueId>,
        params: Vec<ValueId>,
        test_name: Option<String>,
    ) -> Self {
        Self {
            id,
            method,
            receiver,
            params,
            return_value: None,
            result_this: None,
            exception: None,
            test_name,
            can_test: true,
            completed: false,
            synthetic: false,
            required_package: None,
            mock_occurrences: Vec::new(),
            fields_read: BTreeSet::new(),
        }
    }

    /// Value returned by the call.
    pub fn return_value(&self) -> Option<ValueId> {
        self.return_value
    }

    /// Receiver state after the call, when it changed.
    pub fn result_this(&self) -> Option<ValueId> {
        self.result_this
    }

    /// Type of the thrown exception.
    pub fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    /// Whether the call end was recorded.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Whether the call ended by throwing.
    pub fn throws(&self) -> bool {
        self.exception.is_some()
    }

    /// Write-once setter for the return value.
    pub fn set_return_value(&mut self, value: ValueId) -> DomainResult<()> {
        if self.return_value.is_some() {
            return Err(DomainError::WriteOnceViolation {
                execution: self.id,
                field: "return_value",
            });
        }
        if self.exception.is_some() {
            return Err(DomainError::TraceCorrupted(format!(
                "execution {} threw and cannot carry a return value",
                self.id
            )));
        }
        self.return_value = Some(value);
        Ok(())
    }

    /// Write-once setter for the post-call receiver state.
    pub fn set_result_this(&mut self, value: ValueId) -> DomainResult<()> {
        if self.result_this.is_some() {
            return Err(DomainError::WriteOnceViolation {
                execution: self.id,
                field: "result_this",
            });
        }
        self.result_this = Some(value);
        Ok(())
    }

    /// Write-once setter for the thrown exception type.
    pub fn set_exception(&mut self, exception_type: impl Into<String>) -> DomainResult<()> {
        if self.exception.is_some() {
            return Err(DomainError::WriteOnceViolation {
                execution: self.id,
                field: "exception",
            });
        }
        if self.return_value.is_some() {
            return Err(DomainError::TraceCorrupted(format!(
                "execution {} returned and cannot also throw",
                self.id
            )));
        }
        self.exception = Some(exception_type.into());
        Ok(())
    }

    /// Flag the outcome fields as final.
    pub fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Value this execution defines: the constructed object, otherwise the
    /// return value.
    pub fn produced_value(&self) -> Option<ValueId> {
        self.return_value.or(self.result_this)
    }

    /// Everything the call consumes: receiver first, then parameters.
    pub fn inputs(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.receiver.into_iter().chain(self.params.iter().copied())
    }
}

/// Method, receiver and parameters of a call, each input by its content key.
/// Built by [`ExecutionTrace::call_key`](super::ExecutionTrace::call_key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallKey {
    pub method: MethodId,
    pub receiver: Option<String>,
    pub params: Vec<String>,
}

/// Observable result of a call, values by content key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Outcome {
    pub return_value: Option<String>,
    pub result_this: Option<String>,
    pub exception: Option<String>,
}
