//! Domain errors for the replaygen trace model and generator.

use thiserror::Error;

use super::models::{ExecutionId, MethodId, ValueId};

/// Which table of the trace store a missing id was looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEntryKind {
    Execution,
    Value,
    Method,
    Type,
}

impl std::fmt::Display for TraceEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Execution => "execution",
            Self::Value => "value",
            Self::Method => "method",
            Self::Type => "type",
        };
        f.write_str(name)
    }
}

/// Domain-level errors that can occur while recording or generating.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Missing trace entry: {kind} {id}")]
    MissingTraceEntry { kind: TraceEntryKind, id: String },

    #[error("Write-once field '{field}' of execution {execution} was already set")]
    WriteOnceViolation {
        execution: ExecutionId,
        field: &'static str,
    },

    #[error("Method {method} expects {expected} parameter(s) but {actual} were recorded")]
    ParameterCountMismatch {
        method: MethodId,
        expected: usize,
        actual: usize,
    },

    #[error("Member call to method {0} was recorded without a receiver")]
    MissingReceiver(MethodId),

    #[error("Static call or constructor {0} was recorded with a receiver")]
    UnexpectedReceiver(MethodId),

    #[error("Call stack of thread {thread} ends with {found:?}, expected execution {expected}")]
    CallStackMismatch {
        thread: u64,
        expected: ExecutionId,
        found: Option<ExecutionId>,
    },

    #[error("Call stack of thread {0} is empty")]
    EmptyCallStack(u64),

    #[error("Unknown method descriptor: {0}")]
    UnknownMethod(MethodId),

    #[error("Trace corrupted: {0}")]
    TraceCorrupted(String),

    #[error("Test case '{0}' was not recreated by replay")]
    UnverifiedCase(String),

    #[error("Replay failed: {0}")]
    ReplayFailed(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type of every fallible domain operation.
pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for a missing execution lookup.
    pub fn missing_execution(id: ExecutionId) -> Self {
        Self::MissingTraceEntry {
            kind: TraceEntryKind::Execution,
            id: id.to_string(),
        }
    }

    /// Shorthand for a missing value lookup.
    pub fn missing_value(id: ValueId) -> Self {
        Self::MissingTraceEntry {
            kind: TraceEntryKind::Value,
            id: id.to_string(),
        }
    }

    /// Faults caused by a single bad record. The generator skips the offending
    /// target and keeps going when it sees one of these.
    pub fn is_trace_integrity(&self) -> bool {
        matches!(
            self,
            Self::MissingTraceEntry { .. }
                | Self::WriteOnceViolation { .. }
                | Self::ParameterCountMismatch { .. }
                | Self::MissingReceiver(_)
                | Self::UnexpectedReceiver(_)
                | Self::UnknownMethod(_)
        )
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrity_classification() {
        assert!(DomainError::missing_execution(ExecutionId(3)).is_trace_integrity());
        assert!(DomainError::WriteOnceViolation {
            execution: ExecutionId(1),
            field: "return_value",
        }
        .is_trace_integrity());
        assert!(!DomainError::TraceCorrupted("dangling edge".to_string()).is_trace_integrity());
        assert!(!DomainError::ReplayFailed("boom".to_string()).is_trace_integrity());
    }

    #[test]
    fn test_error_messages() {
        let err = DomainError::ParameterCountMismatch {
            method: MethodId(7),
            expected: 2,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "Method m7 expects 2 parameter(s) but 3 were recorded"
        );
        assert_eq!(
            DomainError::missing_value(ValueId(12)).to_string(),
            "Missing trace entry: value v12"
        );
    }
}
