//! Construction probe port - live invocation of constructors and factories.

use crate::domain::models::{ExecutionTrace, MethodDescriptor, ObservedValue, ValueId};

/// Result of probing a constructor or factory.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// The call completed and produced this value.
    Produced(ObservedValue),
    /// The call threw an exception of this type.
    Threw(String),
    /// The probe cannot invoke this method.
    Unsupported,
}

/// Invokes a constructor or static factory with arguments taken from the
/// trace, so construction search can surface instances the original test
/// run never produced.
pub trait ConstructionProbe: Send + Sync {
    fn invoke(
        &self,
        trace: &ExecutionTrace,
        method: &MethodDescriptor,
        args: &[ValueId],
    ) -> ProbeOutcome;
}
