pub mod config;
pub mod execution;
pub mod ids;
pub mod method;
pub mod test_case;
pub mod trace;
pub mod value;

pub use config::{Config, GenerationConfig, LoggingConfig, OutputConfig, VerificationConfig};
pub use execution::{FieldAccess, MethodExecution, MockOccurrence, RequiredPackage};
pub use ids::{ExecutionId, MethodId, ValueId};
pub use method::{AccessLevel, FieldInfo, MethodDescriptor, MethodKind, TypeInfo};
pub use test_case::{
    ArgMatcher, AssemblyState, Assertion, AssertionKind, Call, Expression, Operand, Statement,
    StubAnswer, TestCase,
};
pub use trace::ExecutionTrace;
pub use value::{CreationKind, Literal, ObservedEntry, ObservedValue, SnapshotRef, ValueKind, VarDetail};
