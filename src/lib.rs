//! Replaygen - regression tests from recorded execution traces
//!
//! Replaygen records the method executions and values seen while a program's
//! existing tests run, decides for each recorded execution whether it can be
//! rebuilt as a standalone unit test (constructing or mocking every value it
//! depends on), assembles the test, replays it to confirm it reproduces the
//! recorded outcome, and writes the survivors out as test sources.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): trace model, errors and port traits
//! - **Service Layer** (`services`): recording, analysis, assembly, verification and packing
//! - **Adapters** (`adapters`): trace documents, type catalogs, replay runtimes and file output
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use replaygen::adapters::TraceDocument;
//!
//! let document = TraceDocument::from_path("trace.json".as_ref())?;
//! let loaded = document.load(&[])?;
//! println!("{} executions", loaded.summary.executions);
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    Config, ExecutionId, ExecutionTrace, GenerationConfig, LoggingConfig, MethodExecution,
    MethodId, ObservedValue, OutputConfig, TestCase, ValueId, VerificationConfig,
};
pub use domain::ports::{ConstructionProbe, ReplayOutcome, ReplayRuntime, TypeCatalog};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    GenerationReport, ReconstructionAnalyzer, RecreationVerifier, Rejection, SuitePacker,
    TestAssembler, TestGenerator, TraceRecorder,
};
