//! Concrete implementations of the domain ports and file-level I/O.

pub mod runtime;
pub mod static_catalog;
pub mod suite_writer;
pub mod trace_document;

pub use runtime::{ProcessReplayRuntime, ScriptedProbe, ScriptedReplayRuntime};
pub use static_catalog::StaticTypeCatalog;
pub use suite_writer::SuiteWriter;
pub use trace_document::{LoadedTrace, TraceDocument, TraceEvent};
