pub mod construction_search;
pub mod reconstruction_analyzer;
pub mod recreation_verifier;
pub mod source_renderer;
pub mod suite_packer;
pub mod test_assembler;
pub mod test_generator;
pub mod trace_recorder;

pub use construction_search::ConstructionSearch;
pub use reconstruction_analyzer::{ReconstructionAnalyzer, ReconstructionPlan, Rejection, Verdict};
pub use recreation_verifier::{ExpectedOutcome, RecreationVerifier, VerificationStatus};
pub use source_renderer::SourceRenderer;
pub use suite_packer::{SuitePacker, TestFile};
pub use test_assembler::TestAssembler;
pub use test_generator::{GenerationReport, GenerationRun, TargetVerdict, TestGenerator};
pub use trace_recorder::{SealSummary, TraceRecorder};
