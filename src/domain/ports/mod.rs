//! Port trait definitions (Hexagonal Architecture)
//!
//! Interfaces that adapters implement so the decision engine stays
//! independent of how types are described, how constructors are probed and
//! how assembled tests are replayed:
//! - TypeCatalog: method descriptors and structural type facts
//! - ConstructionProbe: live invocation of constructors and factories
//! - ReplayRuntime: live re-execution of an assembled test case

pub mod construction_probe;
pub mod replay_runtime;
pub mod type_catalog;

pub use construction_probe::{ConstructionProbe, ProbeOutcome};
pub use replay_runtime::{ReplayOutcome, ReplayRuntime};
pub use type_catalog::TypeCatalog;
