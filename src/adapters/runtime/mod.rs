//! Replay runtimes and construction probes.

pub mod process;
pub mod scripted;

pub use process::ProcessReplayRuntime;
pub use scripted::{ScriptedProbe, ScriptedReplayRuntime};
