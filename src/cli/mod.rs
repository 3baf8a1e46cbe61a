//! Command-line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

use output::ErrorOutput;

/// Report a failed command and exit with status 1.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let report = ErrorOutput::from_error(&err);
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{{\"error\":\"{err}\"}}"))
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1)
}
