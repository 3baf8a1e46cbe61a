//! Output formatting utilities for the CLI.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

/// Result of a command, printable for humans or as JSON.
pub trait CommandOutput: Serialize {
    /// Plain text rendering.
    fn to_human(&self) -> String;
    /// Machine readable rendering.
    fn to_json(&self) -> serde_json::Value;
}

/// Print a command result in the selected mode.
pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Borderless table with upper-case headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Truncate a string to a maximum number of characters, appending "..." if
/// truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Error printed when a command fails.
#[derive(Debug, Serialize)]
pub struct ErrorOutput {
    pub success: bool,
    pub error: String,
    pub causes: Vec<String>,
}

impl ErrorOutput {
    /// Capture the error and its cause chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            success: false,
            error: err.to_string(),
            causes: err.chain().skip(1).map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("com.acme.VeryLongName", 10), "com.acm...");
    }

    #[test]
    fn test_error_output_keeps_cause_chain() {
        let err = Err::<(), _>(std::io::Error::other("disk full"))
            .context("Failed to write tests")
            .unwrap_err();
        let report = ErrorOutput::from_error(&err);
        assert!(!report.success);
        assert_eq!(report.error, "Failed to write tests");
        assert_eq!(report.causes, vec!["disk full".to_string()]);
    }
}
