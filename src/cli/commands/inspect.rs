//! Implementation of the `replaygen inspect` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::adapters::runtime::ScriptedReplayRuntime;
use crate::adapters::trace_document::TraceDocument;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;
use crate::services::reconstruction_analyzer::ReconstructionAnalyzer;
use crate::services::recreation_verifier::RecreationVerifier;
use crate::services::test_assembler::TestAssembler;
use crate::services::test_generator::{default_targets, TargetVerdict, TestGenerator};

/// Arguments of `replaygen inspect`.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Trace document (JSON) to inspect
    #[arg(short, long)]
    pub trace: PathBuf,

    /// Only list rejected targets
    #[arg(long)]
    pub rejected_only: bool,
}

/// One analyzed target.
#[derive(Debug, Serialize)]
pub struct InspectRow {
    pub target: String,
    pub method: String,
    pub test: Option<String>,
    pub verdict: String,
    pub accepted: bool,
}

impl From<TargetVerdict> for InspectRow {
    fn from(v: TargetVerdict) -> Self {
        let (verdict, accepted) = match v.verdict {
            Ok(kind) => (format!("assert {}", kind.as_str()), true),
            Err(rejection) => (rejection.to_string(), false),
        };
        Self {
            target: v.target.to_string(),
            method: v.method,
            test: v.test_name,
            verdict,
            accepted,
        }
    }
}

/// Verdict summary printed by `replaygen inspect`.
#[derive(Debug, Serialize)]
pub struct InspectOutput {
    pub executions: usize,
    pub values: usize,
    pub incomplete: usize,
    /// Malformed records dropped while loading.
    pub skipped: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub rows: Vec<InspectRow>,
}

impl CommandOutput for InspectOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "{} execution(s), {} value(s), {} incomplete. {} accepted, {} rejected.",
            self.executions, self.values, self.incomplete, self.accepted, self.rejected
        )];
        if self.skipped > 0 {
            lines.push(format!("{} malformed record(s) skipped.", self.skipped));
        }
        if !self.rows.is_empty() {
            let mut table = list_table(&["target", "method", "test", "verdict"]);
            for row in &self.rows {
                table.add_row(vec![
                    row.target.clone(),
                    truncate(&row.method, 60),
                    row.test.clone().unwrap_or_else(|| "-".to_string()),
                    row.verdict.clone(),
                ]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Analyze every default target without assembling or replaying.
pub fn run(args: &InspectArgs, config: &Config) -> Result<InspectOutput> {
    let document = TraceDocument::from_path(&args.trace)
        .with_context(|| format!("Failed to read trace document {}", args.trace.display()))?;
    let loaded = document
        .load(&config.generation.unmockable_types)
        .context("Failed to record trace document")?;
    let mut trace = loaded.trace;

    let analyzer = ReconstructionAnalyzer::new(
        loaded.catalog.clone(),
        Arc::new(loaded.probe),
        config.generation.clone(),
    );
    let assembler = TestAssembler::new(loaded.catalog, config.generation.float_tolerance);
    // Never called: inspect stops before verification.
    let verifier = RecreationVerifier::new(
        Arc::new(ScriptedReplayRuntime::new()),
        &config.verification,
        config.generation.float_tolerance,
    );
    let mut generator = TestGenerator::new(analyzer, assembler, verifier);

    let targets = default_targets(&trace);
    let verdicts = generator.inspect(&mut trace, &targets)?;
    let accepted = verdicts.iter().filter(|v| v.verdict.is_ok()).count();
    let rejected = verdicts.len() - accepted;
    let rows = verdicts
        .into_iter()
        .filter(|v| !args.rejected_only || v.verdict.is_err())
        .map(InspectRow::from)
        .collect();

    Ok(InspectOutput {
        executions: loaded.summary.executions,
        values: loaded.summary.values,
        incomplete: loaded.summary.incomplete,
        skipped: loaded.summary.skipped,
        accepted,
        rejected,
        rows,
    })
}

/// Load configuration, run, and print.
pub fn execute(args: InspectArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_layered(Path::new("."), config_path)?;
    let output_data = run(&args, &config)?;
    output(&output_data, json_mode);
    Ok(())
}
