//! Implementation of the `replaygen generate` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;

use crate::adapters::runtime::{ProcessReplayRuntime, ScriptedReplayRuntime};
use crate::adapters::suite_writer::SuiteWriter;
use crate::adapters::trace_document::TraceDocument;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::{Config, ExecutionTrace};
use crate::domain::ports::ReplayRuntime;
use crate::infrastructure::config::ConfigLoader;
use crate::services::reconstruction_analyzer::ReconstructionAnalyzer;
use crate::services::recreation_verifier::RecreationVerifier;
use crate::services::suite_packer::SuitePacker;
use crate::services::test_assembler::TestAssembler;
use crate::services::test_generator::{default_targets, GenerationReport, TestGenerator};

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Trace document (JSON) to generate tests from
    #[arg(short, long)]
    pub trace: PathBuf,

    /// Output directory (overrides output.dir)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Command that replays a test case (overrides verification.command)
    #[arg(long)]
    pub replay_command: Option<String>,

    /// Verify against the recorded outcomes instead of a live replay
    #[arg(long)]
    pub dry_run: bool,

    /// Package prefixes of the unit under test (overrides generation.namespaces)
    #[arg(short, long, value_delimiter = ',')]
    pub namespace: Vec<String>,
}

/// Result of `replaygen generate`.
#[derive(Debug, Serialize)]
pub struct GenerateOutput {
    pub report: GenerationReport,
    pub output_dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub dry_run: bool,
}

impl CommandOutput for GenerateOutput {
    fn to_human(&self) -> String {
        let report = &self.report;
        let mut lines = vec![format!(
            "Generated {} test case(s) in {} file(s) from {} target(s){}",
            report.recreated,
            self.files.len(),
            report.considered,
            if self.dry_run { " (dry run)" } else { "" }
        )];
        if report.integrity_faults > 0 {
            lines.push(format!(
                "Skipped {} target(s) with bad trace records",
                report.integrity_faults
            ));
        }
        if !report.rejections.is_empty() {
            let mut table = list_table(&["reason", "targets"]);
            for (reason, count) in &report.rejections {
                table.add_row(vec![reason.to_string(), count.to_string()]);
            }
            lines.push(String::new());
            lines.push(table.to_string());
        }
        for file in &self.files {
            lines.push(format!("  - {}", file.display()));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

fn replay_runtime(
    args: &GenerateArgs,
    config: &Config,
    trace: &ExecutionTrace,
) -> Result<Arc<dyn ReplayRuntime>> {
    if args.dry_run {
        return Ok(Arc::new(ScriptedReplayRuntime::echoing(trace)?));
    }
    let Some(command) = args
        .replay_command
        .as_deref()
        .or(config.verification.command.as_deref())
    else {
        bail!("No replay command configured. Pass --replay-command, set verification.command, or use --dry-run");
    };
    Ok(Arc::new(ProcessReplayRuntime::from_command_line(command)?))
}

/// Load, generate, pack and write. Returns what was written.
pub async fn run(args: &GenerateArgs, mut config: Config) -> Result<GenerateOutput> {
    if !args.namespace.is_empty() {
        config.generation.namespaces.clone_from(&args.namespace);
    }
    let document = TraceDocument::from_path(&args.trace)
        .with_context(|| format!("Failed to read trace document {}", args.trace.display()))?;
    let loaded = document
        .load(&config.generation.unmockable_types)
        .context("Failed to record trace document")?;
    let runtime = replay_runtime(args, &config, &loaded.trace)?;
    let mut trace = loaded.trace;

    let analyzer = ReconstructionAnalyzer::new(
        loaded.catalog.clone(),
        Arc::new(loaded.probe),
        config.generation.clone(),
    );
    let assembler = TestAssembler::new(loaded.catalog, config.generation.float_tolerance);
    let verifier = RecreationVerifier::new(
        runtime,
        &config.verification,
        config.generation.float_tolerance,
    );
    let mut generator = TestGenerator::new(analyzer, assembler, verifier);

    let targets = default_targets(&trace);
    let run = generator.generate(&mut trace, &targets).await?;

    let files = SuitePacker::new(&config.output).pack(run.cases);
    let output_dir = args
        .out
        .clone()
        .unwrap_or_else(|| Path::new(&config.output.dir).to_path_buf());
    let written = SuiteWriter::new(&output_dir)
        .write_all(&files)
        .await
        .context("Failed to write generated tests")?;

    Ok(GenerateOutput {
        report: run.report,
        output_dir,
        files: written,
        dry_run: args.dry_run,
    })
}

pub async fn execute(args: GenerateArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = ConfigLoader::load_layered(Path::new("."), config_path)?;
    let output_data = run(&args, config).await?;
    output(&output_data, json_mode);
    Ok(())
}
