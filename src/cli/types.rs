//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::commands::generate::GenerateArgs;
use crate::cli::commands::init::InitArgs;
use crate::cli::commands::inspect::InspectArgs;

#[derive(Parser, Debug)]
#[command(name = "replaygen")]
#[command(about = "Synthesize regression tests from recorded execution traces", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Extra config file merged above .replaygen/config.yaml
    #[arg(short, long, global = true, env = "REPLAYGEN_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default .replaygen/config.yaml
    Init(InitArgs),

    /// Generate verified test sources from a trace document
    Generate(GenerateArgs),

    /// Show the verdict for every target in a trace document
    Inspect(InspectArgs),
}
