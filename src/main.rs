//! Replaygen CLI entry point.

use std::path::Path;

use clap::Parser;

use replaygen::cli::{commands, handle_error, Cli, Commands};
use replaygen::domain::models::LoggingConfig;
use replaygen::infrastructure::config::ConfigLoader;
use replaygen::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A broken config is reported by the command itself; logging falls back
    // to defaults until then.
    let logging = ConfigLoader::load_layered(Path::new("."), cli.config.as_deref())
        .map(|config| config.logging)
        .unwrap_or_else(|_| LoggingConfig::default());
    let _logger = match LoggerImpl::init(&LogConfig::from_settings(&logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("Warning: logging disabled: {err:#}");
            None
        }
    };

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Generate(args) => commands::generate::execute(args, config_path, cli.json).await,
        Commands::Inspect(args) => commands::inspect::execute(args, config_path, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
