//! Implementation of the `replaygen init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::config::{ConfigLoader, CONFIG_DIR};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

/// Result of `replaygen init`.
#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub config_path: PathBuf,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        if self.success {
            format!("{}\n\nConfig written to {}", self.message, self.config_path.display())
        } else {
            self.message.clone()
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Write the default config below `root`. Returns `None` when a config
/// already exists and `force` is off.
pub async fn write_default_config(root: &Path, force: bool) -> Result<Option<PathBuf>> {
    let dir = root.join(CONFIG_DIR);
    let config_path = dir.join("config.yaml");
    if config_path.exists() && !force {
        return Ok(None);
    }
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    fs::write(&config_path, ConfigLoader::default_yaml()?)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    Ok(Some(config_path))
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let output_data = match write_default_config(&target_path, args.force).await? {
        Some(config_path) => InitOutput {
            success: true,
            message: if args.force {
                "Project reinitialized successfully.".to_string()
            } else {
                "Project initialized successfully.".to_string()
            },
            config_path,
        },
        None => InitOutput {
            success: false,
            message: "Project already initialized. Use --force to overwrite the config.".to_string(),
            config_path: target_path.join(CONFIG_DIR).join("config.yaml"),
        },
    };

    output(&output_data, json_mode);
    Ok(())
}
