//! Implementation of the `mcmcp init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::infrastructure::setup::{initialize_project, SetupPaths};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub config_file: PathBuf,
    pub database_file: PathBuf,
    pub gatekeeper_dir: PathBuf,
    pub attention_dir: PathBuf,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        [
            self.message.clone(),
            format!("\n  config:           {}", self.config_file.display()),
            format!("  database:         {}", self.database_file.display()),
            format!("  gatekeepers:      {}", self.gatekeeper_dir.display()),
            format!("  attention checks: {}", self.attention_dir.display()),
        ]
        .join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir().context("Failed to get current directory")?.join(&args.path)
    };

    let paths = SetupPaths::in_dir(target_path);
    let already = paths.is_initialized();
    initialize_project(&paths, args.force).await?;

    let message = match (already, args.force) {
        (true, false) => "Project already initialized; missing pieces restored. Use --force to rewrite the config.",
        (true, true) => "Project reinitialized.",
        (false, _) => "Project initialized.",
    };
    output(
        &InitOutput {
            success: true,
            message: message.to_string(),
            config_file: paths.config_file,
            database_file: paths.database_file,
            gatekeeper_dir: paths.gatekeeper_dir,
            attention_dir: paths.attention_dir,
        },
        json_mode,
    );
    Ok(())
}
