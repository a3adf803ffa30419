//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::commands::{diagnose::DiagnoseArgs, gatekeepers::GatekeepersArgs, init::InitArgs, serve::ServeArgs};

#[derive(Parser)]
#[command(name = "mcmcp")]
#[command(about = "MCMCP - Markov Chain Monte Carlo with People", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .mcmcp/config.yaml and .mcmcp/local.yaml)
    #[arg(short, long, global = true, env = "MCMCP_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize MCMCP configuration and database
    Init(InitArgs),

    /// Serve the participant API
    Serve(ServeArgs),

    /// Convergence diagnostics for recorded chains
    Diagnose(DiagnoseArgs),

    /// Inspect gatekeeper density models
    Gatekeepers(GatekeepersArgs),
}
