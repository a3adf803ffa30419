//! MCMCP CLI entry point.

use clap::Parser;

use mcmcp::cli::{commands, handle_error, load_config, Cli, Commands};
use mcmcp::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli.command, cli.config.as_deref(), cli.json).await {
        handle_error(err, cli.json);
    }
}

async fn run(command: Commands, config_path: Option<&std::path::Path>, json: bool) -> anyhow::Result<()> {
    if let Commands::Init(args) = command {
        return commands::init::execute(args, json).await;
    }

    let config = load_config(config_path)?;

    // Only the server logs to stdout; other commands print their own output there
    let mut log_config = LogConfig::from(&config.logging);
    log_config.enable_stdout = matches!(command, Commands::Serve(_));
    let _logger = LoggerImpl::init(&log_config)?;

    match command {
        Commands::Init(_) => Ok(()),
        Commands::Serve(args) => commands::serve::execute(args, config).await,
        Commands::Diagnose(args) => commands::diagnose::execute(args, &config, json).await,
        Commands::Gatekeepers(args) => commands::gatekeepers::execute(args, &config, json).await,
    }
}
