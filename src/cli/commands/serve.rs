//! Implementation of the `mcmcp serve` command.

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::adapters::http::{AppState, McmcpHttpServer};
use crate::domain::models::Config;
use crate::infrastructure::setup::build_engine;

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Host to bind to (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides server.port)
    #[arg(long, short)]
    pub port: Option<u16>,
}

pub async fn execute(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let server_config = config.server.clone();
    let engine = build_engine(config).await?;
    let state = AppState {
        task: engine.config.task.name.clone(),
        trials: engine.trials,
        consensus: engine.consensus,
    };

    McmcpHttpServer::new(state, server_config)
        .serve_with_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
            }
        })
        .await
}
