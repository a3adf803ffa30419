//! Implementation of the `mcmcp diagnose` command.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;

use crate::adapters::sqlite::{initialize_database, SqliteChainLog};
use crate::cli::output::{format_value, list_table, output, verdict, CommandOutput};
use crate::domain::models::{ChainKey, Config};
use crate::services::convergence::{GewekeVerdict, DEFAULT_THRESHOLD};
use crate::services::{ChainComparison, DiagnosticsService};

#[derive(Args, Debug)]
pub struct DiagnoseArgs {
    /// Chain owner: a participant id or `team-<n>`
    pub owner: String,

    /// Chain task: a category name or the task name
    pub task: String,

    /// Replica to diagnose
    #[arg(long, short, default_value_t = 1)]
    pub replica: u32,

    /// Second replica of the same owner and task for R-hat
    #[arg(long)]
    pub against: Option<u32>,

    /// Geweke |Z| threshold
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f64,

    /// R-hat threshold when comparing two chains
    #[arg(long, default_value_t = 1.1)]
    pub r_hat_threshold: f64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnoseOutput {
    Single {
        chain: String,
        samples: usize,
        geweke: GewekeVerdict,
    },
    Compare {
        chain_a: String,
        chain_b: String,
        converged: bool,
        comparison: ChainComparison,
    },
}

fn geweke_table(verdict_for: &GewekeVerdict) -> String {
    let mut table = list_table(&["dim", "z", "status"]);
    for dimension in &verdict_for.dimensions {
        table.add_row(vec![
            dimension.dimension.to_string(),
            format_value(dimension.z_score),
            verdict(dimension.converged),
        ]);
    }
    table.to_string()
}

impl CommandOutput for DiagnoseOutput {
    fn to_human(&self) -> String {
        match self {
            Self::Single { chain, samples, geweke } => format!(
                "Chain {chain}: {samples} accepted samples, {}\n{}",
                verdict(geweke.converged),
                geweke_table(geweke)
            ),
            Self::Compare {
                chain_a,
                chain_b,
                converged,
                comparison,
            } => {
                let mut lines = vec![format!(
                    "Chains {chain_a} and {chain_b}: {} common samples, {}",
                    comparison.samples,
                    verdict(*converged)
                )];
                let mut table = list_table(&["dim", "r-hat"]);
                for (dimension, r_hat) in comparison.r_hat.iter().enumerate() {
                    table.add_row(vec![dimension.to_string(), format_value(Some(*r_hat))]);
                }
                lines.push(table.to_string());
                for (chain, geweke) in [(chain_a, &comparison.geweke_a), (chain_b, &comparison.geweke_b)] {
                    match geweke {
                        Some(geweke) => lines.push(format!("\nGeweke {chain}:\n{}", geweke_table(geweke))),
                        None => lines.push(format!("\nGeweke {chain}: too few samples")),
                    }
                }
                lines.join("\n")
            }
        }
    }
}

pub async fn execute(args: DiagnoseArgs, config: &Config, json_mode: bool) -> Result<()> {
    let pool = initialize_database(&config.database)
        .await
        .with_context(|| format!("Failed to open database {}", config.database.path))?;
    let diagnostics = DiagnosticsService::new(Arc::new(SqliteChainLog::new(pool)), config.task.variant);
    let key = ChainKey::new(&args.owner, &args.task, args.replica);

    let result = match args.against {
        Some(other) => {
            let other_key = ChainKey::new(&args.owner, &args.task, other);
            let comparison = diagnostics.compare(&key, &other_key, args.threshold).await?;
            DiagnoseOutput::Compare {
                chain_a: key.to_string(),
                chain_b: other_key.to_string(),
                converged: comparison.converged(args.r_hat_threshold),
                comparison,
            }
        }
        None => {
            let samples = diagnostics.accepted_states(&key).await?.len();
            let geweke = diagnostics
                .geweke(&key, args.threshold)
                .await
                .with_context(|| format!("Chain {key} has {samples} accepted samples"))?;
            DiagnoseOutput::Single {
                chain: key.to_string(),
                samples,
                geweke,
            }
        }
    };

    output(&result, json_mode);
    Ok(())
}
