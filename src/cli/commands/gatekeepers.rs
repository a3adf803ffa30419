//! Implementation of the `mcmcp gatekeepers` command.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::output::{format_value, list_table, output, CommandOutput};
use crate::domain::models::Config;
use crate::services::GatekeeperRegistry;

#[derive(Args, Debug)]
pub struct GatekeepersArgs {
    /// Model directory (overrides gatekeeper.dir)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Evaluate every model's log-density at this point (comma separated)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub at: Option<Vec<f64>>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub category: String,
    pub dimensionality: usize,
    pub n_samples: usize,
    pub bandwidth: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_density: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct GatekeepersOutput {
    pub dir: PathBuf,
    pub models: Vec<ModelInfo>,
}

impl CommandOutput for GatekeepersOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["category", "dims", "samples", "bandwidth", "log-density"]);
        for model in &self.models {
            table.add_row(vec![
                model.category.clone(),
                model.dimensionality.to_string(),
                model.n_samples.to_string(),
                format_value(Some(model.bandwidth)),
                format_value(model.log_density),
            ]);
        }
        format!("Gatekeeper models in {}:\n{table}", self.dir.display())
    }
}

pub async fn execute(args: GatekeepersArgs, config: &Config, json_mode: bool) -> Result<()> {
    let dir = args.dir.unwrap_or_else(|| config.gatekeeper.dir.clone());
    let registry = GatekeeperRegistry::load(&dir, &config.task.categories, config.gatekeeper.bandwidth)?;

    let mut models = Vec::new();
    for category in registry.categories() {
        let model = registry.get(category)?;
        let log_density = args.at.as_deref().map(|point| model.density(point)).transpose()?;
        models.push(ModelInfo {
            category: category.to_string(),
            dimensionality: model.dimensionality(),
            n_samples: model.n_samples(),
            bandwidth: model.bandwidth(),
            log_density,
        });
    }

    output(&GatekeepersOutput { dir, models }, json_mode);
    Ok(())
}
