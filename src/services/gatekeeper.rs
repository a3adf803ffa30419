//! Gatekeeper density models.
//!
//! A Gaussian kernel density estimate per category, fitted offline from
//! exemplar points. Used to screen or replace human likelihood judgments and
//! to draw independence proposals.

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::domain::errors::{DomainError, DomainResult};

/// On-disk parameters of a fitted density model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperParameters {
    pub tree_data: Vec<Vec<f64>>,
    pub bandwidth: f64,
    pub dimensionality: usize,
    pub n_samples: usize,
}

/// Numerically stable `ln(Σ exp(xᵢ))`.
///
/// Returns `-inf` for an empty slice or when every term is `-inf`.
pub fn log_sum_exp(terms: &[f64]) -> f64 {
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    max + terms.iter().map(|t| (t - max).exp()).sum::<f64>().ln()
}

/// Gaussian KDE over a category's exemplar points.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    centers: Vec<Vec<f64>>,
    bandwidth: f64,
    dimensionality: usize,
    n_samples: usize,
    /// `-d·ln h - (d/2)·ln 2π`
    log_normalizer: f64,
}

impl GaussianKde {
    /// Build a model, optionally replacing the fitted bandwidth.
    pub fn new(params: GatekeeperParameters, bandwidth_override: Option<f64>) -> DomainResult<Self> {
        let bandwidth = bandwidth_override.unwrap_or(params.bandwidth);
        if !bandwidth.is_finite() || bandwidth <= 0.0 {
            return Err(DomainError::ValidationFailed(format!(
                "bandwidth must be positive, got {bandwidth}"
            )));
        }
        if params.tree_data.is_empty() || params.n_samples == 0 {
            return Err(DomainError::ValidationFailed("density model has no exemplars".to_string()));
        }
        if let Some(bad) = params.tree_data.iter().find(|p| p.len() != params.dimensionality) {
            return Err(DomainError::DimensionMismatch {
                expected: params.dimensionality,
                actual: bad.len(),
            });
        }

        let d = params.dimensionality as f64;
        let log_normalizer = -d * bandwidth.ln() - (d / 2.0) * (2.0 * PI).ln();

        Ok(Self {
            centers: params.tree_data,
            bandwidth,
            dimensionality: params.dimensionality,
            n_samples: params.n_samples,
            log_normalizer,
        })
    }

    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    fn check_dim(&self, x: &[f64]) -> DomainResult<()> {
        if x.len() == self.dimensionality {
            Ok(())
        } else {
            Err(DomainError::DimensionMismatch {
                expected: self.dimensionality,
                actual: x.len(),
            })
        }
    }

    /// Log-density at `x`. Finite or `-inf`; never NaN for finite `x`.
    pub fn density(&self, x: &[f64]) -> DomainResult<f64> {
        self.check_dim(x)?;
        let h2 = self.bandwidth * self.bandwidth;
        let terms: Vec<f64> = self
            .centers
            .iter()
            .map(|center| {
                let sq: f64 = x.iter().zip(center).map(|(a, b)| (a - b).powi(2)).sum();
                -0.5 * sq / h2 + self.log_normalizer
            })
            .collect();
        Ok(log_sum_exp(&terms) - (self.n_samples as f64).ln())
    }

    /// Boltzmann probability of moving from `current` to `proposal`.
    ///
    /// `exp(dp/T) / (exp(dc/T) + exp(dp/T))`, evaluated as a logistic.
    pub fn acceptance(&self, current: &[f64], proposal: &[f64], temperature: f64) -> DomainResult<f64> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(DomainError::ValidationFailed(format!(
                "temperature must be positive, got {temperature}"
            )));
        }
        let dc = self.density(current)?;
        let dp = self.density(proposal)?;
        if dc == dp {
            return Ok(0.5);
        }
        Ok(1.0 / (1.0 + ((dc - dp) / temperature).exp()))
    }

    /// Draw from the mixture: a random exemplar plus `N(0, h²)` noise.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let Some(center) = self.centers.choose(rng) else {
            return vec![0.0; self.dimensionality];
        };
        center
            .iter()
            .map(|c| c + self.bandwidth * rng.sample::<f64, _>(StandardNormal))
            .collect()
    }
}

/// One density model per category, shared read-only.
#[derive(Debug, Clone, Default)]
pub struct GatekeeperRegistry {
    models: HashMap<String, Arc<GaussianKde>>,
}

impl GatekeeperRegistry {
    /// Load `<dir>/<category>.json` for every category.
    ///
    /// Any missing or malformed model is fatal for the task.
    pub fn load(dir: &Path, categories: &[String], bandwidth_override: Option<f64>) -> DomainResult<Self> {
        let mut models = HashMap::with_capacity(categories.len());
        for category in categories {
            let path = dir.join(format!("{category}.json"));
            let load_error = |reason: String| DomainError::GatekeeperLoad {
                category: category.clone(),
                reason,
            };

            let raw = std::fs::read_to_string(&path)
                .map_err(|e| load_error(format!("{}: {e}", path.display())))?;
            let params: GatekeeperParameters =
                serde_json::from_str(&raw).map_err(|e| load_error(e.to_string()))?;
            let model = GaussianKde::new(params, bandwidth_override).map_err(|e| load_error(e.to_string()))?;

            info!(
                category = %category,
                dimensionality = model.dimensionality(),
                n_samples = model.n_samples(),
                bandwidth = model.bandwidth(),
                "loaded gatekeeper model"
            );
            models.insert(category.clone(), Arc::new(model));
        }
        Ok(Self { models })
    }

    pub fn from_models(models: HashMap<String, GaussianKde>) -> Self {
        Self {
            models: models.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        }
    }

    pub fn get(&self, category: &str) -> DomainResult<&GaussianKde> {
        self.models
            .get(category)
            .map(AsRef::as_ref)
            .ok_or_else(|| DomainError::UnknownCategory(category.to_string()))
    }

    /// Categories with a loaded model, sorted.
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<&str> = self.models.keys().map(String::as_str).collect();
        categories.sort_unstable();
        categories
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
