//! Convergence diagnostics for MCMC chains.
//!
//! Two-chain Gelman-Rubin R-hat and the Geweke Z-score with batch-means
//! variance estimates. Pure functions over in-memory samples.

use serde::Serialize;
use thiserror::Error;

/// Input validation failures for the diagnostics.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiagnosticsError {
    #[error("Chains are empty")]
    EmptyChain,

    #[error("Chain lengths differ: {0} vs {1}")]
    LengthMismatch(usize, usize),

    #[error("Need more than one sample per chain, got {0}")]
    TooFewSamples(usize),

    #[error("Inconsistent shape at sample {index}: {reason}")]
    ShapeMismatch { index: usize, reason: String },

    #[error("Invalid window fractions: frac1={frac1}, frac2={frac2}")]
    InvalidFractions { frac1: String, frac2: String },

    #[error("Windows too small for n={n}: first window {first}, second window {second}")]
    WindowTooSmall { n: usize, first: usize, second: usize },
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance; NaN for fewer than two values.
fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

// ============================================================================
// Gelman-Rubin
// ============================================================================

/// R-hat for two chains of `sample × parameter group × value`.
///
/// Returns one value per `(group, value)`. Identical constant chains give
/// exactly 1.0; zero within-chain variance with a between-chain difference
/// gives NaN.
pub fn gelman_rubin(chain_a: &[Vec<Vec<f64>>], chain_b: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<f64>>, DiagnosticsError> {
    if chain_a.is_empty() || chain_b.is_empty() {
        return Err(DiagnosticsError::EmptyChain);
    }
    if chain_a.len() != chain_b.len() {
        return Err(DiagnosticsError::LengthMismatch(chain_a.len(), chain_b.len()));
    }
    let n = chain_a.len();
    if n <= 1 {
        return Err(DiagnosticsError::TooFewSamples(n));
    }

    let groups: Vec<usize> = chain_a[0].iter().map(Vec::len).collect();
    if groups.is_empty() || groups.contains(&0) {
        return Err(DiagnosticsError::ShapeMismatch {
            index: 0,
            reason: "no parameter values".to_string(),
        });
    }
    for (index, sample) in chain_a.iter().chain(chain_b).enumerate() {
        let shape: Vec<usize> = sample.iter().map(Vec::len).collect();
        if shape != groups {
            return Err(DiagnosticsError::ShapeMismatch {
                index: index % n,
                reason: format!("expected shape {groups:?}, got {shape:?}"),
            });
        }
    }

    let series = |chain: &[Vec<Vec<f64>>], j: usize, l: usize| -> Vec<f64> { chain.iter().map(|s| s[j][l]).collect() };

    let n_f = n as f64;
    let r_hat = groups
        .iter()
        .enumerate()
        .map(|(j, &k)| {
            (0..k)
                .map(|l| {
                    let a = series(chain_a, j, l);
                    let b = series(chain_b, j, l);
                    let within = (sample_variance(&a) + sample_variance(&b)) / 2.0;
                    let between_over_n = (mean(&a) - mean(&b)).powi(2) / 2.0;
                    let pooled = (n_f - 1.0) / n_f * within + between_over_n;
                    if within > 0.0 {
                        (pooled / within).sqrt()
                    } else if pooled == 0.0 {
                        1.0
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();
    Ok(r_hat)
}

// ============================================================================
// Geweke
// ============================================================================

/// Variance of the mean of a possibly autocorrelated series, by batch means.
///
/// Falls back to `s²/n` when the series is shorter than two samples per
/// batch; NaN when fewer than two samples.
pub fn batch_means_variance(series: &[f64], n_batches: usize) -> f64 {
    let n = series.len();
    if n < 2 * n_batches || n_batches < 2 {
        if n < 2 {
            return f64::NAN;
        }
        return sample_variance(series) / n as f64;
    }

    let batch_size = n / n_batches;
    let batch_means: Vec<f64> = (0..n_batches)
        .map(|i| {
            let start = i * batch_size;
            let end = if i == n_batches - 1 { n } else { (i + 1) * batch_size };
            mean(&series[start..end])
        })
        .collect();

    sample_variance(&batch_means) / batch_means.len() as f64
}

/// Geweke Z-score per dimension, comparing the first `frac1` of the chain
/// against the last `frac2`.
///
/// A dimension is `None` when its variance cannot be estimated and the
/// window means differ; equal window means always give exactly 0.
pub fn geweke(chain: &[Vec<f64>], frac1: f64, frac2: f64, n_batches: usize) -> Result<Vec<Option<f64>>, DiagnosticsError> {
    let Some(first) = chain.first() else {
        return Err(DiagnosticsError::EmptyChain);
    };
    let dimension = first.len();
    if dimension == 0 {
        return Err(DiagnosticsError::ShapeMismatch {
            index: 0,
            reason: "points must have at least one dimension".to_string(),
        });
    }
    if let Some((index, sample)) = chain.iter().enumerate().find(|(_, s)| s.len() != dimension) {
        return Err(DiagnosticsError::ShapeMismatch {
            index,
            reason: format!("expected {dimension} dimensions, got {}", sample.len()),
        });
    }
    if !(frac1 > 0.0 && frac1 < 1.0 && frac2 > 0.0 && frac2 < 1.0 && frac1 + frac2 <= 1.0) {
        return Err(DiagnosticsError::InvalidFractions {
            frac1: frac1.to_string(),
            frac2: frac2.to_string(),
        });
    }

    let n = chain.len();
    let n1 = (n as f64 * frac1).floor() as usize;
    let second_start = (n as f64 * (1.0 - frac2)).floor() as usize;
    let n2 = n - second_start;
    if n1 < 2 || n2 < 2 || n1 + n2 > n {
        return Err(DiagnosticsError::WindowTooSmall { n, first: n1, second: n2 });
    }

    let scores = (0..dimension)
        .map(|d| {
            let series: Vec<f64> = chain.iter().map(|s| s[d]).collect();
            let window_a = &series[..n1];
            let window_b = &series[second_start..];
            let mean_a = mean(window_a);
            let mean_b = mean(window_b);

            if mean_a == mean_b {
                return Some(0.0);
            }
            let var_a = batch_means_variance(window_a, n_batches);
            let var_b = batch_means_variance(window_b, n_batches);
            let total = var_a + var_b;
            if total.is_nan() || total <= 0.0 {
                None
            } else {
                Some((mean_a - mean_b) / total.sqrt())
            }
        })
        .collect();
    Ok(scores)
}

/// Convergence verdict for one dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionVerdict {
    pub dimension: usize,
    /// Rounded to four decimals
    pub z_score: Option<f64>,
    pub converged: bool,
}

/// Geweke-based convergence verdict for a chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GewekeVerdict {
    pub converged: bool,
    pub dimensions: Vec<DimensionVerdict>,
}

pub const VERDICT_FRAC1: f64 = 0.2;
pub const VERDICT_FRAC2: f64 = 0.5;
pub const VERDICT_BATCHES: usize = 20;
pub const DEFAULT_THRESHOLD: f64 = 1.96;

/// Every dimension converged when `|Z| < threshold`.
pub fn geweke_verdict(chain: &[Vec<f64>], threshold: f64) -> Result<GewekeVerdict, DiagnosticsError> {
    let scores = geweke(chain, VERDICT_FRAC1, VERDICT_FRAC2, VERDICT_BATCHES)?;
    let dimensions: Vec<DimensionVerdict> = scores
        .into_iter()
        .enumerate()
        .map(|(dimension, z)| DimensionVerdict {
            dimension,
            z_score: z.map(|z| (z * 10_000.0).round() / 10_000.0),
            converged: z.is_some_and(|z| z.abs() < threshold),
        })
        .collect();
    Ok(GewekeVerdict {
        converged: dimensions.iter().all(|d| d.converged),
        dimensions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(chain: &[f64]) -> Vec<Vec<Vec<f64>>> {
        chain.iter().map(|v| vec![vec![*v]]).collect()
    }

    #[test]
    fn test_gelman_rubin_identical_constant_chains() {
        let a = wrap(&[3.0; 10]);
        let r = gelman_rubin(&a, &a).unwrap();
        assert_eq!(r, vec![vec![1.0]]);
    }

    #[test]
    fn test_gelman_rubin_constant_but_different_chains_is_nan() {
        let r = gelman_rubin(&wrap(&[1.0; 5]), &wrap(&[2.0; 5])).unwrap();
        assert!(r[0][0].is_nan());
    }

    #[test]
    fn test_gelman_rubin_known_value() {
        let a = wrap(&[1.0, 2.0, 3.0, 4.0]);
        let b = wrap(&[2.0, 3.0, 4.0, 5.0]);
        // W = 5/3, B/n = 0.5, V = 0.75 * 5/3 + 0.5 = 1.75
        let expected = (1.75f64 / (5.0 / 3.0)).sqrt();
        let r = gelman_rubin(&a, &b).unwrap();
        assert!((r[0][0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_gelman_rubin_rejects_bad_input() {
        assert_eq!(gelman_rubin(&[], &[]), Err(DiagnosticsError::EmptyChain));
        assert_eq!(
            gelman_rubin(&wrap(&[1.0, 2.0]), &wrap(&[1.0])),
            Err(DiagnosticsError::LengthMismatch(2, 1))
        );
        assert_eq!(
            gelman_rubin(&wrap(&[1.0]), &wrap(&[1.0])),
            Err(DiagnosticsError::TooFewSamples(1))
        );
        let ragged = vec![vec![vec![1.0]], vec![vec![1.0, 2.0]]];
        assert!(matches!(
            gelman_rubin(&ragged, &ragged),
            Err(DiagnosticsError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_batch_means_fallback_and_nan() {
        assert!(batch_means_variance(&[1.0], 30).is_nan());
        let series = [1.0, 2.0, 3.0, 4.0];
        let expected = (5.0 / 3.0) / 4.0;
        assert!((batch_means_variance(&series, 30) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_batch_means_last_batch_absorbs_remainder() {
        // 5 values, 2 batches of size 2: [0, 0] and [1, 1, 1] -> means 0 and 1
        let series = [0.0, 0.0, 1.0, 1.0, 1.0];
        let expected = 0.5 / 2.0;
        assert!((batch_means_variance(&series, 2) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_geweke_equal_window_means_is_zero() {
        let chain: Vec<Vec<f64>> = vec![vec![5.0, 1.0]; 40];
        let z = geweke(&chain, 0.1, 0.5, 30).unwrap();
        assert_eq!(z, vec![Some(0.0), Some(0.0)]);
    }

    #[test]
    fn test_geweke_undefined_when_variance_vanishes() {
        let mut chain: Vec<Vec<f64>> = vec![vec![0.0]; 10];
        chain.extend(vec![vec![1.0]; 10]);
        let z = geweke(&chain, 0.2, 0.5, 20).unwrap();
        assert_eq!(z, vec![None]);
    }

    #[test]
    fn test_geweke_validation() {
        let chain: Vec<Vec<f64>> = (0..10).map(|i| vec![f64::from(i)]).collect();
        assert!(matches!(
            geweke(&chain, 0.6, 0.5, 30),
            Err(DiagnosticsError::InvalidFractions { .. })
        ));
        assert!(matches!(
            geweke(&chain, 0.1, 0.5, 30),
            Err(DiagnosticsError::WindowTooSmall { n: 10, first: 1, second: 5 })
        ));
        assert_eq!(geweke(&[], 0.1, 0.5, 30), Err(DiagnosticsError::EmptyChain));
    }

    #[test]
    fn test_verdict_on_stationary_chain() {
        let chain: Vec<Vec<f64>> = (0..200).map(|i| vec![if i % 2 == 0 { 1.0 } else { -1.0 }]).collect();
        let verdict = geweke_verdict(&chain, DEFAULT_THRESHOLD).unwrap();
        assert!(verdict.converged);
        assert_eq!(verdict.dimensions.len(), 1);
    }

    #[test]
    fn test_verdict_on_trending_chain() {
        let chain: Vec<Vec<f64>> = (0..200).map(|i| vec![f64::from(i) + if i % 2 == 0 { 0.5 } else { -0.5 }]).collect();
        let verdict = geweke_verdict(&chain, DEFAULT_THRESHOLD).unwrap();
        assert!(!verdict.converged);
    }
}
