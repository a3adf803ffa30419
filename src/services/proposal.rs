//! Proposal generation for MCMCP chains.
//!
//! Uniform initialisation, Gaussian random-walk steps with a diagonal or full
//! covariance, wrap-around range clamping, and GSP slice grids.

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::TaskConfig;

/// Covariance of the random-walk proposal, stored as its square-root factor.
#[derive(Debug, Clone)]
pub struct ProposalCovariance {
    factor: CovarianceFactor,
}

#[derive(Debug, Clone)]
enum CovarianceFactor {
    /// Per-dimension standard deviations
    Diagonal(Vec<f64>),
    /// Lower Cholesky factor
    Full(DMatrix<f64>),
}

impl ProposalCovariance {
    /// The task's configured covariance: full when given, diagonal otherwise.
    pub fn for_task(task: &TaskConfig) -> DomainResult<Self> {
        let Some(rows) = &task.proposal_covariance else {
            return Self::diagonal(&task.effective_variances());
        };
        if rows.len() != task.dim || rows.iter().any(|row| row.len() != task.dim) {
            return Err(DomainError::InvalidCovariance(format!(
                "covariance must be {0}x{0} for dim {0}",
                task.dim
            )));
        }
        Self::full(DMatrix::from_row_iterator(
            task.dim,
            task.dim,
            rows.iter().flatten().copied(),
        ))
    }

    pub fn diagonal(variances: &[f64]) -> DomainResult<Self> {
        if variances.is_empty() {
            return Err(DomainError::InvalidCovariance("covariance has no dimensions".to_string()));
        }
        if let Some(bad) = variances.iter().find(|v| !v.is_finite() || **v <= 0.0) {
            return Err(DomainError::InvalidCovariance(format!(
                "diagonal entry {bad} is not positive"
            )));
        }
        Ok(Self {
            factor: CovarianceFactor::Diagonal(variances.iter().map(|v| v.sqrt()).collect()),
        })
    }

    /// Full covariance; must be symmetric positive definite.
    pub fn full(matrix: DMatrix<f64>) -> DomainResult<Self> {
        if !matrix.is_square() || matrix.nrows() == 0 {
            return Err(DomainError::InvalidCovariance(format!(
                "covariance must be a non-empty square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if matrix != matrix.transpose() {
            return Err(DomainError::InvalidCovariance("covariance is not symmetric".to_string()));
        }
        let cholesky = Cholesky::new(matrix)
            .ok_or_else(|| DomainError::InvalidCovariance("covariance is not positive definite".to_string()))?;
        Ok(Self {
            factor: CovarianceFactor::Full(cholesky.l()),
        })
    }

    pub fn dim(&self) -> usize {
        match &self.factor {
            CovarianceFactor::Diagonal(std_devs) => std_devs.len(),
            CovarianceFactor::Full(lower) => lower.nrows(),
        }
    }

    fn perturbation<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        match &self.factor {
            CovarianceFactor::Diagonal(std_devs) => std_devs
                .iter()
                .map(|sd| sd * rng.sample::<f64, _>(StandardNormal))
                .collect(),
            CovarianceFactor::Full(lower) => {
                let dim = lower.nrows();
                let z = DVector::from_iterator(dim, (0..dim).map(|_| rng.sample::<f64, _>(StandardNormal)));
                (lower * z).iter().copied().collect()
            }
        }
    }
}

/// `dim` independent uniform draws, one per `[min, max]` range.
pub fn init_uniform<R: Rng + ?Sized>(rng: &mut R, dim: usize, ranges: &[(f64, f64)]) -> DomainResult<Vec<f64>> {
    if ranges.len() != dim {
        return Err(DomainError::DimensionMismatch {
            expected: dim,
            actual: ranges.len(),
        });
    }
    ranges
        .iter()
        .map(|&(min, max)| {
            if min < max {
                Ok(rng.gen_range(min..max))
            } else if (min - max).abs() < f64::EPSILON {
                Ok(min)
            } else {
                Err(DomainError::ValidationFailed(format!("invalid range [{min}, {max}]")))
            }
        })
        .collect()
}

/// Multivariate normal perturbation of `current`.
pub fn gaussian_step<R: Rng + ?Sized>(
    rng: &mut R,
    current: &[f64],
    covariance: &ProposalCovariance,
) -> DomainResult<Vec<f64>> {
    if current.len() != covariance.dim() {
        return Err(DomainError::DimensionMismatch {
            expected: covariance.dim(),
            actual: current.len(),
        });
    }
    let noise = covariance.perturbation(rng);
    Ok(current.iter().zip(noise).map(|(x, dx)| x + dx).collect())
}

/// Wrap one value into `[min, max]`.
///
/// Values below `min` re-enter from `max`, values above `max` from `min`.
pub fn wrap_value(value: f64, min: f64, max: f64) -> f64 {
    let width = max - min;
    if width <= 0.0 {
        return min;
    }
    if value < min {
        max - (min - value) % width
    } else if value > max {
        min + (value - max) % width
    } else {
        value
    }
}

/// Wrap every component of `vector` into `[min, max]`.
pub fn clamp_wrap(vector: &[f64], min: f64, max: f64) -> Vec<f64> {
    vector.iter().map(|&v| wrap_value(v, min, max)).collect()
}

/// Wrap each component into its own range.
pub fn clamp_wrap_ranges(vector: &[f64], ranges: &[(f64, f64)]) -> DomainResult<Vec<f64>> {
    if vector.len() != ranges.len() {
        return Err(DomainError::DimensionMismatch {
            expected: ranges.len(),
            actual: vector.len(),
        });
    }
    Ok(vector
        .iter()
        .zip(ranges)
        .map(|(&v, &(min, max))| wrap_value(v, min, max))
        .collect())
}

/// L2 distance between two states.
pub fn euclidean_distance(a: &[f64], b: &[f64]) -> DomainResult<f64> {
    if a.len() != b.len() {
        return Err(DomainError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt())
}

/// Candidate states along one dimension of the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceGrid {
    pub states: Vec<Vec<f64>>,
    pub values: Vec<f64>,
}

/// `resolution` evenly spaced points over `range` along `dim_index`.
pub fn slice_grid(current: &[f64], dim_index: usize, range: (f64, f64), resolution: usize) -> DomainResult<SliceGrid> {
    if dim_index >= current.len() {
        return Err(DomainError::ValidationFailed(format!(
            "dimension {dim_index} out of bounds for a {}-dimensional state",
            current.len()
        )));
    }
    if resolution < 2 {
        return Err(DomainError::ValidationFailed(format!(
            "slice resolution must be at least 2, got {resolution}"
        )));
    }
    let (min, max) = range;
    let values: Vec<f64> = (0..resolution)
        .map(|i| min + (i as f64 / (resolution - 1) as f64) * (max - min))
        .collect();
    let states = values
        .iter()
        .map(|&value| {
            let mut state = current.to_vec();
            state[dim_index] = value;
            state
        })
        .collect();
    Ok(SliceGrid { states, values })
}

/// Random-walk proposal for one chain: step then wrap.
#[derive(Debug, Clone)]
pub struct ProposalGenerator {
    ranges: Vec<(f64, f64)>,
    covariance: ProposalCovariance,
}

impl ProposalGenerator {
    pub fn new(ranges: Vec<(f64, f64)>, covariance: ProposalCovariance) -> DomainResult<Self> {
        if ranges.len() != covariance.dim() {
            return Err(DomainError::DimensionMismatch {
                expected: ranges.len(),
                actual: covariance.dim(),
            });
        }
        Ok(Self { ranges, covariance })
    }

    pub fn dim(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[(f64, f64)] {
        &self.ranges
    }

    pub fn initial_state(&self) -> DomainResult<Vec<f64>> {
        init_uniform(&mut rand::thread_rng(), self.dim(), &self.ranges)
    }

    pub fn propose(&self, current: &[f64]) -> DomainResult<Vec<f64>> {
        let stepped = gaussian_step(&mut rand::thread_rng(), current, &self.covariance)?;
        clamp_wrap_ranges(&stepped, &self.ranges)
    }

    /// Bring an externally produced state back into range.
    pub fn wrap(&self, state: &[f64]) -> DomainResult<Vec<f64>> {
        clamp_wrap_ranges(state, &self.ranges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_clamp_wrap_examples() {
        assert!((wrap_value(-15.0, 0.0, 10.0) - 5.0).abs() < 1e-12);
        assert!((wrap_value(17.0, 0.0, 10.0) - 7.0).abs() < 1e-12);
        assert!((wrap_value(4.0, 0.0, 10.0) - 4.0).abs() < 1e-12);
        assert_eq!(clamp_wrap(&[-15.0, 17.0, 3.0], 0.0, 10.0), vec![5.0, 7.0, 3.0]);
    }

    #[test]
    fn test_clamp_wrap_keeps_bounds() {
        assert_eq!(wrap_value(0.0, 0.0, 10.0), 0.0);
        assert_eq!(wrap_value(10.0, 0.0, 10.0), 10.0);
    }

    #[test]
    fn test_euclidean_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]).unwrap() - 5.0).abs() < 1e-12);
        assert!(matches!(
            euclidean_distance(&[0.0], &[1.0, 2.0]),
            Err(DomainError::DimensionMismatch { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_init_uniform_respects_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        let ranges = [(0.0, 1.0), (-5.0, -4.0), (10.0, 20.0)];
        for _ in 0..100 {
            let state = init_uniform(&mut rng, 3, &ranges).unwrap();
            for (value, (min, max)) in state.iter().zip(ranges) {
                assert!(*value >= min && *value <= max);
            }
        }
        assert!(init_uniform(&mut rng, 2, &ranges).is_err());
    }

    #[test]
    fn test_gaussian_step_dimension_mismatch() {
        let covariance = ProposalCovariance::diagonal(&[1.0; 3]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            gaussian_step(&mut rng, &[0.0, 0.0], &covariance),
            Err(DomainError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_gaussian_step_empirical_variance() {
        let covariance = ProposalCovariance::diagonal(&[0.25, 4.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        let n = 20_000;
        let mut sums = [0.0; 2];
        for _ in 0..n {
            let step = gaussian_step(&mut rng, &[0.0, 0.0], &covariance).unwrap();
            sums[0] += step[0] * step[0];
            sums[1] += step[1] * step[1];
        }
        assert!((sums[0] / n as f64 - 0.25).abs() < 0.05);
        assert!((sums[1] / n as f64 - 4.0).abs() < 0.3);
    }

    #[test]
    fn test_full_covariance_rejects_non_positive_definite() {
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matches!(
            ProposalCovariance::full(matrix),
            Err(DomainError::InvalidCovariance(_))
        ));
        let matrix = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        assert_eq!(ProposalCovariance::full(matrix).unwrap().dim(), 2);
    }

    #[test]
    fn test_diagonal_rejects_non_positive_variance() {
        assert!(ProposalCovariance::diagonal(&[1.0, 0.0]).is_err());
        assert!(ProposalCovariance::diagonal(&[]).is_err());
    }

    #[test]
    fn test_slice_grid_spacing() {
        let grid = slice_grid(&[1.0, 2.0, 3.0], 1, (-30.0, 30.0), 4).unwrap();
        assert_eq!(grid.values, vec![-30.0, -10.0, 10.0, 30.0]);
        assert_eq!(grid.states[0], vec![1.0, -30.0, 3.0]);
        assert_eq!(grid.states[3], vec![1.0, 30.0, 3.0]);
        assert!(slice_grid(&[1.0], 1, (0.0, 1.0), 4).is_err());
        assert!(slice_grid(&[1.0], 0, (0.0, 1.0), 1).is_err());
    }

    #[test]
    fn test_generator_proposals_stay_in_range() {
        let generator = ProposalGenerator::new(
            vec![(0.0, 1.0); 2],
            ProposalCovariance::diagonal(&[25.0; 2]).unwrap(),
        )
        .unwrap();
        let start = generator.initial_state().unwrap();
        for _ in 0..50 {
            let proposal = generator.propose(&start).unwrap();
            assert!(proposal.iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }
}
