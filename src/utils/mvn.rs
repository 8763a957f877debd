use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{Result, SlamError};

/// Pivots smaller than this (relative to the largest diagonal entry) are zero.
const PIVOT_TOLERANCE: f64 = 1e-12;
/// Negative pivots larger than this (relative) are not round-off.
const NEGATIVE_PIVOT_TOLERANCE: f64 = 1e-9;
/// Residual allowed along a zero-variance direction.
const POINT_MASS_TOLERANCE: f64 = 1e-9;

/// Gaussian over a vector, stored as mean and lower-triangular Cholesky factor
/// of the covariance (`cov = L * L^T`).
#[derive(Debug, Clone, PartialEq)]
pub struct MultivariateNormal {
    mean: DVector<f64>,
    chol_cov: DMatrix<f64>,
}

impl MultivariateNormal {
    /// `chol_cov` must be lower-triangular; the likelihood and the leading
    /// marginal read it that way.
    pub fn new(mean: DVector<f64>, chol_cov: DMatrix<f64>) -> MultivariateNormal {
        assert!(
            chol_cov.is_square() && chol_cov.nrows() == mean.len(),
            "cholesky factor is {}x{} but mean has {} components",
            chol_cov.nrows(),
            chol_cov.ncols(),
            mean.len()
        );
        debug_assert!(
            (0..chol_cov.ncols()).all(|j| (0..j).all(|i| chol_cov[(i, j)] == 0.0)),
            "cholesky factor must be lower-triangular"
        );
        MultivariateNormal { mean, chol_cov }
    }

    /// Degenerate distribution with all its mass on `mean`.
    pub fn point(mean: DVector<f64>) -> MultivariateNormal {
        let n = mean.len();
        MultivariateNormal::new(mean, DMatrix::zeros(n, n))
    }

    /// Independent components with the given standard deviations.
    pub fn from_std_devs(mean: DVector<f64>, std_devs: &[f64]) -> MultivariateNormal {
        assert_eq!(mean.len(), std_devs.len());
        let diagonal = DVector::from_iterator(std_devs.len(), std_devs.iter().map(|s| s.abs()));
        MultivariateNormal::new(mean, DMatrix::from_diagonal(&diagonal))
    }

    pub fn from_covariance(mean: DVector<f64>, cov: &DMatrix<f64>) -> Result<MultivariateNormal> {
        let Some(chol_cov) = cholesky(cov, true) else {
            return Err(SlamError::NotPositiveSemiDefinite);
        };
        Ok(MultivariateNormal::new(mean, chol_cov))
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn mean_mut(&mut self) -> &mut DVector<f64> {
        &mut self.mean
    }

    pub fn chol_cov(&self) -> &DMatrix<f64> {
        &self.chol_cov
    }

    pub fn covariance(&self) -> DMatrix<f64> {
        &self.chol_cov * self.chol_cov.transpose()
    }

    /// Marginal over the components `start..start + len`.
    pub fn marginal(&self, start: usize, len: usize) -> MultivariateNormal {
        let mean = self.mean.rows(start, len).into_owned();
        if start == 0 {
            // leading block of a lower-triangular factor is the factor of the leading block
            let chol_cov = self.chol_cov.view((0, 0), (len, len)).into_owned();
            return MultivariateNormal::new(mean, chol_cov);
        }
        let cov = self.covariance().view((start, start), (len, len)).into_owned();
        MultivariateNormal::new(mean, psd_cholesky(&cov))
    }

    /// Log probability density at `x`.
    ///
    /// Directions with zero variance behave as a point mass: a residual along them
    /// contributes nothing when it vanishes and makes the density `-inf` otherwise.
    pub fn log_likelihood(&self, x: &DVector<f64>) -> f64 {
        assert_eq!(x.len(), self.dim(), "dimension mismatch in log_likelihood");
        let n = self.dim();
        let residual = x - &self.mean;
        let pivot_tol = PIVOT_TOLERANCE * self.chol_cov.diagonal().amax().max(1.0);
        let residual_tol = POINT_MASS_TOLERANCE * (1.0 + x.amax());

        let mut whitened = DVector::<f64>::zeros(n);
        let mut log_det = 0.0;
        let mut rank = 0;
        for i in 0..n {
            let mut r = residual[i];
            for k in 0..i {
                r -= self.chol_cov[(i, k)] * whitened[k];
            }
            let pivot = self.chol_cov[(i, i)];
            if pivot.abs() > pivot_tol {
                whitened[i] = r / pivot;
                log_det += pivot.abs().ln();
                rank += 1;
            } else if r.abs() > residual_tol {
                return f64::NEG_INFINITY;
            }
        }

        let log_two_pi = std::f64::consts::TAU.ln();
        -0.5 * whitened.norm_squared() - log_det - 0.5 * rank as f64 * log_two_pi
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::<f64>::from_fn(self.dim(), |_, _| rng.sample(StandardNormal));
        &self.mean + &self.chol_cov * z
    }
}

/// Cholesky factor of a symmetric positive semi-definite matrix.
///
/// Zero pivots yield zero columns and negative round-off is clamped, so this
/// never fails; use [`MultivariateNormal::from_covariance`] to reject matrices
/// that are genuinely indefinite.
pub fn psd_cholesky(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    match cholesky(matrix, false) {
        Some(l) => l,
        None => unreachable!("lenient cholesky cannot fail"),
    }
}

fn cholesky(matrix: &DMatrix<f64>, strict: bool) -> Option<DMatrix<f64>> {
    assert!(matrix.is_square(), "cholesky of a non-square matrix");
    let n = matrix.nrows();
    let scale = matrix.diagonal().amax();
    let zero_tol = PIVOT_TOLERANCE * scale;
    let negative_tol = NEGATIVE_PIVOT_TOLERANCE * scale.max(1.0);

    let mut l = DMatrix::<f64>::zeros(n, n);
    for j in 0..n {
        let mut d = matrix[(j, j)];
        for k in 0..j {
            d -= l[(j, k)] * l[(j, k)];
        }
        if d <= zero_tol {
            if strict && d < -negative_tol {
                return None;
            }
            continue;
        }
        let pivot = d.sqrt();
        l[(j, j)] = pivot;
        for i in (j + 1)..n {
            let mut s = 0.5 * (matrix[(i, j)] + matrix[(j, i)]);
            for k in 0..j {
                s -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = s / pivot;
        }
    }
    Some(l)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn standard_normal_log_likelihood() {
        let mvn = MultivariateNormal::from_std_devs(dvector![0.0, 0.0], &[1.0, 1.0]);
        let expected = -std::f64::consts::TAU.ln();
        approx::assert_abs_diff_eq!(mvn.log_likelihood(&dvector![0.0, 0.0]), expected, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(
            mvn.log_likelihood(&dvector![1.0, 0.0]),
            expected - 0.5,
            epsilon = 1e-12
        );
    }

    #[test]
    fn log_likelihood_uses_full_covariance() {
        let cov = dmatrix![4.0, 1.0; 1.0, 2.0];
        let mvn = MultivariateNormal::from_covariance(dvector![1.0, -1.0], &cov).unwrap();
        let x = dvector![2.0, 0.5];
        let dx = &x - mvn.mean();
        let maha = (dx.transpose() * cov.clone().try_inverse().unwrap() * &dx)[(0, 0)];
        let expected = -0.5 * maha - 0.5 * cov.determinant().ln() - std::f64::consts::TAU.ln();
        approx::assert_abs_diff_eq!(mvn.log_likelihood(&x), expected, epsilon = 1e-10);
    }

    #[test]
    fn point_mass_log_likelihood() {
        let mvn = MultivariateNormal::point(dvector![1.0, 2.0]);
        assert_eq!(mvn.log_likelihood(&dvector![1.0, 2.0]), 0.0);
        assert_eq!(mvn.log_likelihood(&dvector![1.0, 2.5]), f64::NEG_INFINITY);
    }

    #[test]
    fn psd_cholesky_handles_rank_deficiency() {
        let a = dmatrix![1.0, 1.0; 1.0, 1.0];
        let l = psd_cholesky(&a);
        approx::assert_abs_diff_eq!(&l * l.transpose(), a, epsilon = 1e-12);
        assert_eq!(l[(1, 1)], 0.0);
        assert_eq!(psd_cholesky(&DMatrix::zeros(3, 3)), DMatrix::<f64>::zeros(3, 3));
    }

    #[test]
    fn indefinite_covariance_is_rejected() {
        let cov = dmatrix![1.0, 0.0; 0.0, -1.0];
        assert!(matches!(
            MultivariateNormal::from_covariance(dvector![0.0, 0.0], &cov),
            Err(SlamError::NotPositiveSemiDefinite)
        ));
    }

    #[test]
    fn marginal_matches_covariance_block() {
        let cov = dmatrix![
            2.0, 0.5, 0.1;
            0.5, 1.0, 0.3;
            0.1, 0.3, 3.0
        ];
        let mvn = MultivariateNormal::from_covariance(dvector![1.0, 2.0, 3.0], &cov).unwrap();

        let head = mvn.marginal(0, 2);
        assert_eq!(head.mean(), &dvector![1.0, 2.0]);
        approx::assert_abs_diff_eq!(head.covariance(), dmatrix![2.0, 0.5; 0.5, 1.0], epsilon = 1e-12);

        let tail = mvn.marginal(1, 2);
        assert_eq!(tail.mean(), &dvector![2.0, 3.0]);
        approx::assert_abs_diff_eq!(tail.covariance(), dmatrix![1.0, 0.3; 0.3, 3.0], epsilon = 1e-12);
    }

    #[test]
    fn samples_follow_distribution() {
        let cov = dmatrix![1.0, 0.6; 0.6, 2.0];
        let mvn = MultivariateNormal::from_covariance(dvector![3.0, -2.0], &cov).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let samples: Vec<DVector<f64>> = (0..n).map(|_| mvn.sample(&mut rng)).collect();
        let mean = samples.iter().fold(DVector::zeros(2), |a, s| a + s) / n as f64;
        let sample_cov = samples
            .iter()
            .map(|s| s - &mean)
            .map(|d| &d * d.transpose())
            .fold(DMatrix::zeros(2, 2), |a, b| a + b)
            / n as f64;
        approx::assert_abs_diff_eq!(mean, dvector![3.0, -2.0], epsilon = 0.05);
        approx::assert_abs_diff_eq!(sample_cov, cov, epsilon = 0.1);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lower-triangular")]
    fn upper_triangular_factor_is_rejected() {
        MultivariateNormal::new(dvector![0.0, 0.0], dmatrix![1.0, 0.5; 0.0, 1.0]);
    }
}
