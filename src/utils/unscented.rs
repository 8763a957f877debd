use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::utils::mvn::{psd_cholesky, MultivariateNormal};

/// Singular values below this (relative) are dropped when inverting the innovation covariance.
const PSEUDO_INVERSE_TOLERANCE: f64 = 1e-12;

/// Shape parameters of the scaled unscented transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnscentedParams {
    /// Spread of the sigma points around the mean.
    pub alpha: f64,
    /// Prior knowledge of the distribution (2 is optimal for Gaussians).
    pub beta: f64,
    /// Secondary scaling.
    pub kappa: f64,
}

impl Default for UnscentedParams {
    fn default() -> Self {
        UnscentedParams {
            alpha: 0.002,
            beta: 2.0,
            kappa: 0.0,
        }
    }
}

/// Gaussian produced by [`UnscentedParams::transform`] together with the
/// cross-covariance between the input and the output.
#[derive(Debug, Clone)]
pub struct UnscentedResult {
    pub output: MultivariateNormal,
    pub cross_covariance: DMatrix<f64>,
}

struct SigmaWeights {
    mw: Vec<f64>,
    cw: Vec<f64>,
    gamma: f64,
}

impl UnscentedParams {
    pub fn new(alpha: f64, beta: f64, kappa: f64) -> UnscentedParams {
        UnscentedParams { alpha, beta, kappa }
    }

    fn sigma_weights(&self, dim: usize) -> SigmaWeights {
        let n = dim as f64;
        let lambda = self.alpha.powi(2) * (n + self.kappa) - n;

        let v = 1.0 / (2.0 * (n + lambda));
        let mut mw = vec![v; 2 * dim + 1];
        let mut cw = vec![v; 2 * dim + 1];

        // special cases
        let v = lambda / (n + lambda);
        mw[0] = v;
        cw[0] = v + 1.0 - self.alpha.powi(2) + self.beta;

        let gamma = (n + lambda).sqrt();
        SigmaWeights { mw, cw, gamma }
    }

    fn generate_sigma_points(state: &MultivariateNormal, gamma: f64) -> Vec<DVector<f64>> {
        let n = state.dim();
        let sigma = state.chol_cov() * gamma;
        let mut sigma_points = vec![state.mean().clone(); 2 * n + 1];
        for i in 0..n {
            let sigma_column = sigma.column(i);
            sigma_points[i + 1] += sigma_column;
            sigma_points[i + 1 + n] -= sigma_column;
        }
        sigma_points
    }

    /// Propagates `input` through `f`, adding independent noise with Cholesky
    /// factor `noise_chol` to the output when given.
    pub fn transform<F>(
        &self,
        f: F,
        input: &MultivariateNormal,
        noise_chol: Option<&DMatrix<f64>>,
    ) -> UnscentedResult
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let weights = self.sigma_weights(input.dim());
        let sigma_points = Self::generate_sigma_points(input, weights.gamma);
        let sp_y: Vec<DVector<f64>> = sigma_points.iter().map(&f).collect();

        // accumulate relative to the central point; exact when all points coincide
        let center = &sp_y[0];
        let m = center.len();
        let mean_y = sp_y
            .iter()
            .zip(weights.mw.iter())
            .skip(1)
            .fold(center.clone(), |acc, (y, w)| acc + (y - center) * *w);

        let mut cov_y = sp_y
            .iter()
            .zip(weights.cw.iter())
            .map(|(y, cw)| {
                let dy = y - &mean_y;
                &dy * dy.transpose() * *cw
            })
            .fold(DMatrix::zeros(m, m), |acc, c| acc + c);
        if let Some(noise) = noise_chol {
            cov_y += noise * noise.transpose();
        }

        let cross_covariance = sigma_points
            .iter()
            .zip(sp_y.iter().zip(weights.cw.iter()))
            .map(|(x, (y, cw))| (x - input.mean()) * (y - &mean_y).transpose() * *cw)
            .fold(DMatrix::zeros(input.dim(), m), |acc, c| acc + c);

        UnscentedResult {
            output: MultivariateNormal::new(mean_y, psd_cholesky(&cov_y)),
            cross_covariance,
        }
    }

    /// Conditions `state` on `observation`, where `f` maps a state to the
    /// expected observation. The observation covariance is the measurement noise.
    pub fn update<F>(&self, f: F, state: &mut MultivariateNormal, observation: &MultivariateNormal)
    where
        F: Fn(&DVector<f64>) -> DVector<f64>,
    {
        let UnscentedResult {
            output: predicted,
            cross_covariance,
        } = self.transform(f, state, Some(observation.chol_cov()));

        let cov_z = predicted.covariance();
        let scale = cov_z.diagonal().amax();
        if scale == 0.0 {
            // nothing to condition on
            return;
        }
        let tolerance = PSEUDO_INVERSE_TOLERANCE * scale;
        let cov_z_inv = match cov_z.clone().pseudo_inverse(tolerance) {
            Ok(inv) => inv,
            Err(_) => DMatrix::zeros(cov_z.nrows(), cov_z.ncols()),
        };

        let kalman_gain = cross_covariance * cov_z_inv;
        let y = observation.mean() - predicted.mean();

        let x_est = state.mean() + &kalman_gain * y;
        let p_est = state.covariance() - &kalman_gain * cov_z * kalman_gain.transpose();
        *state = MultivariateNormal::new(x_est, psd_cholesky(&p_est));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    fn linear(x: &DVector<f64>) -> DVector<f64> {
        dmatrix![1.0, 2.0; 0.0, 1.0; 3.0, -1.0] * x + dvector![1.0, 0.0, -1.0]
    }

    #[test]
    fn weights_sum_to_one() {
        for params in [UnscentedParams::default(), UnscentedParams::new(1.0, 2.0, 1.0)] {
            let w = params.sigma_weights(5);
            approx::assert_abs_diff_eq!(w.mw.iter().sum::<f64>(), 1.0, epsilon = 1e-6);
            assert_eq!(w.cw.len(), 11);
        }
    }

    #[test]
    fn linear_transform_is_exact() {
        let cov = dmatrix![2.0, 0.3; 0.3, 0.5];
        let input = MultivariateNormal::from_covariance(dvector![1.0, -1.0], &cov).unwrap();
        let a = dmatrix![1.0, 2.0; 0.0, 1.0; 3.0, -1.0];

        for params in [UnscentedParams::default(), UnscentedParams::new(0.5, 2.0, 0.0)] {
            let result = params.transform(linear, &input, None);
            approx::assert_relative_eq!(
                result.output.mean(),
                &linear(input.mean()),
                epsilon = 1e-6
            );
            approx::assert_relative_eq!(
                result.output.covariance(),
                &a * &cov * a.transpose(),
                epsilon = 1e-5
            );
            approx::assert_relative_eq!(result.cross_covariance, &cov * a.transpose(), epsilon = 1e-5);
        }
    }

    #[test]
    fn additive_noise_is_included() {
        let input = MultivariateNormal::point(dvector![0.5, 0.5]);
        let noise = DMatrix::from_diagonal(&dvector![1.0, 2.0, 3.0]);
        let result = UnscentedParams::default().transform(linear, &input, Some(&noise));
        assert_eq!(result.output.mean(), &linear(input.mean()));
        approx::assert_abs_diff_eq!(
            result.output.covariance(),
            DMatrix::from_diagonal(&dvector![1.0, 4.0, 9.0]),
            epsilon = 1e-9
        );
    }

    #[test]
    fn linear_update_matches_kalman_filter() {
        let p = dmatrix![1.0, 0.2; 0.2, 2.0];
        let r = dmatrix![0.5, 0.0; 0.0, 0.25];
        let h = dmatrix![1.0, 0.0; 1.0, 1.0];
        let mut state = MultivariateNormal::from_covariance(dvector![0.0, 1.0], &p).unwrap();
        let observation = MultivariateNormal::from_covariance(dvector![0.3, 1.5], &r).unwrap();

        let hh = h.clone();
        UnscentedParams::new(0.5, 2.0, 0.0).update(move |x| &hh * x, &mut state, &observation);

        let s = &h * &p * h.transpose() + &r;
        let k = &p * h.transpose() * s.try_inverse().unwrap();
        let x = dvector![0.0, 1.0] + &k * (dvector![0.3, 1.5] - &h * dvector![0.0, 1.0]);
        let cov = (DMatrix::identity(2, 2) - &k * &h) * &p;

        approx::assert_relative_eq!(state.mean(), &x, epsilon = 1e-8);
        approx::assert_relative_eq!(state.covariance(), cov, epsilon = 1e-8);
    }

    #[test]
    fn degenerate_update_leaves_state_unchanged() {
        let mut state = MultivariateNormal::point(dvector![2.0, 3.0]);
        let observation = MultivariateNormal::point(dvector![10.0, 10.0]);
        UnscentedParams::default().update(|x| x.clone(), &mut state, &observation);
        assert_eq!(state.mean(), &dvector![2.0, 3.0]);
        assert_eq!(state.covariance(), DMatrix::<f64>::zeros(2, 2));
    }
}
