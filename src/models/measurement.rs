use nalgebra::{DMatrix, DVector, Vector2};
use std::f64::consts::PI;

use crate::models::se2::normalize_angle;
use crate::utils::mvn::MultivariateNormal;

/// Sensor model for point landmarks, expressed in the robot frame.
pub trait MeasurementModel {
    fn observation_dim(&self) -> usize;

    /// Expected observation of a landmark at `local` (robot frame).
    fn observe(&self, local: &Vector2<f64>) -> DVector<f64>;

    /// Moves angular components of `z` to the branch closest to `reference`.
    fn align(&self, z: DVector<f64>, _reference: &DVector<f64>) -> DVector<f64> {
        z
    }

    /// Distribution fed to [`MeasurementModel::inverse`] when a landmark is first
    /// seen. Models that do not observe every landmark coordinate augment the
    /// observation with a prior over the missing ones.
    fn initialization_prior(&self, observation: &MultivariateNormal) -> MultivariateNormal {
        observation.clone()
    }

    /// Landmark position (robot frame) from an initialization vector.
    fn inverse(&self, z: &DVector<f64>) -> Vector2<f64>;
}

/// Measurement = [range, bearing]
/// Probabilistic Robotics p. 177
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeBearing;

impl MeasurementModel for RangeBearing {
    fn observation_dim(&self) -> usize {
        2
    }

    fn observe(&self, local: &Vector2<f64>) -> DVector<f64> {
        let range = local.norm();
        let bearing = f64::atan2(local.y, local.x);
        DVector::from_vec(vec![range, bearing])
    }

    fn align(&self, mut z: DVector<f64>, reference: &DVector<f64>) -> DVector<f64> {
        z[1] = reference[1] + normalize_angle(z[1] - reference[1]);
        z
    }

    fn inverse(&self, z: &DVector<f64>) -> Vector2<f64> {
        let (s, c) = z[1].sin_cos();
        Vector2::new(z[0] * c, z[0] * s)
    }
}

/// Measurement = [range]
///
/// The bearing of a new landmark is unknown; initialization assumes it straight
/// ahead with the variance of a uniform bearing (pi^2 / 3).
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeOnly;

impl MeasurementModel for RangeOnly {
    fn observation_dim(&self) -> usize {
        1
    }

    fn observe(&self, local: &Vector2<f64>) -> DVector<f64> {
        DVector::from_element(1, local.norm())
    }

    fn initialization_prior(&self, observation: &MultivariateNormal) -> MultivariateNormal {
        let mean = DVector::from_vec(vec![observation.mean()[0], 0.0]);
        let mut chol_cov = DMatrix::zeros(2, 2);
        chol_cov[(0, 0)] = observation.chol_cov()[(0, 0)];
        chol_cov[(1, 1)] = PI / 3f64.sqrt();
        MultivariateNormal::new(mean, chol_cov)
    }

    fn inverse(&self, z: &DVector<f64>) -> Vector2<f64> {
        let (s, c) = z[1].sin_cos();
        Vector2::new(z[0] * c, z[0] * s)
    }
}

/// Measurement = landmark position [x, y] in the robot frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cartesian;

impl MeasurementModel for Cartesian {
    fn observation_dim(&self) -> usize {
        2
    }

    fn observe(&self, local: &Vector2<f64>) -> DVector<f64> {
        DVector::from_column_slice(local.as_slice())
    }

    fn inverse(&self, z: &DVector<f64>) -> Vector2<f64> {
        Vector2::new(z[0], z[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn range_bearing_observation() {
        let z = RangeBearing.observe(&Vector2::new(0.0, 2.0));
        approx::assert_abs_diff_eq!(z, dvector![2.0, PI / 2.0], epsilon = 1e-12);
        approx::assert_abs_diff_eq!(RangeBearing.inverse(&z), Vector2::new(0.0, 2.0), epsilon = 1e-12);
    }

    #[test]
    fn range_bearing_aligns_across_the_cut() {
        let reference = dvector![1.0, PI - 0.05];
        let aligned = RangeBearing.align(dvector![1.0, -PI + 0.05], &reference);
        approx::assert_abs_diff_eq!(aligned[1], PI + 0.05, epsilon = 1e-12);
        assert_eq!(aligned[0], 1.0);
    }

    #[test]
    fn range_only_prior_is_augmented() {
        let obs = MultivariateNormal::from_std_devs(dvector![4.0], &[0.2]);
        let prior = RangeOnly.initialization_prior(&obs);
        assert_eq!(prior.mean(), &dvector![4.0, 0.0]);
        approx::assert_abs_diff_eq!(prior.covariance()[(0, 0)], 0.04, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(prior.covariance()[(1, 1)], PI * PI / 3.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(RangeOnly.inverse(prior.mean()), Vector2::new(4.0, 0.0));
        assert_eq!(RangeOnly.observe(&Vector2::new(3.0, 4.0)), dvector![5.0]);
    }

    #[test]
    fn cartesian_is_identity() {
        let local = Vector2::new(-1.5, 0.5);
        assert_eq!(Cartesian.observe(&local), dvector![-1.5, 0.5]);
        assert_eq!(Cartesian.inverse(&dvector![-1.5, 0.5]), local);
    }
}
