use nalgebra::{DVector, Vector3};

use crate::models::se2;
use crate::utils::mvn::MultivariateNormal;

/// Below this turn rate the velocity model moves in a straight line.
const MIN_TURN_RATE: f64 = 1e-9;

/// Maps a control vector to the relative motion it produces.
pub trait MotionModel {
    fn control_dim(&self) -> usize;

    /// Pose displacement, in the robot frame, produced by the control `u`.
    fn displacement(&self, u: &DVector<f64>) -> Vector3<f64>;

    fn prediction(&self, x: &Vector3<f64>, u: &DVector<f64>) -> Vector3<f64> {
        se2::compose(x, &self.displacement(u))
    }
}

/// The control is the relative pose `[dx, dy, dtheta]` itself, as reported by
/// wheel odometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct Odometry;

impl MotionModel for Odometry {
    fn control_dim(&self) -> usize {
        3
    }

    fn displacement(&self, u: &DVector<f64>) -> Vector3<f64> {
        Vector3::new(u[0], u[1], u[2])
    }
}

/// Velocity motion model, control = `[v, w]` held for `dt`.
/// Probabilistic Robotics p. 127
#[derive(Debug, Clone, Copy)]
pub struct Velocity {
    dt: f64,
    a1: f64,
    a2: f64,
    a3: f64,
    a4: f64,
}

impl Velocity {
    pub fn new(dt: f64) -> Velocity {
        Velocity {
            dt,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            a4: 0.0,
        }
    }

    /// Control noise growing with the commanded speeds (`a1..a4` as in the textbook).
    pub fn with_noise(self, a1: f64, a2: f64, a3: f64, a4: f64) -> Velocity {
        Velocity {
            a1,
            a2,
            a3,
            a4,
            ..self
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Distribution of the executed control given the commanded `v` and `w`.
    pub fn control_distribution(&self, v: f64, w: f64) -> MultivariateNormal {
        let v2 = v.powi(2);
        let w2 = w.powi(2);
        let std_devs = [
            (self.a1 * v2 + self.a2 * w2).sqrt(),
            (self.a3 * v2 + self.a4 * w2).sqrt(),
        ];
        MultivariateNormal::from_std_devs(DVector::from_vec(vec![v, w]), &std_devs)
    }
}

impl MotionModel for Velocity {
    fn control_dim(&self) -> usize {
        2
    }

    fn displacement(&self, u: &DVector<f64>) -> Vector3<f64> {
        let v = u[0];
        let w = u[1];
        let dtheta = w * self.dt;
        if w.abs() > MIN_TURN_RATE {
            let radius = v / w;
            Vector3::new(
                radius * dtheta.sin(),
                radius * (1.0 - dtheta.cos()),
                dtheta,
            )
        } else {
            // no rotation
            Vector3::new(v * self.dt, 0.0, dtheta)
        }
    }
}
