use std::collections::BTreeMap;
use std::fmt;

use nalgebra::{Vector2, Vector3};

use crate::utils::mvn::MultivariateNormal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestep(pub usize);

impl Timestep {
    pub fn next(self) -> Timestep {
        Timestep(self.0 + 1)
    }
}

impl fmt::Display for Timestep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId(pub usize);

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Receives the events recorded by [`crate::slam::slam_data::SlamData`].
pub trait SlamListener {
    fn control(&mut self, _t: Timestep, _control: &MultivariateNormal) {}

    /// `is_new` is true the first time `id` is ever observed.
    fn observation(
        &mut self,
        _t: Timestep,
        _id: FeatureId,
        _observation: &MultivariateNormal,
        _is_new: bool,
    ) {
    }

    fn end_observation(&mut self, _t: Timestep) {}

    fn end_simulation(&mut self, _t: Timestep) {}
}

/// Query side of a SLAM back end.
pub trait SlamResult {
    fn current_timestep(&self) -> Timestep;

    /// Brings the estimate up to `t`. Earlier timesteps are ignored.
    fn timestep(&mut self, t: Timestep);

    fn get_state(&self, t: Timestep) -> Vector3<f64>;

    fn get_feature(&self, id: FeatureId) -> Vector2<f64>;

    /// Poses from the origin up to and including the current timestep.
    fn get_trajectory(&mut self) -> &[Vector3<f64>];

    fn get_feature_map(&mut self) -> &BTreeMap<FeatureId, Vector2<f64>>;
}
