use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};
use crate::utils::unscented::UnscentedParams;

/// FastSLAM 2.0 parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastSlamConfig {
    /// Number of particles in the particle filter.
    pub num_particles: usize,
    /// Resample when the ratio of effective particles drops below this.
    pub resample_threshold: f64,
    /// Ratio of effective particles below which the filter is considered collapsed.
    pub collapse_threshold: f64,
    /// Keep a trajectory per particle instead of one combined trajectory.
    pub retain_history: bool,
    pub ukf: UnscentedParams,
    pub seed: u64,
}

impl Default for FastSlamConfig {
    fn default() -> Self {
        FastSlamConfig {
            num_particles: 100,
            resample_threshold: 0.75,
            collapse_threshold: 0.5,
            retain_history: true,
            ukf: UnscentedParams::default(),
            seed: 0,
        }
    }
}

impl FastSlamConfig {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |x: f64| (0.0..=1.0).contains(&x);
        if !in_unit(self.resample_threshold) {
            return Err(SlamError::InvalidConfig(format!(
                "resample threshold {} outside [0, 1]",
                self.resample_threshold
            )));
        }
        if !in_unit(self.collapse_threshold) {
            return Err(SlamError::InvalidConfig(format!(
                "collapse threshold {} outside [0, 1]",
                self.collapse_threshold
            )));
        }
        if self.collapse_threshold > self.resample_threshold {
            return Err(SlamError::InvalidConfig(format!(
                "collapse threshold {} above resample threshold {}",
                self.collapse_threshold, self.resample_threshold
            )));
        }
        if self.ukf.alpha <= 0.0 {
            return Err(SlamError::InvalidConfig(format!(
                "unscented alpha must be positive, got {}",
                self.ukf.alpha
            )));
        }
        Ok(())
    }
}
