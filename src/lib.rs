pub mod data;
pub mod error;
pub mod models;
pub mod slam;
pub mod utils;

pub use error::{Result, SlamError};
pub use slam::config::FastSlamConfig;
pub use slam::fastslam::FastSlam;
pub use slam::interfaces::{FeatureId, SlamListener, SlamResult, Timestep};
pub use slam::slam_data::SlamData;
pub use utils::mvn::MultivariateNormal;
