pub mod config;
pub mod fastslam;
pub mod interfaces;
pub mod particle_filter;
pub mod slam_data;
pub mod trajectory;
