pub mod measurement;
pub mod motion;
pub mod se2;
