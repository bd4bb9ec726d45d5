pub mod config;
pub mod error;
pub mod geometry;
pub mod map;
pub mod optimizer;
pub mod simulation;
pub mod system;
pub mod tracking;

pub use config::TrackerConfig;
pub use error::TrackingError;
pub use geometry::Pose;
