//! Frame-to-map pose tracking.
//!
//! - Correspondences between a reference frame's landmarks and the current
//!   frame's detections (minimum-match gate)
//! - Single-pose bundle adjustment with robust loss and an up-vector prior
//! - Last frame / last keyframe fallback

pub mod correspondence;
pub mod frame;
pub mod history;
pub mod matching;
pub mod motion_model;
pub mod observer;
pub mod pose_solver;
pub mod result;
pub mod state;
pub mod tracker;
pub mod tracking_frame;

pub use correspondence::{CorrespondenceBuilder, CorrespondenceSet};
pub use history::FrameHistory;
pub use pose_solver::{OptimizerFactory, PoseSolver};
pub use result::{AttemptReport, ReferenceKind, TrackingResult};
pub use state::TrackingState;
pub use tracker::{Mapper, Tracker};
pub use tracking_frame::Frame;
