use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use vslam_tracking::config::TrackerConfig;
use vslam_tracking::map::{CameraId, FrameId};
use vslam_tracking::simulation::{CaptureOptions, SyntheticScene, sideways_trajectory};
use vslam_tracking::system::SharedMapper;
use vslam_tracking::tracking::frame::{Camera, CameraModel};
use vslam_tracking::tracking::matching::{DescriptorMatcher, FeatureTable};
use vslam_tracking::tracking::observer::ChannelObserver;
use vslam_tracking::tracking::{FrameHistory, PoseSolver, Tracker};

const NUM_FRAMES: usize = 30;
const KEYFRAME_INTERVAL: usize = 5;
/// After this frame the mapper keeps only a few landmarks, forcing the next
/// frame to fall back to the last keyframe.
const DROPOUT_FRAME: usize = 12;

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            println!("Loading tracker config from: {}", path);
            TrackerConfig::load(Path::new(&path))?
        }
        None => TrackerConfig::default(),
    };

    let camera = Camera::new(CameraId(0), 640, 480, CameraModel::pinhole(0.8));
    let mut scene = SyntheticScene::new(camera.clone(), 600, [-5.0, 6.0, -3.0, 3.0, 6.0, 14.0], 42);
    let trajectory = sideways_trajectory(NUM_FRAMES, 0.05, 0.004);
    let options = CaptureOptions {
        pixel_noise: 5e-4,
        clutter: 50,
        ..CaptureOptions::default()
    };
    println!(
        "Simulated {} landmarks, {} frames",
        scene.landmarks.len(),
        trajectory.len()
    );

    let features = Arc::new(FeatureTable::new());
    let matcher = DescriptorMatcher::new(features.clone(), config.matcher.clone());
    let (observer, reports) = ChannelObserver::bounded(NUM_FRAMES);
    let tracker = Tracker::new(
        matcher,
        features.clone(),
        PoseSolver::levenberg_marquardt(),
        config,
    )
    .with_observer(observer);

    let first = scene.capture(FrameId::new(0), &trajectory[0], &options)?;
    features.insert(first.frame.id, first.features);
    let shared = SharedMapper::new(FrameHistory::new(first.frame, first.pose));

    for (k, truth) in trajectory.iter().enumerate().skip(1) {
        let mut capture = scene.capture(FrameId::new(k as u64), truth, &options)?;
        features.insert(capture.frame.id, capture.features.clone());

        let result = shared.track(&tracker, &capture.frame, &camera);
        let attempts: Vec<String> = result
            .attempts
            .iter()
            .map(|a| match &a.failure {
                None => format!("{} {} ok ({})", a.reference, a.reference_frame, a.correspondences),
                Some(err) => format!("{} {} failed: {}", a.reference, a.reference_frame, err),
            })
            .collect();

        match result.pose {
            Some(pose) => {
                println!(
                    "frame {:>2}: {:?} rot_err={:.2e} rad trans_err={:.2e} [{}]",
                    k,
                    result.state,
                    pose.rotation_distance(truth),
                    pose.origin().metric_distance(&truth.origin()),
                    attempts.join("; ")
                );
                if k == DROPOUT_FRAME {
                    let keep: Vec<_> = capture.frame.visible_landmarks.keys().take(40).copied().collect();
                    capture.frame.visible_landmarks.retain(|id, _| keep.contains(id));
                }
                let is_keyframe = k % KEYFRAME_INTERVAL == 0;
                shared.update(|history| history.add_frame(capture.frame, pose, is_keyframe));
            }
            None => {
                println!("frame {:>2}: {:?} [{}]", k, result.state, attempts.join("; "));
                shared.update(|history| history.reset_motion());
            }
        }

        if let Ok(report) = reports.try_recv() {
            println!(
                "          reprojection {:?} -> {:?}",
                report.mean_error_init(),
                report.mean_error_final()
            );
        }
    }

    println!(
        "Tracked {} frames, lost {}",
        shared.frames_tracked(),
        shared.frames_lost()
    );

    let history = shared.read();
    let errors: Vec<f64> = history
        .trajectory()
        .iter()
        .map(|(id, pose)| pose.origin().metric_distance(&trajectory[id.0 as usize].origin()))
        .collect();
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / errors.len().max(1) as f64).sqrt();
    println!(
        "Trajectory: {} poses, camera center RMSE {:.2e}",
        history.num_frames(),
        rmse
    );
    Ok(())
}
