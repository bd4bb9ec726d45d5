//! Synthetic scenes for the demo binary and tests.
//!
//! Landmarks are drawn uniformly in a box in front of the starting camera.
//! Capturing a frame projects them with a known pose, applies Gaussian pixel
//! noise, perturbs descriptors and shuffles the detection order so that index
//! bookkeeping is exercised.

use anyhow::{Result, anyhow};
use nalgebra::Vector3;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::geometry::Pose;
use crate::map::{DESCRIPTOR_BYTES, Descriptor, FrameId, Landmark, LandmarkId};
use crate::tracking::frame::{Camera, Observation};
use crate::tracking::matching::FrameFeatures;
use crate::tracking::tracking_frame::Frame;

/// How a synthetic frame is captured.
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Standard deviation of the observation noise (normalized coordinates).
    pub pixel_noise: f64,
    /// Bits flipped in each detection's descriptor.
    pub descriptor_bit_flips: u32,
    /// Fraction of visible landmarks that are detected.
    pub keep_fraction: f64,
    /// Random detections with no landmark.
    pub clutter: usize,
    /// Feature scale of every detection.
    pub scale: f64,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            pixel_noise: 0.0,
            descriptor_bit_flips: 4,
            keep_fraction: 1.0,
            clutter: 0,
            scale: 1.0,
        }
    }
}

/// A captured frame with its detections and ground-truth pose.
#[derive(Debug, Clone)]
pub struct SyntheticCapture {
    pub frame: Frame,
    pub features: FrameFeatures,
    pub pose: Pose,
}

pub struct SyntheticScene {
    pub camera: Camera,
    pub landmarks: Vec<Landmark>,
    rng: ChaCha8Rng,
}

impl SyntheticScene {
    /// `bounds` is `[min_x, max_x, min_y, max_y, min_z, max_z]` in world
    /// coordinates.
    pub fn new(camera: Camera, num_landmarks: usize, bounds: [f64; 6], seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let [min_x, max_x, min_y, max_y, min_z, max_z] = bounds;
        let landmarks = (0..num_landmarks)
            .map(|i| {
                let position = Vector3::new(
                    rng.gen_range(min_x..max_x),
                    rng.gen_range(min_y..max_y),
                    rng.gen_range(min_z..max_z),
                );
                Landmark::new(
                    LandmarkId::new(i as u64),
                    position,
                    Descriptor(rng.gen::<[u8; DESCRIPTOR_BYTES]>()),
                )
            })
            .collect();
        Self {
            camera,
            landmarks,
            rng,
        }
    }

    /// Capture frame `id` from `pose`. The frame's visible set holds the
    /// detected landmarks.
    pub fn capture(
        &mut self,
        id: FrameId,
        pose: &Pose,
        options: &CaptureOptions,
    ) -> Result<SyntheticCapture> {
        let noise = Normal::new(0.0, options.pixel_noise)
            .map_err(|e| anyhow!("invalid pixel noise {}: {e}", options.pixel_noise))?;
        let size = self.camera.width.max(self.camera.height) as f64;
        let half_w = self.camera.width as f64 / (2.0 * size);
        let half_h = self.camera.height as f64 / (2.0 * size);

        let mut frame = Frame::new(id, format!("{:06}.png", id.0), id.0 * 33_333_333);
        let mut detections = Vec::new();
        for landmark in &self.landmarks {
            let Some(uv) = self.camera.project(&pose.transform_point(&landmark.position)) else {
                continue;
            };
            if uv.x.abs() > half_w || uv.y.abs() > half_h {
                continue;
            }
            if self.rng.gen::<f64>() >= options.keep_fraction {
                continue;
            }
            frame.add_landmark(landmark.clone());
            let observation = Observation::new(
                uv.x + noise.sample(&mut self.rng),
                uv.y + noise.sample(&mut self.rng),
                options.scale,
            );
            let descriptor = flip_bits(
                &landmark.descriptor,
                options.descriptor_bit_flips,
                &mut self.rng,
            );
            detections.push((observation, descriptor));
        }

        for _ in 0..options.clutter {
            let observation = Observation::new(
                self.rng.gen_range(-half_w..half_w),
                self.rng.gen_range(-half_h..half_h),
                options.scale,
            );
            detections.push((observation, Descriptor(self.rng.gen())));
        }

        detections.shuffle(&mut self.rng);
        let (points, descriptors) = detections.into_iter().unzip();
        Ok(SyntheticCapture {
            frame,
            features: FrameFeatures::new(points, descriptors)?,
            pose: *pose,
        })
    }
}

fn flip_bits(descriptor: &Descriptor, n: u32, rng: &mut impl Rng) -> Descriptor {
    let mut out = *descriptor;
    for _ in 0..n {
        let bit = rng.gen_range(0..DESCRIPTOR_BYTES * 8);
        out.0[bit / 8] ^= 1 << (bit % 8);
    }
    out
}

/// Camera-from-world poses of a camera moving along world x while slowly
/// turning about its y axis.
pub fn sideways_trajectory(num_frames: usize, step: f64, yaw_rate: f64) -> Vec<Pose> {
    (0..num_frames)
        .map(|k| {
            let k = k as f64;
            let center = Vector3::new(step * k, 0.0, 0.0);
            let rotation = nalgebra::UnitQuaternion::from_scaled_axis(Vector3::new(0.0, yaw_rate * k, 0.0));
            Pose::new(rotation, -(rotation * center))
        })
        .collect()
}
