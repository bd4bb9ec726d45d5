//! Landmark - a triangulated 3D point with stable identity.
//!
//! Landmarks are created and culled by the mapper. Tracking only reads them:
//! their position is a constant of every pose problem.

use nalgebra::Vector3;

use super::types::LandmarkId;

/// Length of a binary descriptor in bytes (256 bits, ORB-sized).
pub const DESCRIPTOR_BYTES: usize = 32;

/// Binary feature descriptor compared with the Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub [u8; DESCRIPTOR_BYTES]);

impl Descriptor {
    pub fn zeros() -> Self {
        Self([0; DESCRIPTOR_BYTES])
    }

    /// Number of differing bits.
    pub fn distance(&self, other: &Descriptor) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::zeros()
    }
}

/// A 3D landmark in world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    pub id: LandmarkId,

    /// 3D position in world frame.
    pub position: Vector3<f64>,

    /// Representative descriptor used for association.
    pub descriptor: Descriptor,
}

impl Landmark {
    pub fn new(id: LandmarkId, position: Vector3<f64>, descriptor: Descriptor) -> Self {
        Self {
            id,
            position,
            descriptor,
        }
    }
}
