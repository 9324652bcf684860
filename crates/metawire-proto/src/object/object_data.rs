//! The variable-size motion field of full object updates.
//!
//! Three lengths are legal: 1 byte (tree species), 60 bytes (full float
//! dynamics), and 76 bytes (dynamics with a leading collision plane). Any
//! other length is unknown; it is surfaced as opaque bytes rather than an
//! error so one odd object does not drop its siblings.

use bytes::Bytes;
use glam::{Quat, Vec3, Vec4};

use crate::{
    error::Result,
    wire::{Reader, Writer},
};

/// Float dynamics common to the 60- and 76-byte forms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionData {
    /// Region-relative position
    pub position: Vec3,
    /// Linear velocity
    pub velocity: Vec3,
    /// Linear acceleration
    pub acceleration: Vec3,
    /// Orientation (12-byte packed form)
    pub rotation: Quat,
    /// Angular velocity
    pub angular_velocity: Vec3,
}

impl MotionData {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            position: r.vec3()?,
            velocity: r.vec3()?,
            acceleration: r.vec3()?,
            rotation: r.packed_quat()?,
            angular_velocity: r.vec3()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.put_vec3(self.position);
        w.put_vec3(self.velocity);
        w.put_vec3(self.acceleration);
        w.put_packed_quat(self.rotation);
        w.put_vec3(self.angular_velocity);
    }
}

/// Decoded motion field.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectDataVariant {
    /// 1-byte form: tree species only
    TreeSpecies(u8),
    /// 60-byte form: float dynamics
    Motion(MotionData),
    /// 76-byte form: collision plane plus float dynamics
    MotionWithCollision {
        /// Avatar ground plane
        collision_plane: Vec4,
        /// Float dynamics
        motion: MotionData,
    },
    /// Unrecognized length, kept for the caller to log
    Unknown(Bytes),
}

impl ObjectDataVariant {
    /// Decode a motion field by its length.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new("ObjectData", bytes);
        Ok(match bytes.len() {
            1 => Self::TreeSpecies(r.u8()?),
            60 => Self::Motion(MotionData::decode(&mut r)?),
            76 => Self::MotionWithCollision {
                collision_plane: r.vec4()?,
                motion: MotionData::decode(&mut r)?,
            },
            _ => Self::Unknown(Bytes::copy_from_slice(bytes)),
        })
    }

    /// Encode back to the wire form of the matching length.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(76);
        match self {
            Self::TreeSpecies(species) => w.put_u8(*species),
            Self::Motion(motion) => motion.encode(&mut w),
            Self::MotionWithCollision { collision_plane, motion } => {
                w.put_vec4(*collision_plane);
                motion.encode(&mut w);
            },
            Self::Unknown(bytes) => w.put_bytes(bytes),
        }
        w.into_bytes()
    }
}
