//! Terse movement updates.
//!
//! The high-frequency update path trades precision for size: position stays
//! as floats, but velocity, acceleration, rotation and angular velocity are
//! `u16`-quantized. The quantization ranges (`±128` for velocity, `±64` for
//! acceleration and angular velocity, `±1` for rotation components) are
//! wire contract.
//!
//! Layout:
//!
//! ```text
//! local_id:4  state:1  is_avatar:1
//! if is_avatar: collision_plane:16
//! position:12
//! velocity:     3 x u16 in [-128, 128]
//! acceleration: 3 x u16 in [-64, 64]
//! rotation:     4 x u16 in [-1, 1]
//! angular_velocity: 3 x u16 in [-64, 64]
//! ```

use glam::{Quat, Vec3, Vec4};

use crate::{
    error::{ProtocolError, Result},
    object::snapshot::{ObjectSnapshot, UpdateKind},
    object::texture_entry::TextureEntry,
    wire::{Reader, Writer},
};

/// Velocity quantization bound.
pub const VELOCITY_RANGE: f32 = 128.0;
/// Acceleration and angular velocity quantization bound.
pub const ACCELERATION_RANGE: f32 = 64.0;

/// A decoded terse movement block.
#[derive(Debug, Clone, PartialEq)]
pub struct TerseUpdate {
    /// Region-local object id
    pub local_id: u32,
    /// Object state byte
    pub state: u8,
    /// True when the block describes an avatar
    pub is_avatar: bool,
    /// Avatar ground plane, avatars only
    pub collision_plane: Option<Vec4>,
    /// Region-relative position
    pub position: Vec3,
    /// Linear velocity
    pub velocity: Vec3,
    /// Linear acceleration
    pub acceleration: Vec3,
    /// Orientation
    pub rotation: Quat,
    /// Angular velocity
    pub angular_velocity: Vec3,
    /// Texture entry refresh when the block carried one
    pub texture_entry: Option<TextureEntry>,
}

impl TerseUpdate {
    const CONTEXT: &str = "ImprovedTerseObjectUpdate.Data";

    /// Decode a terse data block, plus the optional texture-entry refresh
    /// riding alongside it.
    pub fn decode(data: &[u8], texture_entry: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, data);
        let local_id = r.u32()?;
        let state = r.u8()?;
        let is_avatar = match r.u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(ProtocolError::malformed(
                    Self::CONTEXT,
                    r.pos() - 1,
                    format!("avatar flag must be 0 or 1, got {other}"),
                ));
            },
        };
        let collision_plane = if is_avatar { Some(r.vec4()?) } else { None };
        let position = r.vec3()?;
        let velocity = Vec3::new(
            r.quantized(-VELOCITY_RANGE, VELOCITY_RANGE)?,
            r.quantized(-VELOCITY_RANGE, VELOCITY_RANGE)?,
            r.quantized(-VELOCITY_RANGE, VELOCITY_RANGE)?,
        );
        let acceleration = Vec3::new(
            r.quantized(-ACCELERATION_RANGE, ACCELERATION_RANGE)?,
            r.quantized(-ACCELERATION_RANGE, ACCELERATION_RANGE)?,
            r.quantized(-ACCELERATION_RANGE, ACCELERATION_RANGE)?,
        );
        let rotation = Quat::from_xyzw(
            r.quantized(-1.0, 1.0)?,
            r.quantized(-1.0, 1.0)?,
            r.quantized(-1.0, 1.0)?,
            r.quantized(-1.0, 1.0)?,
        );
        let angular_velocity = Vec3::new(
            r.quantized(-ACCELERATION_RANGE, ACCELERATION_RANGE)?,
            r.quantized(-ACCELERATION_RANGE, ACCELERATION_RANGE)?,
            r.quantized(-ACCELERATION_RANGE, ACCELERATION_RANGE)?,
        );

        let texture_entry = if texture_entry.is_empty() {
            None
        } else {
            // The refresh rides behind a 4-byte length echo.
            let mut tr = Reader::new("ImprovedTerseObjectUpdate.TextureEntry", texture_entry);
            let len = tr.u32()? as usize;
            if len > tr.remaining() {
                return Err(ProtocolError::BlockLength {
                    context: tr.context(),
                    declared: len,
                    available: tr.remaining(),
                });
            }
            Some(TextureEntry::decode(tr.bytes(len)?)?)
        };

        Ok(Self {
            local_id,
            state,
            is_avatar,
            collision_plane,
            position,
            velocity,
            acceleration,
            rotation,
            angular_velocity,
            texture_entry,
        })
    }

    /// Encode the data block (without the texture-entry refresh).
    pub fn encode_data(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(if self.is_avatar { 60 } else { 44 });
        w.put_u32(self.local_id);
        w.put_u8(self.state);
        w.put_u8(u8::from(self.is_avatar));
        if let Some(plane) = self.collision_plane {
            w.put_vec4(plane);
        }
        w.put_vec3(self.position);
        for v in [self.velocity.x, self.velocity.y, self.velocity.z] {
            w.put_quantized(v, -VELOCITY_RANGE, VELOCITY_RANGE);
        }
        for v in [self.acceleration.x, self.acceleration.y, self.acceleration.z] {
            w.put_quantized(v, -ACCELERATION_RANGE, ACCELERATION_RANGE);
        }
        for v in [self.rotation.x, self.rotation.y, self.rotation.z, self.rotation.w] {
            w.put_quantized(v, -1.0, 1.0);
        }
        for v in [self.angular_velocity.x, self.angular_velocity.y, self.angular_velocity.z] {
            w.put_quantized(v, -ACCELERATION_RANGE, ACCELERATION_RANGE);
        }
        w.into_bytes()
    }

    /// Encode the texture-entry refresh field, empty when absent.
    pub fn encode_texture_entry(&self) -> Vec<u8> {
        match &self.texture_entry {
            None => Vec::new(),
            Some(entry) => {
                let body = entry.encode();
                let mut w = Writer::with_capacity(4 + body.len());
                w.put_u32(body.len() as u32);
                w.put_bytes(&body);
                w.into_bytes()
            },
        }
    }

    /// Flatten into the shared snapshot shape. Identity fields beyond
    /// `local_id` keep their defaults; the consumer merges onto the object
    /// it already knows.
    pub fn into_snapshot(self) -> ObjectSnapshot {
        ObjectSnapshot {
            local_id: self.local_id,
            state: self.state,
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            acceleration: self.acceleration,
            angular_velocity: Some(self.angular_velocity),
            collision_plane: self.collision_plane,
            texture_entry: self.texture_entry,
            ..ObjectSnapshot::default()
        }
    }

    /// Update kind for event routing.
    pub fn kind(&self) -> UpdateKind {
        UpdateKind::Terse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TerseUpdate {
        TerseUpdate {
            local_id: 8843,
            state: 0,
            is_avatar: false,
            collision_plane: None,
            position: Vec3::new(100.0, 200.0, 30.0),
            velocity: Vec3::new(2.0, -4.0, 0.0),
            acceleration: Vec3::ZERO,
            rotation: Quat::from_xyzw(0.0, 0.0, 0.0, 1.0),
            angular_velocity: Vec3::ZERO,
            texture_entry: None,
        }
    }

    #[test]
    fn prim_block_is_44_bytes() {
        let bytes = sample().encode_data();
        assert_eq!(bytes.len(), 44);
    }

    #[test]
    fn avatar_block_is_60_bytes_and_keeps_collision_plane() {
        let update = TerseUpdate {
            is_avatar: true,
            collision_plane: Some(Vec4::new(0.0, 0.0, 1.0, 20.0)),
            ..sample()
        };
        let bytes = update.encode_data();
        assert_eq!(bytes.len(), 60);

        let decoded = TerseUpdate::decode(&bytes, &[]).unwrap();
        assert!(decoded.is_avatar);
        assert_eq!(decoded.collision_plane, Some(Vec4::new(0.0, 0.0, 1.0, 20.0)));
    }

    #[test]
    fn dynamics_survive_quantization_round_trip() {
        let update = sample();
        let decoded = TerseUpdate::decode(&update.encode_data(), &[]).unwrap();
        assert_eq!(decoded.local_id, update.local_id);
        assert!((decoded.velocity.x - 2.0).abs() < 0.005);
        assert!((decoded.velocity.y + 4.0).abs() < 0.005);
        assert_eq!(decoded.velocity.z, 0.0);
        assert!((decoded.rotation.w - 1.0).abs() < 1e-4);
        // Re-encoding a decoded update is byte-stable.
        assert_eq!(decoded.encode_data(), update.encode_data());
    }

    #[test]
    fn bad_avatar_flag_is_malformed() {
        let mut bytes = sample().encode_data();
        bytes[5] = 7;
        assert!(matches!(
            TerseUpdate::decode(&bytes, &[]),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn texture_entry_refresh_round_trips() {
        let update = TerseUpdate {
            texture_entry: Some(TextureEntry::default()),
            ..sample()
        };
        let te = update.encode_texture_entry();
        let decoded = TerseUpdate::decode(&update.encode_data(), &te).unwrap();
        assert_eq!(decoded.texture_entry, Some(TextureEntry::default()));
        assert_eq!(decoded.encode_texture_entry(), te);
    }
}
