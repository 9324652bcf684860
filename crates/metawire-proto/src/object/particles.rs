//! Particle system block.
//!
//! Two wire layouts exist. The legacy layout is exactly 86 bytes: a 68-byte
//! system block followed by an 18-byte particle block. The sized layout
//! prefixes each block with its `u32` length (system block still 68 bytes)
//! and extends the particle block with two glow bytes when
//! [`ParticleSystem::DATA_GLOW`] is set and two blend-function bytes when
//! [`ParticleSystem::DATA_BLEND`] is set.
//!
//! Unlike the rest of the protocol this block descends from a bit packer:
//! multi-byte fixed-point fields are big-endian. Scalar fixed-point widths
//! are part of the wire contract and noted per field.

use glam::Vec3;
use uuid::Uuid;

use crate::{
    error::{ProtocolError, Result},
    object::snapshot::Rgba,
    wire::{Reader, Writer},
};

/// Wire size of the legacy layout.
pub const LEGACY_SIZE: usize = 86;
/// Wire size of the system block in either layout.
pub const SYS_DATA_SIZE: usize = 68;
/// Wire size of the particle block without extensions.
pub const PART_DATA_SIZE: usize = 18;

/// A complete particle system description.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSystem {
    /// Change sequence number
    pub crc: u32,
    /// System behavior flags
    pub flags: u32,
    /// Emission pattern discriminant
    pub pattern: u8,
    /// System lifetime in seconds (8.8 fixed)
    pub max_age: f32,
    /// Emission start delay in seconds (8.8 fixed)
    pub start_age: f32,
    /// Inner emission cone angle (3.5 fixed)
    pub inner_angle: f32,
    /// Outer emission cone angle (3.5 fixed)
    pub outer_angle: f32,
    /// Seconds between bursts (8.8 fixed)
    pub burst_rate: f32,
    /// Burst emission radius (8.8 fixed)
    pub burst_radius: f32,
    /// Minimum initial speed (8.8 fixed)
    pub burst_speed_min: f32,
    /// Maximum initial speed (8.8 fixed)
    pub burst_speed_max: f32,
    /// Particles per burst
    pub burst_part_count: u8,
    /// Emitter angular velocity (signed 8.7 fixed per axis)
    pub angular_velocity: Vec3,
    /// Acceleration applied to particles (signed 8.7 fixed per axis)
    pub acceleration: Vec3,
    /// Particle texture
    pub texture: Uuid,
    /// Target object for targeted motion
    pub target: Uuid,
    /// Per-particle behavior flags
    pub part_flags: u32,
    /// Particle lifetime in seconds (8.8 fixed)
    pub part_max_age: f32,
    /// Color at birth
    pub start_color: Rgba,
    /// Color at death
    pub end_color: Rgba,
    /// Width at birth (3.5 fixed)
    pub start_scale_x: f32,
    /// Height at birth (3.5 fixed)
    pub start_scale_y: f32,
    /// Width at death (3.5 fixed)
    pub end_scale_x: f32,
    /// Height at death (3.5 fixed)
    pub end_scale_y: f32,
    /// Glow at birth, sized layout with [`Self::DATA_GLOW`] only
    pub start_glow: Option<f32>,
    /// Glow at death
    pub end_glow: Option<f32>,
    /// Source blend function, sized layout with [`Self::DATA_BLEND`] only
    pub blend_func_source: Option<u8>,
    /// Destination blend function
    pub blend_func_dest: Option<u8>,
    /// True when this system was (or should be) carried in the legacy
    /// 86-byte layout
    pub legacy: bool,
}

impl ParticleSystem {
    /// Particle-flag bit: glow extension present in the sized layout.
    pub const DATA_GLOW: u32 = 0x0001_0000;
    /// Particle-flag bit: blend-function extension present.
    pub const DATA_BLEND: u32 = 0x0002_0000;

    const CONTEXT: &str = "ParticleSystem";

    /// Decode the legacy 86-byte layout.
    pub fn decode_legacy(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let mut system = Self::decode_sys_data(&mut r)?;
        system.decode_part_data(&mut r, PART_DATA_SIZE)?;
        system.legacy = true;
        Ok(system)
    }

    /// Decode the sized layout, returning the system and the bytes consumed.
    pub fn decode_sized(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let sys_size = r.u32()? as usize;
        if sys_size != SYS_DATA_SIZE {
            return Err(ProtocolError::malformed(
                Self::CONTEXT,
                r.pos(),
                format!("unknown system block revision: {sys_size} bytes"),
            ));
        }
        let mut system = Self::decode_sys_data(&mut r)?;
        let part_size = r.u32()? as usize;
        system.decode_part_data(&mut r, part_size)?;
        system.legacy = false;
        Ok((system, r.pos()))
    }

    fn decode_sys_data(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            crc: r.u32()?,
            flags: r.u32()?,
            pattern: r.u8()?,
            max_age: r.fixed_u16_be(false, 8, 8)?,
            start_age: r.fixed_u16_be(false, 8, 8)?,
            inner_angle: r.fixed_u8(false, 3, 5)?,
            outer_angle: r.fixed_u8(false, 3, 5)?,
            burst_rate: r.fixed_u16_be(false, 8, 8)?,
            burst_radius: r.fixed_u16_be(false, 8, 8)?,
            burst_speed_min: r.fixed_u16_be(false, 8, 8)?,
            burst_speed_max: r.fixed_u16_be(false, 8, 8)?,
            burst_part_count: r.u8()?,
            angular_velocity: Vec3::new(
                r.fixed_u16_be(true, 8, 7)?,
                r.fixed_u16_be(true, 8, 7)?,
                r.fixed_u16_be(true, 8, 7)?,
            ),
            acceleration: Vec3::new(
                r.fixed_u16_be(true, 8, 7)?,
                r.fixed_u16_be(true, 8, 7)?,
                r.fixed_u16_be(true, 8, 7)?,
            ),
            texture: r.uuid()?,
            target: r.uuid()?,
            part_flags: 0,
            part_max_age: 0.0,
            start_color: Rgba::default(),
            end_color: Rgba::default(),
            start_scale_x: 0.0,
            start_scale_y: 0.0,
            end_scale_x: 0.0,
            end_scale_y: 0.0,
            start_glow: None,
            end_glow: None,
            blend_func_source: None,
            blend_func_dest: None,
            legacy: true,
        })
    }

    fn decode_part_data(&mut self, r: &mut Reader<'_>, declared: usize) -> Result<()> {
        let start = r.pos();
        self.part_flags = r.u32()?;
        self.part_max_age = r.fixed_u16_be(false, 8, 8)?;
        let sc = r.bytes(4)?;
        self.start_color = Rgba::from_bytes([sc[0], sc[1], sc[2], sc[3]]);
        let ec = r.bytes(4)?;
        self.end_color = Rgba::from_bytes([ec[0], ec[1], ec[2], ec[3]]);
        self.start_scale_x = r.fixed_u8(false, 3, 5)?;
        self.start_scale_y = r.fixed_u8(false, 3, 5)?;
        self.end_scale_x = r.fixed_u8(false, 3, 5)?;
        self.end_scale_y = r.fixed_u8(false, 3, 5)?;

        let mut expected = PART_DATA_SIZE;
        if self.part_flags & Self::DATA_GLOW != 0 {
            self.start_glow = Some(f32::from(r.u8()?) / 255.0);
            self.end_glow = Some(f32::from(r.u8()?) / 255.0);
            expected += 2;
        }
        if self.part_flags & Self::DATA_BLEND != 0 {
            self.blend_func_source = Some(r.u8()?);
            self.blend_func_dest = Some(r.u8()?);
            expected += 2;
        }
        if declared != expected {
            return Err(ProtocolError::malformed(
                Self::CONTEXT,
                start,
                format!("particle block declares {declared} bytes, flags imply {expected}"),
            ));
        }
        Ok(())
    }

    /// Encode in whichever layout [`Self::legacy`] selects.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(LEGACY_SIZE + 12);
        if self.legacy {
            self.encode_sys_data(&mut w);
            self.encode_part_data(&mut w);
        } else {
            w.put_u32(SYS_DATA_SIZE as u32);
            self.encode_sys_data(&mut w);
            let mut part = Writer::with_capacity(PART_DATA_SIZE + 4);
            self.encode_part_data(&mut part);
            let part = part.into_bytes();
            w.put_u32(part.len() as u32);
            w.put_bytes(&part);
        }
        w.into_bytes()
    }

    fn encode_sys_data(&self, w: &mut Writer) {
        w.put_u32(self.crc);
        w.put_u32(self.flags);
        w.put_u8(self.pattern);
        w.put_fixed_u16_be(self.max_age, false, 8, 8);
        w.put_fixed_u16_be(self.start_age, false, 8, 8);
        w.put_fixed_u8(self.inner_angle, false, 3, 5);
        w.put_fixed_u8(self.outer_angle, false, 3, 5);
        w.put_fixed_u16_be(self.burst_rate, false, 8, 8);
        w.put_fixed_u16_be(self.burst_radius, false, 8, 8);
        w.put_fixed_u16_be(self.burst_speed_min, false, 8, 8);
        w.put_fixed_u16_be(self.burst_speed_max, false, 8, 8);
        w.put_u8(self.burst_part_count);
        for v in [self.angular_velocity, self.acceleration] {
            w.put_fixed_u16_be(v.x, true, 8, 7);
            w.put_fixed_u16_be(v.y, true, 8, 7);
            w.put_fixed_u16_be(v.z, true, 8, 7);
        }
        w.put_uuid(self.texture);
        w.put_uuid(self.target);
    }

    fn encode_part_data(&self, w: &mut Writer) {
        w.put_u32(self.part_flags);
        w.put_fixed_u16_be(self.part_max_age, false, 8, 8);
        w.put_bytes(&self.start_color.to_bytes());
        w.put_bytes(&self.end_color.to_bytes());
        w.put_fixed_u8(self.start_scale_x, false, 3, 5);
        w.put_fixed_u8(self.start_scale_y, false, 3, 5);
        w.put_fixed_u8(self.end_scale_x, false, 3, 5);
        w.put_fixed_u8(self.end_scale_y, false, 3, 5);
        if self.part_flags & Self::DATA_GLOW != 0 {
            let start = self.start_glow.unwrap_or(0.0);
            let end = self.end_glow.unwrap_or(0.0);
            w.put_u8((start * 255.0).round().clamp(0.0, 255.0) as u8);
            w.put_u8((end * 255.0).round().clamp(0.0, 255.0) as u8);
        }
        if self.part_flags & Self::DATA_BLEND != 0 {
            w.put_u8(self.blend_func_source.unwrap_or(0));
            w.put_u8(self.blend_func_dest.unwrap_or(0));
        }
    }
}

impl Default for ParticleSystem {
    fn default() -> Self {
        Self {
            crc: 0,
            flags: 0,
            pattern: 0,
            max_age: 0.0,
            start_age: 0.0,
            inner_angle: 0.0,
            outer_angle: 0.0,
            burst_rate: 0.0,
            burst_radius: 0.0,
            burst_speed_min: 0.0,
            burst_speed_max: 0.0,
            burst_part_count: 0,
            angular_velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            texture: Uuid::nil(),
            target: Uuid::nil(),
            part_flags: 0,
            part_max_age: 0.0,
            start_color: Rgba::default(),
            end_color: Rgba::default(),
            start_scale_x: 0.0,
            start_scale_y: 0.0,
            end_scale_x: 0.0,
            end_scale_y: 0.0,
            start_glow: None,
            end_glow: None,
            blend_func_source: None,
            blend_func_dest: None,
            legacy: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParticleSystem {
        ParticleSystem {
            crc: 5,
            flags: 0x0103,
            pattern: 8,
            max_age: 10.0,
            start_age: 0.5,
            inner_angle: 0.25,
            outer_angle: 1.5,
            burst_rate: 0.25,
            burst_radius: 2.0,
            burst_speed_min: 1.0,
            burst_speed_max: 3.5,
            burst_part_count: 16,
            angular_velocity: Vec3::new(0.0, 0.0, 1.5),
            acceleration: Vec3::new(0.0, 0.0, -9.8046875),
            texture: Uuid::from_bytes([0xAB; 16]),
            target: Uuid::nil(),
            part_flags: 0x0011,
            part_max_age: 5.0,
            start_color: Rgba::new(255, 255, 255, 255),
            end_color: Rgba::new(255, 255, 255, 0),
            start_scale_x: 0.5,
            start_scale_y: 0.5,
            end_scale_x: 1.5,
            end_scale_y: 1.5,
            start_glow: None,
            end_glow: None,
            blend_func_source: None,
            blend_func_dest: None,
            legacy: true,
        }
    }

    #[test]
    fn legacy_layout_is_86_bytes_and_round_trips() {
        let system = sample();
        let bytes = system.encode();
        assert_eq!(bytes.len(), LEGACY_SIZE);
        let decoded = ParticleSystem::decode_legacy(&bytes).unwrap();
        assert_eq!(decoded, system);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn sized_layout_without_extensions_is_94_bytes() {
        let mut system = sample();
        system.legacy = false;
        let bytes = system.encode();
        assert_eq!(bytes.len(), LEGACY_SIZE + 8);
        let (decoded, consumed) = ParticleSystem::decode_sized(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, system);
    }

    #[test]
    fn glow_and_blend_extensions_round_trip() {
        let mut system = sample();
        system.legacy = false;
        system.part_flags |= ParticleSystem::DATA_GLOW | ParticleSystem::DATA_BLEND;
        system.start_glow = Some(1.0);
        system.end_glow = Some(0.0);
        system.blend_func_source = Some(2);
        system.blend_func_dest = Some(5);

        let bytes = system.encode();
        assert_eq!(bytes.len(), LEGACY_SIZE + 8 + 4);
        let (decoded, consumed) = ParticleSystem::decode_sized(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, system);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn unknown_system_revision_is_malformed() {
        let mut system = sample();
        system.legacy = false;
        let mut bytes = system.encode();
        bytes[0] = 70; // claim a 70-byte system block
        assert!(matches!(
            ParticleSystem::decode_sized(&bytes),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn part_size_contradicting_flags_is_malformed() {
        let mut system = sample();
        system.legacy = false;
        let mut bytes = system.encode();
        // The part-size field sits right after the 4-byte sys size and the
        // 68-byte system block.
        let part_size_offset = 4 + SYS_DATA_SIZE;
        bytes[part_size_offset] = (PART_DATA_SIZE + 2) as u8;
        assert!(ParticleSystem::decode_sized(&bytes).is_err());
    }
}
