//! Extra parameter block: flexible path, light, sculpt, mesh.
//!
//! Wire format: `count:u8`, then `count` repetitions of
//! `{type:u16, length:u32, payload:length}`. Unknown types are carried
//! through opaquely - the cursor always advances by the declared length so
//! later parameters stay parseable.

use bytes::Bytes;
use glam::Vec3;
use uuid::Uuid;

use crate::{
    error::{ProtocolError, Result},
    object::snapshot::Rgba,
    wire::{Reader, Writer},
};

/// Flexible path parameter type.
pub const FLEXIBLE: u16 = 0x10;
/// Light parameter type.
pub const LIGHT: u16 = 0x20;
/// Sculpt parameter type.
pub const SCULPT: u16 = 0x30;
/// Mesh parameter type (sculpt layout, mesh interpretation).
pub const MESH: u16 = 0x60;
/// Mesh flags parameter type.
pub const MESH_FLAGS: u16 = 0x70;

/// Flexible path dynamics. 16 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlexibleData {
    /// Simulation softness, 0-3
    pub softness: u8,
    /// Spring tension
    pub tension: f32,
    /// Air friction
    pub drag: f32,
    /// Gravity bias
    pub gravity: f32,
    /// Wind sensitivity
    pub wind: f32,
    /// Constant force applied to the path
    pub force: Vec3,
}

impl FlexibleData {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        // Softness rides the top bits of the first two bytes.
        let b0 = r.u8()?;
        let b1 = r.u8()?;
        Ok(Self {
            softness: ((b0 & 0x80) >> 6) | ((b1 & 0x80) >> 7),
            tension: f32::from(b0 & 0x7F) / 10.0,
            drag: f32::from(b1 & 0x7F) / 10.0,
            gravity: f32::from(r.u8()?) / 10.0 - 10.0,
            wind: f32::from(r.u8()?) / 10.0,
            force: r.vec3()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        let tension = (self.tension * 10.0).round().clamp(0.0, 127.0) as u8;
        let drag = (self.drag * 10.0).round().clamp(0.0, 127.0) as u8;
        w.put_u8(((self.softness & 2) << 6) | tension);
        w.put_u8(((self.softness & 1) << 7) | drag);
        w.put_u8(((self.gravity + 10.0) * 10.0).round().clamp(0.0, 255.0) as u8);
        w.put_u8((self.wind * 10.0).round().clamp(0.0, 255.0) as u8);
        w.put_vec3(self.force);
    }
}

/// Point-light emission. 16 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightData {
    /// Light color; the alpha channel carries intensity
    pub color: Rgba,
    /// Radius in meters
    pub radius: f32,
    /// Cutoff angle
    pub cutoff: f32,
    /// Distance falloff
    pub falloff: f32,
}

impl LightData {
    /// Emission intensity in `[0, 1]`, stored in the color's alpha byte.
    pub fn intensity(&self) -> f32 {
        f32::from(self.color.a) / 255.0
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let b = r.bytes(4)?;
        Ok(Self {
            color: Rgba::from_bytes([b[0], b[1], b[2], b[3]]),
            radius: r.f32()?,
            cutoff: r.f32()?,
            falloff: r.f32()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.put_bytes(&self.color.to_bytes());
        w.put_f32(self.radius);
        w.put_f32(self.cutoff);
        w.put_f32(self.falloff);
    }
}

/// Sculpt or mesh reference. 17 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SculptData {
    /// Sculpt map or mesh asset
    pub texture: Uuid,
    /// Sculpt type byte, including mirror/invert bits
    pub kind: u8,
}

impl SculptData {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self { texture: r.uuid()?, kind: r.u8()? })
    }

    fn encode(&self, w: &mut Writer) {
        w.put_uuid(self.texture);
        w.put_u8(self.kind);
    }
}

/// All extra parameters carried by one object.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtraParams {
    /// Flexible path dynamics
    pub flexible: Option<FlexibleData>,
    /// Light emission
    pub light: Option<LightData>,
    /// Sculpt reference
    pub sculpt: Option<SculptData>,
    /// Mesh reference
    pub mesh: Option<SculptData>,
    /// Mesh flags word
    pub mesh_flags: Option<u32>,
    /// Unrecognized parameters, carried through opaquely
    pub unknown: Vec<(u16, Bytes)>,
}

impl ExtraParams {
    /// True when no parameter is present.
    pub fn is_empty(&self) -> bool {
        self.flexible.is_none()
            && self.light.is_none()
            && self.sculpt.is_none()
            && self.mesh.is_none()
            && self.mesh_flags.is_none()
            && self.unknown.is_empty()
    }

    /// Decode from a reader positioned at the count byte.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let count = r.u8()?;
        let mut params = Self::default();
        for _ in 0..count {
            let param_type = r.u16()?;
            let len = r.u32()? as usize;
            if len > r.remaining() {
                return Err(ProtocolError::BlockLength {
                    context: r.context(),
                    declared: len,
                    available: r.remaining(),
                });
            }
            let payload = r.bytes(len)?;
            let mut pr = Reader::new("ExtraParams", payload);
            match param_type {
                FLEXIBLE => params.flexible = Some(FlexibleData::decode(&mut pr)?),
                LIGHT => params.light = Some(LightData::decode(&mut pr)?),
                SCULPT => params.sculpt = Some(SculptData::decode(&mut pr)?),
                MESH => params.mesh = Some(SculptData::decode(&mut pr)?),
                MESH_FLAGS => params.mesh_flags = Some(pr.u32()?),
                other => params.unknown.push((other, Bytes::copy_from_slice(payload))),
            }
        }
        Ok(params)
    }

    /// Decode a standalone extra-params byte field.
    pub fn decode_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        Self::decode(&mut Reader::new("ExtraParams", bytes))
    }

    /// Encode into a writer, canonical parameter order.
    pub fn encode(&self, w: &mut Writer) {
        let count = usize::from(self.flexible.is_some())
            + usize::from(self.light.is_some())
            + usize::from(self.sculpt.is_some())
            + usize::from(self.mesh.is_some())
            + usize::from(self.mesh_flags.is_some())
            + self.unknown.len();
        w.put_u8(count.min(u8::MAX as usize) as u8);

        if let Some(flexible) = &self.flexible {
            let mut body = Writer::with_capacity(16);
            flexible.encode(&mut body);
            put_param(w, FLEXIBLE, &body.into_bytes());
        }
        if let Some(light) = &self.light {
            let mut body = Writer::with_capacity(16);
            light.encode(&mut body);
            put_param(w, LIGHT, &body.into_bytes());
        }
        if let Some(sculpt) = &self.sculpt {
            let mut body = Writer::with_capacity(17);
            sculpt.encode(&mut body);
            put_param(w, SCULPT, &body.into_bytes());
        }
        if let Some(mesh) = &self.mesh {
            let mut body = Writer::with_capacity(17);
            mesh.encode(&mut body);
            put_param(w, MESH, &body.into_bytes());
        }
        if let Some(flags) = self.mesh_flags {
            put_param(w, MESH_FLAGS, &flags.to_le_bytes());
        }
        for (param_type, payload) in &self.unknown {
            put_param(w, *param_type, payload);
        }
    }

    /// Encode as a standalone byte field.
    pub fn encode_bytes(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.into_bytes()
    }
}

fn put_param(w: &mut Writer, param_type: u16, payload: &[u8]) {
    w.put_u16(param_type);
    w.put_u32(payload.len() as u32);
    w.put_bytes(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_encode_as_zero_count() {
        let params = ExtraParams::default();
        assert_eq!(params.encode_bytes(), vec![0]);
        assert_eq!(ExtraParams::decode_bytes(&[0]).unwrap(), params);
    }

    #[test]
    fn full_set_round_trips() {
        let params = ExtraParams {
            flexible: Some(FlexibleData {
                softness: 2,
                tension: 1.5,
                drag: 3.0,
                gravity: -2.5,
                wind: 0.4,
                force: Vec3::new(0.0, 0.0, -1.0),
            }),
            light: Some(LightData {
                color: Rgba::new(255, 200, 100, 128),
                radius: 10.0,
                cutoff: 0.5,
                falloff: 0.75,
            }),
            sculpt: Some(SculptData { texture: Uuid::from_bytes([3; 16]), kind: 1 }),
            mesh: None,
            mesh_flags: Some(0x0000_0001),
            unknown: Vec::new(),
        };
        let bytes = params.encode_bytes();
        let decoded = ExtraParams::decode_bytes(&bytes).unwrap();
        assert_eq!(decoded, params);
        assert_eq!(decoded.encode_bytes(), bytes);
    }

    #[test]
    fn unknown_param_type_advances_cursor() {
        let mut w = Writer::new();
        w.put_u8(2);
        put_param(&mut w, 0x4242, &[1, 2, 3, 4, 5]);
        put_param(&mut w, MESH_FLAGS, &7u32.to_le_bytes());
        let bytes = w.into_bytes();

        let params = ExtraParams::decode_bytes(&bytes).unwrap();
        assert_eq!(params.unknown, vec![(0x4242, Bytes::from(vec![1, 2, 3, 4, 5]))]);
        // The parameter after the unknown one still parsed.
        assert_eq!(params.mesh_flags, Some(7));
    }

    #[test]
    fn oversized_param_length_is_rejected() {
        let mut w = Writer::new();
        w.put_u8(1);
        w.put_u16(LIGHT);
        w.put_u32(1000);
        w.put_bytes(&[0; 4]);
        assert!(matches!(
            ExtraParams::decode_bytes(&w.into_bytes()),
            Err(ProtocolError::BlockLength { .. })
        ));
    }

    #[test]
    fn flexible_softness_bits_round_trip() {
        for softness in 0..=3u8 {
            let flexible = FlexibleData {
                softness,
                tension: 0.5,
                drag: 1.0,
                gravity: 0.0,
                wind: 0.0,
                force: Vec3::ZERO,
            };
            let mut w = Writer::new();
            flexible.encode(&mut w);
            let bytes = w.into_bytes();
            assert_eq!(bytes.len(), 16);
            let got = FlexibleData::decode(&mut Reader::new("test", &bytes)).unwrap();
            assert_eq!(got.softness, softness);
        }
    }
}
