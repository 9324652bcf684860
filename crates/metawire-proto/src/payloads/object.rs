//! Object update payloads.
//!
//! The simulator describes world state through four update messages of
//! descending verbosity: full `ObjectUpdate` blocks, delta-compressed
//! blocks, CRC-only cached-object probes, and terse movement blocks. This
//! module decodes the containers; the flag-driven inner grammars (compressed
//! data, terse data, motion data, texture entries, ...) live in
//! [`crate::object`].

use bytes::Bytes;
use glam::Vec3;
use uuid::Uuid;

use crate::{
    error::Result,
    wire::{Reader, Writer},
};

/// Full object update: one block per object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdate {
    /// Region the update originates from
    pub region_handle: u64,
    /// Simulator time dilation, `u16`-quantized fraction of real time
    pub time_dilation: u16,
    /// Updated objects
    pub blocks: Vec<ObjectUpdateBlock>,
}

/// One object's worth of a full update.
///
/// Field order is wire order. The `object_data` field is the variable-size
/// motion block of legal lengths 1, 60 and 76, decoded separately by
/// [`crate::object::object_data`]; `texture_entry`, `name_values`,
/// `ps_block` and `extra_params` likewise carry raw bytes for the dedicated
/// decoders.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpdateBlock {
    /// Region-local object id
    pub local_id: u32,
    /// Object state byte (attachment point for attachments)
    pub state: u8,
    /// Grid-stable object id
    pub full_id: Uuid,
    /// Update checksum
    pub crc: u32,
    /// Primitive code
    pub pcode: u8,
    /// Surface material
    pub material: u8,
    /// Default touch behavior
    pub click_action: u8,
    /// Object dimensions in meters
    pub scale: Vec3,
    /// Motion block (lengths 1, 60 or 76)
    pub object_data: Bytes,
    /// Parent object local id, 0 for unparented
    pub parent_id: u32,
    /// Object flags word
    pub update_flags: u32,
    /// Packed path parameters, wire order
    pub path: PackedPath,
    /// Packed profile parameters, wire order
    pub profile: PackedProfile,
    /// Per-face surface materials, raw
    pub texture_entry: Bytes,
    /// Texture animation block, raw
    pub texture_anim: Bytes,
    /// Newline-delimited name-value records, raw
    pub name_values: Bytes,
    /// Generic data field
    pub data: Bytes,
    /// Floating text
    pub text: String,
    /// Floating text color, RGBA
    pub text_color: [u8; 4],
    /// Media URL
    pub media_url: String,
    /// Particle system block, raw
    pub ps_block: Bytes,
    /// Extra parameters (flexible/light/sculpt/mesh), raw
    pub extra_params: Bytes,
    /// Attached sound asset
    pub sound_id: Uuid,
    /// Sound owner
    pub owner_id: Uuid,
    /// Sound gain
    pub gain: f32,
    /// Sound flags
    pub sound_flags: u8,
    /// Audible radius
    pub radius: f32,
    /// Legacy joint type
    pub joint_type: u8,
    /// Legacy joint pivot
    pub joint_pivot: Vec3,
    /// Legacy joint axis or anchor
    pub joint_axis_or_anchor: Vec3,
}

/// Packed path parameter bytes in wire order.
///
/// Kept packed here; [`crate::object::snapshot::PathParams::unpack`]
/// produces the float form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedPath {
    /// Extrusion curve
    pub curve: u8,
    /// Cut start, 1/50000 units
    pub begin: u16,
    /// Cut end, stored from the far end
    pub end: u16,
    /// Scale X, stored as `200 - 100x`
    pub scale_x: u8,
    /// Scale Y
    pub scale_y: u8,
    /// Shear X, 1/100 units
    pub shear_x: u8,
    /// Shear Y
    pub shear_y: u8,
    /// Twist at the far end
    pub twist: i8,
    /// Twist at the near end
    pub twist_begin: i8,
    /// Radius offset
    pub radius_offset: i8,
    /// Taper X
    pub taper_x: i8,
    /// Taper Y
    pub taper_y: i8,
    /// Revolutions beyond the first, 0.015 units
    pub revolutions: u8,
    /// Skew
    pub skew: i8,
}

impl PackedPath {
    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            curve: r.u8()?,
            begin: r.u16()?,
            end: r.u16()?,
            scale_x: r.u8()?,
            scale_y: r.u8()?,
            shear_x: r.u8()?,
            shear_y: r.u8()?,
            twist: r.i8()?,
            twist_begin: r.i8()?,
            radius_offset: r.i8()?,
            taper_x: r.i8()?,
            taper_y: r.i8()?,
            revolutions: r.u8()?,
            skew: r.i8()?,
        })
    }

    pub(crate) fn encode(&self, w: &mut Writer) {
        w.put_u8(self.curve);
        w.put_u16(self.begin);
        w.put_u16(self.end);
        w.put_u8(self.scale_x);
        w.put_u8(self.scale_y);
        w.put_u8(self.shear_x);
        w.put_u8(self.shear_y);
        w.put_i8(self.twist);
        w.put_i8(self.twist_begin);
        w.put_i8(self.radius_offset);
        w.put_i8(self.taper_x);
        w.put_i8(self.taper_y);
        w.put_u8(self.revolutions);
        w.put_i8(self.skew);
    }
}

/// Packed profile parameter bytes in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedProfile {
    /// Cross-section curve
    pub curve: u8,
    /// Cut start, 1/50000 units
    pub begin: u16,
    /// Cut end, stored from the far end
    pub end: u16,
    /// Hollow amount, 1/50000 units
    pub hollow: u16,
}

impl PackedProfile {
    pub(crate) fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self { curve: r.u8()?, begin: r.u16()?, end: r.u16()?, hollow: r.u16()? })
    }

    pub(crate) fn encode(&self, w: &mut Writer) {
        w.put_u8(self.curve);
        w.put_u16(self.begin);
        w.put_u16(self.end);
        w.put_u16(self.hollow);
    }
}

impl ObjectUpdate {
    const CONTEXT: &str = "ObjectUpdate";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let region_handle = r.u64()?;
        let time_dilation = r.u16()?;
        let count = r.u8()? as usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(ObjectUpdateBlock::decode(&mut r)?);
        }
        Ok(Self { region_handle, time_dilation, blocks })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(11 + self.blocks.len() * 256);
        w.put_u64(self.region_handle);
        w.put_u16(self.time_dilation);
        w.put_u8(self.blocks.len().min(u8::MAX as usize) as u8);
        for block in self.blocks.iter().take(u8::MAX as usize) {
            block.encode(&mut w);
        }
        w.into_bytes()
    }
}

impl ObjectUpdateBlock {
    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            local_id: r.u32()?,
            state: r.u8()?,
            full_id: r.uuid()?,
            crc: r.u32()?,
            pcode: r.u8()?,
            material: r.u8()?,
            click_action: r.u8()?,
            scale: r.vec3()?,
            object_data: Bytes::copy_from_slice(r.var8()?),
            parent_id: r.u32()?,
            update_flags: r.u32()?,
            path: PackedPath::decode(r)?,
            profile: PackedProfile::decode(r)?,
            texture_entry: Bytes::copy_from_slice(r.var16()?),
            texture_anim: Bytes::copy_from_slice(r.var8()?),
            name_values: Bytes::copy_from_slice(r.var16()?),
            data: Bytes::copy_from_slice(r.var16()?),
            text: {
                let raw = r.var8()?;
                // Text travels as a null-terminated variable field.
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(&raw[..end]).into_owned()
            },
            text_color: {
                let b = r.bytes(4)?;
                [b[0], b[1], b[2], b[3]]
            },
            media_url: {
                let raw = r.var8()?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                String::from_utf8_lossy(&raw[..end]).into_owned()
            },
            ps_block: Bytes::copy_from_slice(r.var8()?),
            extra_params: Bytes::copy_from_slice(r.var8()?),
            sound_id: r.uuid()?,
            owner_id: r.uuid()?,
            gain: r.f32()?,
            sound_flags: r.u8()?,
            radius: r.f32()?,
            joint_type: r.u8()?,
            joint_pivot: r.vec3()?,
            joint_axis_or_anchor: r.vec3()?,
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.put_u32(self.local_id);
        w.put_u8(self.state);
        w.put_uuid(self.full_id);
        w.put_u32(self.crc);
        w.put_u8(self.pcode);
        w.put_u8(self.material);
        w.put_u8(self.click_action);
        w.put_vec3(self.scale);
        w.put_var8(&self.object_data);
        w.put_u32(self.parent_id);
        w.put_u32(self.update_flags);
        self.path.encode(w);
        self.profile.encode(w);
        w.put_var16(&self.texture_entry);
        w.put_var8(&self.texture_anim);
        w.put_var16(&self.name_values);
        w.put_var16(&self.data);
        if self.text.is_empty() {
            w.put_var8(&[]);
        } else {
            let mut text = self.text.clone().into_bytes();
            text.push(0);
            w.put_var8(&text);
        }
        w.put_bytes(&self.text_color);
        if self.media_url.is_empty() {
            w.put_var8(&[]);
        } else {
            let mut url = self.media_url.clone().into_bytes();
            url.push(0);
            w.put_var8(&url);
        }
        w.put_var8(&self.ps_block);
        w.put_var8(&self.extra_params);
        w.put_uuid(self.sound_id);
        w.put_uuid(self.owner_id);
        w.put_f32(self.gain);
        w.put_u8(self.sound_flags);
        w.put_f32(self.radius);
        w.put_u8(self.joint_type);
        w.put_vec3(self.joint_pivot);
        w.put_vec3(self.joint_axis_or_anchor);
    }
}

/// Delta-compressed object update: flag word plus opaque compressed data
/// per block, decoded by [`crate::object::compressed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpdateCompressed {
    /// Region the update originates from
    pub region_handle: u64,
    /// Simulator time dilation
    pub time_dilation: u16,
    /// Compressed blocks
    pub blocks: Vec<CompressedBlock>,
}

/// One compressed object block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedBlock {
    /// Object flags word
    pub update_flags: u32,
    /// Compressed update bytes
    pub data: Bytes,
}

impl ObjectUpdateCompressed {
    const CONTEXT: &str = "ObjectUpdateCompressed";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let region_handle = r.u64()?;
        let time_dilation = r.u16()?;
        let count = r.u8()? as usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(CompressedBlock {
                update_flags: r.u32()?,
                data: Bytes::copy_from_slice(r.var16()?),
            });
        }
        Ok(Self { region_handle, time_dilation, blocks })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(11 + self.blocks.len() * 128);
        w.put_u64(self.region_handle);
        w.put_u16(self.time_dilation);
        w.put_u8(self.blocks.len().min(u8::MAX as usize) as u8);
        for block in self.blocks.iter().take(u8::MAX as usize) {
            w.put_u32(block.update_flags);
            w.put_var16(&block.data);
        }
        w.into_bytes()
    }
}

/// CRC-only update for objects the client may already have cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectUpdateCached {
    /// Region the update originates from
    pub region_handle: u64,
    /// Simulator time dilation
    pub time_dilation: u16,
    /// Probed objects
    pub blocks: Vec<CachedBlock>,
}

/// One cached-object probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedBlock {
    /// Region-local object id
    pub local_id: u32,
    /// Checksum of the full update the server would send
    pub crc: u32,
    /// Object flags word
    pub update_flags: u32,
}

impl ObjectUpdateCached {
    const CONTEXT: &str = "ObjectUpdateCached";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let region_handle = r.u64()?;
        let time_dilation = r.u16()?;
        let count = r.u8()? as usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(CachedBlock {
                local_id: r.u32()?,
                crc: r.u32()?,
                update_flags: r.u32()?,
            });
        }
        Ok(Self { region_handle, time_dilation, blocks })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(11 + self.blocks.len() * 12);
        w.put_u64(self.region_handle);
        w.put_u16(self.time_dilation);
        w.put_u8(self.blocks.len().min(u8::MAX as usize) as u8);
        for block in self.blocks.iter().take(u8::MAX as usize) {
            w.put_u32(block.local_id);
            w.put_u32(block.crc);
            w.put_u32(block.update_flags);
        }
        w.into_bytes()
    }
}

/// High-frequency movement update; inner layout decoded by
/// [`crate::object::terse`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImprovedTerseObjectUpdate {
    /// Region the update originates from
    pub region_handle: u64,
    /// Simulator time dilation
    pub time_dilation: u16,
    /// Terse blocks
    pub blocks: Vec<TerseBlock>,
}

/// One terse movement block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerseBlock {
    /// Fixed-layout movement data
    pub data: Bytes,
    /// Optional texture entry refresh, empty when absent
    pub texture_entry: Bytes,
}

impl ImprovedTerseObjectUpdate {
    const CONTEXT: &str = "ImprovedTerseObjectUpdate";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let region_handle = r.u64()?;
        let time_dilation = r.u16()?;
        let count = r.u8()? as usize;
        let mut blocks = Vec::with_capacity(count);
        for _ in 0..count {
            blocks.push(TerseBlock {
                data: Bytes::copy_from_slice(r.var8()?),
                texture_entry: Bytes::copy_from_slice(r.var16()?),
            });
        }
        Ok(Self { region_handle, time_dilation, blocks })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(11 + self.blocks.len() * 64);
        w.put_u64(self.region_handle);
        w.put_u16(self.time_dilation);
        w.put_u8(self.blocks.len().min(u8::MAX as usize) as u8);
        for block in self.blocks.iter().take(u8::MAX as usize) {
            w.put_var8(&block.data);
            w.put_var16(&block.texture_entry);
        }
        w.into_bytes()
    }
}

/// Cache-miss discriminants for [`RequestMultipleObjects`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMissType {
    /// Full update required
    Full,
    /// CRC mismatch against the cached copy
    CrcMismatch,
    /// Unrecognized discriminant, kept as-is
    Other(u8),
}

impl CacheMissType {
    /// Map a wire discriminant.
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Self::Full,
            1 => Self::CrcMismatch,
            other => Self::Other(other),
        }
    }

    /// Wire discriminant for this miss type.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Full => 0,
            Self::CrcMismatch => 1,
            Self::Other(v) => v,
        }
    }
}

/// Client re-request for objects its cache could not answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMultipleObjects {
    /// Requesting agent
    pub agent_id: Uuid,
    /// Agent's session
    pub session_id: Uuid,
    /// Requested objects
    pub requests: Vec<(CacheMissType, u32)>,
}

impl RequestMultipleObjects {
    const CONTEXT: &str = "RequestMultipleObjects";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let agent_id = r.uuid()?;
        let session_id = r.uuid()?;
        let count = r.u8()? as usize;
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            requests.push((CacheMissType::from_wire(r.u8()?), r.u32()?));
        }
        Ok(Self { agent_id, session_id, requests })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(33 + self.requests.len() * 5);
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_u8(self.requests.len().min(u8::MAX as usize) as u8);
        for (miss, local_id) in self.requests.iter().take(u8::MAX as usize) {
            w.put_u8(miss.to_wire());
            w.put_u32(*local_id);
        }
        w.into_bytes()
    }
}

/// Object removal notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillObject {
    /// Region-local ids of removed objects
    pub local_ids: Vec<u32>,
}

impl KillObject {
    const CONTEXT: &str = "KillObject";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let count = r.u8()? as usize;
        let mut local_ids = Vec::with_capacity(count);
        for _ in 0..count {
            local_ids.push(r.u32()?);
        }
        Ok(Self { local_ids })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(1 + self.local_ids.len() * 4);
        w.put_u8(self.local_ids.len().min(u8::MAX as usize) as u8);
        for id in self.local_ids.iter().take(u8::MAX as usize) {
            w.put_u32(*id);
        }
        w.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> ObjectUpdateBlock {
        ObjectUpdateBlock {
            local_id: 31_337,
            state: 0,
            full_id: Uuid::from_bytes([0x11; 16]),
            crc: 0xDEAD_BEEF,
            pcode: 9,
            material: 3,
            click_action: 0,
            scale: Vec3::new(0.5, 0.5, 2.0),
            object_data: Bytes::from(vec![0u8; 60]),
            parent_id: 0,
            update_flags: 0,
            path: PackedPath { curve: 16, scale_x: 100, scale_y: 100, ..PackedPath::default() },
            profile: PackedProfile { curve: 1, ..PackedProfile::default() },
            texture_entry: Bytes::new(),
            texture_anim: Bytes::new(),
            name_values: Bytes::new(),
            data: Bytes::new(),
            text: String::new(),
            text_color: [0; 4],
            media_url: String::new(),
            ps_block: Bytes::new(),
            extra_params: Bytes::from(vec![0u8]),
            sound_id: Uuid::nil(),
            owner_id: Uuid::nil(),
            gain: 0.0,
            sound_flags: 0,
            radius: 0.0,
            joint_type: 0,
            joint_pivot: Vec3::ZERO,
            joint_axis_or_anchor: Vec3::ZERO,
        }
    }

    #[test]
    fn object_update_round_trip() {
        let update = ObjectUpdate {
            region_handle: 0x0010_0000_0020_0000,
            time_dilation: 65_535,
            blocks: vec![sample_block(), {
                let mut b = sample_block();
                b.local_id = 7;
                b.text = "hi there".to_owned();
                b.text_color = [255, 0, 0, 255];
                b.media_url = "http://example.invalid/a".to_owned();
                b
            }],
        };
        assert_eq!(ObjectUpdate::decode(&update.encode()).unwrap(), update);
    }

    #[test]
    fn compressed_round_trip() {
        let update = ObjectUpdateCompressed {
            region_handle: 1,
            time_dilation: 40_000,
            blocks: vec![CompressedBlock {
                update_flags: 0x10,
                data: Bytes::from(vec![9; 80]),
            }],
        };
        assert_eq!(ObjectUpdateCompressed::decode(&update.encode()).unwrap(), update);
    }

    #[test]
    fn cached_round_trip() {
        let update = ObjectUpdateCached {
            region_handle: 2,
            time_dilation: 0,
            blocks: vec![
                CachedBlock { local_id: 1, crc: 2, update_flags: 3 },
                CachedBlock { local_id: 4, crc: 5, update_flags: 6 },
            ],
        };
        assert_eq!(ObjectUpdateCached::decode(&update.encode()).unwrap(), update);
    }

    #[test]
    fn terse_round_trip() {
        let update = ImprovedTerseObjectUpdate {
            region_handle: 3,
            time_dilation: 12,
            blocks: vec![TerseBlock {
                data: Bytes::from(vec![1; 44]),
                texture_entry: Bytes::new(),
            }],
        };
        assert_eq!(ImprovedTerseObjectUpdate::decode(&update.encode()).unwrap(), update);
    }

    #[test]
    fn request_multiple_objects_round_trip() {
        let req = RequestMultipleObjects {
            agent_id: Uuid::from_bytes([1; 16]),
            session_id: Uuid::from_bytes([2; 16]),
            requests: vec![(CacheMissType::Full, 10), (CacheMissType::CrcMismatch, 11)],
        };
        assert_eq!(RequestMultipleObjects::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn kill_object_round_trip() {
        let kill = KillObject { local_ids: vec![5, 6, 7] };
        assert_eq!(KillObject::decode(&kill.encode()).unwrap(), kill);
    }

    #[test]
    fn truncated_block_fails_cleanly() {
        let update = ObjectUpdate {
            region_handle: 1,
            time_dilation: 2,
            blocks: vec![sample_block()],
        };
        let bytes = update.encode();
        assert!(ObjectUpdate::decode(&bytes[..bytes.len() - 10]).is_err());
    }
}
