//! Image transfer payloads.
//!
//! Texture downloads use a three-message scheme: the client asks with
//! `RequestImage`, the server answers with one `ImageData` header packet
//! (total size, codec, packet count, first chunk) followed by zero or more
//! `ImagePacket` body packets, or a single `ImageNotInDatabase` when the
//! asset does not exist. Body packets carry up to 1000 payload bytes each
//! and may arrive in any order.

use bytes::Bytes;
use uuid::Uuid;

use crate::{
    error::Result,
    wire::{Reader, Writer},
};

/// Discard level that cancels an in-flight request when paired with
/// priority `0.0`.
pub const DISCARD_CANCEL: i8 = -1;

/// Maximum payload bytes carried by a single body packet.
pub const BODY_PACKET_SIZE: u32 = 1000;

/// Texture variants a request can name.
///
/// Unknown discriminants are preserved; new server-side bake channels have
/// appeared before without a protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageKind {
    /// Ordinary texture asset
    #[default]
    Normal,
    /// Client-composited avatar bake
    Baked,
    /// Server-composited avatar bake
    ServerBaked,
    /// Unrecognized discriminant, kept as-is
    Other(u8),
}

impl ImageKind {
    /// Map a wire discriminant to a kind.
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Self::Normal,
            1 => Self::Baked,
            2 => Self::ServerBaked,
            other => Self::Other(other),
        }
    }

    /// Wire discriminant for this kind.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Baked => 1,
            Self::ServerBaked => 2,
            Self::Other(v) => v,
        }
    }
}

/// Codec of a downloaded asset, reported in the header packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageCodec {
    /// Invalid / unset
    Invalid,
    /// Raw RGBA
    Rgb,
    /// JPEG2000
    #[default]
    J2c,
    /// Windows bitmap
    Bmp,
    /// Targa
    Tga,
    /// Plain JPEG
    Jpeg,
    /// Unrecognized discriminant, kept as-is
    Other(u8),
}

impl ImageCodec {
    /// Map a wire discriminant to a codec.
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Self::Invalid,
            1 => Self::Rgb,
            2 => Self::J2c,
            3 => Self::Bmp,
            4 => Self::Tga,
            5 => Self::Jpeg,
            other => Self::Other(other),
        }
    }

    /// Wire discriminant for this codec.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Invalid => 0,
            Self::Rgb => 1,
            Self::J2c => 2,
            Self::Bmp => 3,
            Self::Tga => 4,
            Self::Jpeg => 5,
            Self::Other(v) => v,
        }
    }
}

/// One requested image within a [`RequestImage`] payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequestBlock {
    /// Asset being requested
    pub image_id: Uuid,
    /// Quality layers to omit; [`DISCARD_CANCEL`] with priority `0.0`
    /// cancels the request
    pub discard_level: i8,
    /// Server-side transmission priority, larger is sooner
    pub download_priority: f32,
    /// First packet the server should (re)send
    pub packet: u32,
    /// Texture variant
    pub kind: ImageKind,
}

/// Client request for one or more textures.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestImage {
    /// Requesting agent
    pub agent_id: Uuid,
    /// Agent's session
    pub session_id: Uuid,
    /// Requested images
    pub requests: Vec<ImageRequestBlock>,
}

impl RequestImage {
    const CONTEXT: &str = "RequestImage";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        let agent_id = r.uuid()?;
        let session_id = r.uuid()?;
        let count = r.u8()? as usize;
        let mut requests = Vec::with_capacity(count);
        for _ in 0..count {
            requests.push(ImageRequestBlock {
                image_id: r.uuid()?,
                discard_level: r.i8()?,
                download_priority: r.f32()?,
                packet: r.u32()?,
                kind: ImageKind::from_wire(r.u8()?),
            });
        }
        Ok(Self { agent_id, session_id, requests })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(33 + self.requests.len() * 26);
        w.put_uuid(self.agent_id);
        w.put_uuid(self.session_id);
        w.put_u8(self.requests.len().min(u8::MAX as usize) as u8);
        for req in self.requests.iter().take(u8::MAX as usize) {
            w.put_uuid(req.image_id);
            w.put_i8(req.discard_level);
            w.put_f32(req.download_priority);
            w.put_u32(req.packet);
            w.put_u8(req.kind.to_wire());
        }
        w.into_bytes()
    }
}

/// Texture header packet: transfer metadata plus the first chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Asset this transfer belongs to
    pub id: Uuid,
    /// Asset codec
    pub codec: ImageCodec,
    /// Total asset size in bytes
    pub size: u32,
    /// Total packet count including this header
    pub packets: u16,
    /// Initial chunk (occupies offset 0 of the assembled asset)
    pub data: Bytes,
}

impl ImageData {
    const CONTEXT: &str = "ImageData";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        Ok(Self {
            id: r.uuid()?,
            codec: ImageCodec::from_wire(r.u8()?),
            size: r.u32()?,
            packets: r.u16()?,
            data: Bytes::copy_from_slice(r.var16()?),
        })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(25 + self.data.len());
        w.put_uuid(self.id);
        w.put_u8(self.codec.to_wire());
        w.put_u32(self.size);
        w.put_u16(self.packets);
        w.put_var16(&self.data);
        w.into_bytes()
    }
}

/// Texture body packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePacket {
    /// Asset this transfer belongs to
    pub id: Uuid,
    /// Packet index; the header is packet 0, bodies start at 1
    pub packet: u16,
    /// Payload bytes, up to [`BODY_PACKET_SIZE`]
    pub data: Bytes,
}

impl ImagePacket {
    const CONTEXT: &str = "ImagePacket";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        Ok(Self {
            id: r.uuid()?,
            packet: r.u16()?,
            data: Bytes::copy_from_slice(r.var16()?),
        })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(20 + self.data.len());
        w.put_uuid(self.id);
        w.put_u16(self.packet);
        w.put_var16(&self.data);
        w.into_bytes()
    }
}

/// Server report that a requested asset does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageNotInDatabase {
    /// The missing asset
    pub id: Uuid,
}

impl ImageNotInDatabase {
    const CONTEXT: &str = "ImageNotInDatabase";

    /// Decode from payload bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(Self::CONTEXT, bytes);
        Ok(Self { id: r.uuid()? })
    }

    /// Encode to wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(16);
        w.put_uuid(self.id);
        w.into_bytes()
    }
}
