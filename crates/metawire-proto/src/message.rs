//! Frame types and top-level payload dispatch.
//!
//! The transport hands this layer `(kind, bytes)` frames - reliability,
//! acking, and zero-code decompression already applied - and takes the same
//! shape back for outbound traffic. [`Payload::decode`] is a plain dispatch
//! table over [`MessageKind`]: each payload has its own codec and the match
//! is exhaustive, so adding a message type without wiring its codec is a
//! compile error.
//!
//! # Invariants
//!
//! - Unknown frame kinds survive decode and encode unchanged; an unknown
//!   numeric id is data, not an error.
//! - `Payload::decode(frame).encode()` reproduces `frame` for canonical
//!   encodings (verified by round-trip tests).

use bytes::Bytes;

use crate::{
    error::Result,
    payloads::{
        image::{ImageData, ImageNotInDatabase, ImagePacket, RequestImage},
        object::{
            ImprovedTerseObjectUpdate, KillObject, ObjectUpdate, ObjectUpdateCached,
            ObjectUpdateCompressed, RequestMultipleObjects,
        },
    },
};

/// Frame types in scope, identified by their wire message numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Client request for texture data
    RequestImage,
    /// First packet of a texture: header plus initial chunk
    ImageData,
    /// Subsequent texture packet
    ImagePacket,
    /// Server report that a texture does not exist
    ImageNotInDatabase,
    /// Full object update
    ObjectUpdate,
    /// Delta-compressed object update
    ObjectUpdateCompressed,
    /// CRC-only update for objects the client may have cached
    ObjectUpdateCached,
    /// High-frequency movement update
    ImprovedTerseObjectUpdate,
    /// Client re-request for objects missing from its cache
    RequestMultipleObjects,
    /// Object removal notice
    KillObject,
    /// Any frame type outside this library's scope, id preserved
    Unknown(u32),
}

impl MessageKind {
    /// Map a wire message number to a kind.
    pub fn from_id(id: u32) -> Self {
        match id {
            3 => Self::RequestMultipleObjects,
            8 => Self::RequestImage,
            9 => Self::ImageData,
            10 => Self::ImagePacket,
            12 => Self::ObjectUpdate,
            13 => Self::ObjectUpdateCompressed,
            14 => Self::ObjectUpdateCached,
            15 => Self::ImprovedTerseObjectUpdate,
            16 => Self::KillObject,
            86 => Self::ImageNotInDatabase,
            other => Self::Unknown(other),
        }
    }

    /// Wire message number for this kind.
    pub fn id(self) -> u32 {
        match self {
            Self::RequestMultipleObjects => 3,
            Self::RequestImage => 8,
            Self::ImageData => 9,
            Self::ImagePacket => 10,
            Self::ObjectUpdate => 12,
            Self::ObjectUpdateCompressed => 13,
            Self::ObjectUpdateCached => 14,
            Self::ImprovedTerseObjectUpdate => 15,
            Self::KillObject => 16,
            Self::ImageNotInDatabase => 86,
            Self::Unknown(id) => id,
        }
    }
}

/// A framed datagram as exchanged with the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub kind: MessageKind,
    /// Raw payload bytes (framing already stripped)
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame from a kind and payload bytes.
    pub fn new(kind: MessageKind, payload: impl Into<Bytes>) -> Self {
        Self { kind, payload: payload.into() }
    }
}

/// A decoded, typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Client request for texture data
    RequestImage(RequestImage),
    /// Texture header packet
    ImageData(ImageData),
    /// Texture body packet
    ImagePacket(ImagePacket),
    /// Texture missing on the server
    ImageNotInDatabase(ImageNotInDatabase),
    /// Full object update
    ObjectUpdate(ObjectUpdate),
    /// Delta-compressed object update
    ObjectUpdateCompressed(ObjectUpdateCompressed),
    /// CRC-only cached-object probe
    ObjectUpdateCached(ObjectUpdateCached),
    /// High-frequency movement update
    ImprovedTerseObjectUpdate(ImprovedTerseObjectUpdate),
    /// Re-request for objects missing from the client cache
    RequestMultipleObjects(RequestMultipleObjects),
    /// Object removal notice
    KillObject(KillObject),
    /// Unrecognized frame, carried through untouched
    Unknown {
        /// Raw wire message number
        id: u32,
        /// Raw payload bytes
        data: Bytes,
    },
}

impl Payload {
    /// Decode a frame into a typed payload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ProtocolError`] when the payload bytes contradict
    /// the grammar for the frame's kind. Unknown kinds never fail; they
    /// decode to [`Payload::Unknown`].
    pub fn decode(frame: &Frame) -> Result<Self> {
        let bytes = &frame.payload;
        Ok(match frame.kind {
            MessageKind::RequestImage => Self::RequestImage(RequestImage::decode(bytes)?),
            MessageKind::ImageData => Self::ImageData(ImageData::decode(bytes)?),
            MessageKind::ImagePacket => Self::ImagePacket(ImagePacket::decode(bytes)?),
            MessageKind::ImageNotInDatabase => {
                Self::ImageNotInDatabase(ImageNotInDatabase::decode(bytes)?)
            },
            MessageKind::ObjectUpdate => Self::ObjectUpdate(ObjectUpdate::decode(bytes)?),
            MessageKind::ObjectUpdateCompressed => {
                Self::ObjectUpdateCompressed(ObjectUpdateCompressed::decode(bytes)?)
            },
            MessageKind::ObjectUpdateCached => {
                Self::ObjectUpdateCached(ObjectUpdateCached::decode(bytes)?)
            },
            MessageKind::ImprovedTerseObjectUpdate => {
                Self::ImprovedTerseObjectUpdate(ImprovedTerseObjectUpdate::decode(bytes)?)
            },
            MessageKind::RequestMultipleObjects => {
                Self::RequestMultipleObjects(RequestMultipleObjects::decode(bytes)?)
            },
            MessageKind::KillObject => Self::KillObject(KillObject::decode(bytes)?),
            MessageKind::Unknown(id) => Self::Unknown { id, data: bytes.clone() },
        })
    }

    /// Frame kind corresponding to this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::RequestImage(_) => MessageKind::RequestImage,
            Self::ImageData(_) => MessageKind::ImageData,
            Self::ImagePacket(_) => MessageKind::ImagePacket,
            Self::ImageNotInDatabase(_) => MessageKind::ImageNotInDatabase,
            Self::ObjectUpdate(_) => MessageKind::ObjectUpdate,
            Self::ObjectUpdateCompressed(_) => MessageKind::ObjectUpdateCompressed,
            Self::ObjectUpdateCached(_) => MessageKind::ObjectUpdateCached,
            Self::ImprovedTerseObjectUpdate(_) => MessageKind::ImprovedTerseObjectUpdate,
            Self::RequestMultipleObjects(_) => MessageKind::RequestMultipleObjects,
            Self::KillObject(_) => MessageKind::KillObject,
            Self::Unknown { id, .. } => MessageKind::Unknown(*id),
        }
    }

    /// Encode this payload into a frame in wire layout.
    pub fn encode(&self) -> Frame {
        let payload: Bytes = match self {
            Self::RequestImage(p) => p.encode().into(),
            Self::ImageData(p) => p.encode().into(),
            Self::ImagePacket(p) => p.encode().into(),
            Self::ImageNotInDatabase(p) => p.encode().into(),
            Self::ObjectUpdate(p) => p.encode().into(),
            Self::ObjectUpdateCompressed(p) => p.encode().into(),
            Self::ObjectUpdateCached(p) => p.encode().into(),
            Self::ImprovedTerseObjectUpdate(p) => p.encode().into(),
            Self::RequestMultipleObjects(p) => p.encode().into(),
            Self::KillObject(p) => p.encode().into(),
            Self::Unknown { data, .. } => data.clone(),
        };
        Frame { kind: self.kind(), payload }
    }
}
