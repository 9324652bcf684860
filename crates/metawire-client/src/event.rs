//! Events delivered to consumers.
//!
//! Texture sinks receive [`TextureEvent`]s: zero or more `Progress`
//! notifications (only when the request asked for progressive delivery)
//! followed by exactly one `Done` carrying the terminal state. The
//! pipeline additionally broadcasts [`ProgressEvent`]s for every packet on
//! a pipeline-wide channel, independent of per-request sinks.
//!
//! Object updates arrive as [`ObjectEvent`]s from the dispatcher.

use bytes::Bytes;
use metawire_proto::{
    object::{ObjectSnapshot, UpdateKind},
    payloads::object::CachedBlock,
};
use uuid::Uuid;

/// Terminal state of a texture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    /// Asset fully assembled; data is complete
    Finished,
    /// Deadline expired; data holds whatever arrived
    Timeout,
    /// Caller aborted; data is empty
    Aborted,
    /// Server reported the asset missing; data is empty
    NotFound,
}

/// Event delivered to a texture request's sink.
#[derive(Debug, Clone)]
pub enum TextureEvent {
    /// Bytes arrived (progressive requests only).
    Progress {
        /// Bytes assembled so far
        transferred: u32,
        /// Total asset size, 0 until the header arrives
        total_size: u32,
    },
    /// The request reached a terminal state. Fired exactly once per sink.
    Done {
        /// Terminal state
        state: TextureState,
        /// Assembled bytes (complete, partial, or empty depending on state)
        data: Bytes,
    },
}

/// Callback sink for texture events.
///
/// Shared so delivery can happen without holding the request's callback
/// lock; a sink is free to submit further requests from inside itself.
pub type TextureSink = std::sync::Arc<dyn Fn(&TextureEvent) + Send + Sync>;

/// Pipeline-wide download progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Asset being downloaded
    pub asset_id: Uuid,
    /// Bytes assembled so far
    pub transferred: u32,
    /// Total asset size, 0 until the header arrives
    pub total_size: u32,
}

/// Decoded object-update event.
#[derive(Debug, Clone)]
pub enum ObjectEvent {
    /// An object was created or changed.
    Update {
        /// Decoded attributes
        snapshot: Box<ObjectSnapshot>,
        /// Which update variant produced it
        kind: UpdateKind,
        /// Region the update came from
        region_handle: u64,
        /// Simulator time dilation, `u16`-quantized
        time_dilation: u16,
    },
    /// Objects left the region or were deleted.
    Kill {
        /// Region-local ids of removed objects
        local_ids: Vec<u32>,
    },
    /// The server probed the client's object cache; consumers answer with
    /// a re-request for the blocks they cannot satisfy.
    CacheProbe {
        /// Region the probe came from
        region_handle: u64,
        /// Probed objects
        blocks: Vec<CachedBlock>,
    },
}
