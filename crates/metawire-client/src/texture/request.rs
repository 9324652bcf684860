//! Per-request state: the lifecycle state machine and the reassembly
//! buffer.
//!
//! # State machine
//!
//! ```text
//! Pending ──> Started ──> InProgress ──> Finished
//!                                   ├──> Timeout
//!                                   ├──> Aborted
//!                                   └──> NotFound
//! ```
//!
//! Transitions are monotonic and terminal states are sinks;
//! [`TextureRequest::advance`] rejects anything else. Abort and not-found
//! may also fire before `InProgress`.
//!
//! # Reassembly
//!
//! Packet 0 is the header: it carries the codec, total size, packet count
//! and an initial chunk placed at offset zero. Body packet `N >= 1` lands
//! at `initial_chunk_size + 1000 * (N - 1)` and carries up to 1000 bytes,
//! the final one possibly short. [`TransferBuffer`] tracks seen indices in
//! an ordered set so duplicates are no-ops and the first gap is cheap to
//! find for re-requests.

use std::collections::BTreeSet;

use bytes::Bytes;
use metawire_proto::payloads::image::{BODY_PACKET_SIZE, ImageCodec, ImageKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use tokio::{sync::watch, time::Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::{TextureEvent, TextureSink};

/// Conventional download priority for newly submitted requests.
pub const DEFAULT_PRIORITY: f32 = 101_300.0;

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Admitted, waiting for a download slot
    Pending,
    /// Slot acquired, wire request about to go out
    Started,
    /// Wire request sent, packets expected
    InProgress,
    /// Asset fully assembled
    Finished,
    /// Deadline expired
    Timeout,
    /// Caller aborted
    Aborted,
    /// Server reported the asset missing
    NotFound,
}

impl RequestState {
    /// True for states no transition may leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Timeout | Self::Aborted | Self::NotFound)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Started => 1,
            Self::InProgress => 2,
            Self::Finished | Self::Timeout | Self::Aborted | Self::NotFound => 3,
        }
    }
}

/// Caller-supplied request parameters.
#[derive(Debug, Clone, Copy)]
pub struct TextureRequestOptions {
    /// Texture variant to ask the server for
    pub kind: ImageKind,
    /// Initial download priority, larger is sooner
    pub priority: f32,
    /// Quality layers to omit, `[-1, 5]`
    pub discard_level: i8,
    /// First packet to request (resume support)
    pub start_packet: u32,
    /// Deliver incremental progress to the sink
    pub progressive: bool,
}

impl Default for TextureRequestOptions {
    fn default() -> Self {
        Self {
            kind: ImageKind::Normal,
            priority: DEFAULT_PRIORITY,
            discard_level: 0,
            start_packet: 0,
            progressive: false,
        }
    }
}

/// Outcome of placing a body packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Bytes copied; `complete` when the buffer just filled
    Placed {
        /// True when `transferred` reached `total_size`
        complete: bool,
    },
    /// Packet index already seen; buffer untouched
    Duplicate,
    /// Packet inconsistent with the header (bad index or offset)
    Rejected,
}

/// Reassembly state for one multi-packet asset.
#[derive(Debug, Default)]
pub struct TransferBuffer {
    /// Total asset size; 0 until the header arrives
    pub total_size: u32,
    /// Asset codec from the header
    pub codec: ImageCodec,
    /// Total packet count including the header
    pub packet_count: u16,
    /// Bytes the header packet itself carried
    pub initial_chunk_size: u32,
    /// Bytes placed so far
    pub transferred: u32,
    /// True once the header has been applied
    pub header_arrived: bool,
    data: Vec<u8>,
    packets_seen: BTreeSet<u16>,
}

impl TransferBuffer {
    /// Apply the header packet. Returns false (and changes nothing) when a
    /// header was already applied.
    pub fn begin(&mut self, codec: ImageCodec, total_size: u32, packet_count: u16, chunk: &[u8]) -> bool {
        if self.header_arrived {
            return false;
        }
        self.codec = codec;
        self.total_size = total_size;
        self.packet_count = packet_count;
        self.data = vec![0; total_size as usize];

        let copied = chunk.len().min(total_size as usize);
        self.data[..copied].copy_from_slice(&chunk[..copied]);
        self.initial_chunk_size = copied as u32;
        self.transferred += copied as u32;
        self.header_arrived = true;
        true
    }

    /// Place body packet `index` (1-based; 0 is the header).
    pub fn place_body(&mut self, index: u16, bytes: &[u8]) -> PlaceOutcome {
        if !self.header_arrived || index == 0 || index >= self.packet_count.max(1) {
            return PlaceOutcome::Rejected;
        }
        if self.packets_seen.contains(&index) {
            return PlaceOutcome::Duplicate;
        }
        let offset = self.initial_chunk_size as usize
            + BODY_PACKET_SIZE as usize * (usize::from(index) - 1);
        if offset >= self.total_size as usize {
            return PlaceOutcome::Rejected;
        }

        let copied = bytes.len().min(self.total_size as usize - offset);
        self.data[offset..offset + copied].copy_from_slice(&bytes[..copied]);
        self.transferred += copied as u32;
        self.packets_seen.insert(index);
        PlaceOutcome::Placed { complete: self.is_complete() }
    }

    /// True once every byte has been placed.
    pub fn is_complete(&self) -> bool {
        self.header_arrived && self.transferred >= self.total_size
    }

    /// First body packet not yet seen; `packet_count` when none are
    /// missing, 0 before the header.
    pub fn first_missing_packet(&self) -> u16 {
        if !self.header_arrived {
            return 0;
        }
        (1..self.packet_count).find(|index| !self.packets_seen.contains(index)).unwrap_or(self.packet_count)
    }

    /// Distinct body packets seen so far.
    pub fn packets_received(&self) -> usize {
        self.packets_seen.len()
    }

    /// Assembled bytes: the full asset once complete, the partial buffer
    /// otherwise, empty before the header.
    pub fn assembled(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data)
    }
}

/// One in-flight texture download.
///
/// Shared between the scheduler, its worker, ingress handlers and the
/// refresh timer. Each mutable piece carries its own lock; the containing
/// registry never guards request internals.
pub struct TextureRequest {
    /// Asset being fetched
    pub asset_id: Uuid,
    /// Texture variant
    pub kind: ImageKind,
    /// Whether the sink wants incremental progress
    pub progressive: bool,
    /// First packet to request
    pub start_packet: u32,
    /// Reassembly state
    pub transfer: Mutex<TransferBuffer>,
    /// One-shot cancel signal; waking a worker means "re-check state"
    pub cancel: CancellationToken,

    state: Mutex<RequestState>,
    priority: Mutex<f32>,
    discard_level: AtomicI8,
    callbacks: Mutex<Vec<TextureSink>>,
    header_latch: watch::Sender<bool>,
    success: AtomicBool,
    started_at: Instant,
    last_packet_at: Mutex<Instant>,
}

impl std::fmt::Debug for TextureRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureRequest")
            .field("asset_id", &self.asset_id)
            .field("state", &self.state())
            .field("priority", &self.priority())
            .field("progressive", &self.progressive)
            .finish_non_exhaustive()
    }
}

impl TextureRequest {
    /// Create a request in [`RequestState::Pending`].
    pub fn new(asset_id: Uuid, options: TextureRequestOptions) -> Self {
        let now = Instant::now();
        Self {
            asset_id,
            kind: options.kind,
            progressive: options.progressive,
            start_packet: options.start_packet,
            transfer: Mutex::new(TransferBuffer::default()),
            cancel: CancellationToken::new(),
            state: Mutex::new(RequestState::Pending),
            priority: Mutex::new(options.priority),
            discard_level: AtomicI8::new(options.discard_level),
            callbacks: Mutex::new(Vec::new()),
            header_latch: watch::Sender::new(false),
            success: AtomicBool::new(false),
            started_at: now,
            last_packet_at: Mutex::new(now),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RequestState {
        *self.state.lock()
    }

    /// Attempt a monotonic transition. Returns false when `to` does not
    /// advance the machine (same rank, backwards, or out of a terminal).
    pub fn advance(&self, to: RequestState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() || to.rank() <= state.rank() {
            return false;
        }
        *state = to;
        true
    }

    /// Register a completion sink. Sinks fire in registration order.
    pub fn add_callback(&self, sink: TextureSink) {
        self.callbacks.lock().push(sink);
    }

    /// Take the sinks for terminal delivery, leaving the list empty so
    /// they cannot fire twice.
    pub fn take_callbacks(&self) -> Vec<TextureSink> {
        std::mem::take(&mut *self.callbacks.lock())
    }

    /// Deliver a progress event to registered sinks (progressive requests
    /// only; otherwise a no-op). Sinks are invoked outside the callback
    /// lock so they may re-enter the pipeline.
    pub fn notify_progress(&self, transferred: u32, total_size: u32) {
        if !self.progressive {
            return;
        }
        let callbacks = self.callbacks.lock().clone();
        let event = TextureEvent::Progress { transferred, total_size };
        for callback in &callbacks {
            callback(&event);
        }
    }

    /// Current priority.
    pub fn priority(&self) -> f32 {
        *self.priority.lock()
    }

    /// Replace the priority (repeat submissions).
    pub fn set_priority(&self, priority: f32) {
        *self.priority.lock() = priority;
    }

    /// Multiply the priority (stall bump). Returns the new value.
    pub fn bump_priority(&self, factor: f32) -> f32 {
        let mut priority = self.priority.lock();
        *priority *= factor;
        *priority
    }

    /// Current discard level.
    pub fn discard_level(&self) -> i8 {
        self.discard_level.load(Ordering::Relaxed)
    }

    /// Replace the discard level (repeat submissions).
    pub fn set_discard_level(&self, level: i8) {
        self.discard_level.store(level, Ordering::Relaxed);
    }

    /// Mark packet activity now.
    pub fn touch(&self) {
        *self.last_packet_at.lock() = Instant::now();
    }

    /// Time since the last packet (or since creation).
    pub fn since_last_packet(&self) -> std::time::Duration {
        self.last_packet_at.lock().elapsed()
    }

    /// When the request was created.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Latch open: the header has been applied.
    pub fn mark_header_arrived(&self) {
        self.header_latch.send_replace(true);
    }

    /// True once the header has been applied.
    pub fn header_arrived(&self) -> bool {
        *self.header_latch.borrow()
    }

    /// Wait until the header arrives. Returns immediately if it already
    /// has. Callers bound this with a timeout.
    pub async fn wait_for_header(&self) {
        let mut receiver = self.header_latch.subscribe();
        // An error means the latch sender is gone, which cannot outlive the
        // request; either way there is nothing left to wait for.
        let _ = receiver.wait_for(|arrived| *arrived).await;
    }

    /// Mark the completion path as having won the request.
    pub fn mark_success(&self) {
        self.success.store(true, Ordering::Release);
    }

    /// True when the completion path already fired.
    pub fn succeeded(&self) -> bool {
        self.success.load(Ordering::Acquire)
    }

    /// Packet to name in a (re)request: the caller's start packet until
    /// the header arrives, the first gap afterwards.
    pub fn resume_packet(&self) -> u32 {
        let transfer = self.transfer.lock();
        if transfer.header_arrived {
            u32::from(transfer.first_missing_packet())
        } else {
            self.start_packet
        }
    }

    /// Snapshot of the assembled bytes.
    pub fn assembled_bytes(&self) -> Bytes {
        self.transfer.lock().assembled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_is_monotonic() {
        let request = TextureRequest::new(Uuid::nil(), TextureRequestOptions::default());
        assert_eq!(request.state(), RequestState::Pending);

        assert!(request.advance(RequestState::Started));
        assert!(request.advance(RequestState::InProgress));
        // Backwards and same-rank transitions are rejected.
        assert!(!request.advance(RequestState::Started));
        assert!(!request.advance(RequestState::InProgress));

        assert!(request.advance(RequestState::Finished));
        // Terminal states are sinks.
        assert!(!request.advance(RequestState::Timeout));
        assert_eq!(request.state(), RequestState::Finished);
    }

    #[test]
    fn pending_can_abort_directly() {
        let request = TextureRequest::new(Uuid::nil(), TextureRequestOptions::default());
        assert!(request.advance(RequestState::Aborted));
        assert!(request.state().is_terminal());
    }

    #[test]
    fn header_allocates_and_places_initial_chunk() {
        let mut transfer = TransferBuffer::default();
        assert!(transfer.begin(ImageCodec::J2c, 1500, 2, &[0xAA; 600]));
        assert_eq!(transfer.total_size, 1500);
        assert_eq!(transfer.initial_chunk_size, 600);
        assert_eq!(transfer.transferred, 600);
        assert!(!transfer.is_complete());
        // Second header is ignored wholesale.
        assert!(!transfer.begin(ImageCodec::J2c, 9999, 9, &[0xBB; 10]));
        assert_eq!(transfer.total_size, 1500);
    }

    #[test]
    fn header_chunk_equal_to_total_completes_without_bodies() {
        let mut transfer = TransferBuffer::default();
        transfer.begin(ImageCodec::J2c, 600, 1, &[7; 600]);
        assert!(transfer.is_complete());
        assert_eq!(transfer.assembled().len(), 600);
    }

    #[test]
    fn one_byte_asset_is_valid() {
        let mut transfer = TransferBuffer::default();
        transfer.begin(ImageCodec::J2c, 1, 1, &[0x5A]);
        assert!(transfer.is_complete());
        assert_eq!(transfer.assembled(), Bytes::from_static(&[0x5A]));
    }

    #[test]
    fn body_packets_land_at_spec_offsets() {
        let mut transfer = TransferBuffer::default();
        transfer.begin(ImageCodec::J2c, 3000, 3, &[1; 1000]);
        assert_eq!(transfer.place_body(2, &[3; 1000]), PlaceOutcome::Placed { complete: false });
        assert_eq!(transfer.place_body(1, &[2; 1000]), PlaceOutcome::Placed { complete: true });

        let bytes = transfer.assembled();
        assert_eq!(&bytes[..1000], &[1; 1000][..]);
        assert_eq!(&bytes[1000..2000], &[2; 1000][..]);
        assert_eq!(&bytes[2000..], &[3; 1000][..]);
    }

    #[test]
    fn duplicate_body_leaves_buffer_bit_identical() {
        let mut transfer = TransferBuffer::default();
        transfer.begin(ImageCodec::J2c, 2000, 2, &[1; 1000]);
        transfer.place_body(1, &[2; 1000]);
        let before = transfer.assembled();
        let transferred = transfer.transferred;

        // Same index, different bytes: must be a no-op.
        assert_eq!(transfer.place_body(1, &[9; 1000]), PlaceOutcome::Duplicate);
        assert_eq!(transfer.assembled(), before);
        assert_eq!(transfer.transferred, transferred);
    }

    #[test]
    fn short_final_packet_completes() {
        let mut transfer = TransferBuffer::default();
        transfer.begin(ImageCodec::J2c, 1500, 2, &[1; 600]);
        assert_eq!(transfer.place_body(1, &[2; 900]), PlaceOutcome::Placed { complete: true });
        assert_eq!(transfer.transferred, 1500);
    }

    #[test]
    fn out_of_range_packets_are_rejected() {
        let mut transfer = TransferBuffer::default();
        // No header yet.
        assert_eq!(transfer.place_body(1, &[0; 10]), PlaceOutcome::Rejected);

        transfer.begin(ImageCodec::J2c, 1500, 2, &[1; 600]);
        // Header index as a body.
        assert_eq!(transfer.place_body(0, &[0; 10]), PlaceOutcome::Rejected);
        // Beyond the declared packet count.
        assert_eq!(transfer.place_body(5, &[0; 10]), PlaceOutcome::Rejected);
    }

    #[test]
    fn first_missing_packet_finds_gaps() {
        let mut transfer = TransferBuffer::default();
        assert_eq!(transfer.first_missing_packet(), 0);

        transfer.begin(ImageCodec::J2c, 4000, 4, &[0; 1000]);
        assert_eq!(transfer.first_missing_packet(), 1);
        transfer.place_body(1, &[0; 1000]);
        transfer.place_body(3, &[0; 1000]);
        assert_eq!(transfer.first_missing_packet(), 2);
        transfer.place_body(2, &[0; 1000]);
        assert_eq!(transfer.first_missing_packet(), 4);
    }

    #[test]
    fn take_callbacks_empties_the_list() {
        let request = TextureRequest::new(Uuid::nil(), TextureRequestOptions::default());
        request.add_callback(std::sync::Arc::new(|_| {}));
        request.add_callback(std::sync::Arc::new(|_| {}));
        assert_eq!(request.take_callbacks().len(), 2);
        assert!(request.take_callbacks().is_empty());
    }

    #[test]
    fn priority_bump_compounds() {
        let request = TextureRequest::new(
            Uuid::nil(),
            TextureRequestOptions { priority: 100.0, ..TextureRequestOptions::default() },
        );
        assert!((request.bump_priority(1.05) - 105.0).abs() < 1e-3);
        assert!((request.bump_priority(1.05) - 110.25).abs() < 1e-3);
    }

    #[tokio::test]
    async fn header_latch_releases_waiters() {
        let request =
            std::sync::Arc::new(TextureRequest::new(Uuid::nil(), TextureRequestOptions::default()));
        let waiter = {
            let request = std::sync::Arc::clone(&request);
            tokio::spawn(async move { request.wait_for_header().await })
        };
        request.mark_header_arrived();
        waiter.await.unwrap();
        assert!(request.header_arrived());
        // Late waiters return immediately.
        request.wait_for_header().await;
    }
}
