//! The texture pipeline: admission, scheduling, reassembly and delivery.
//!
//! # Moving parts
//!
//! - **Admission** ([`TexturePipeline::request_texture`]): cache
//!   short-circuit, coalescing of duplicate submissions, registry insert.
//! - **Scheduler**: a long-lived task that wakes on submissions and on a
//!   periodic tick, promoting `Pending` requests to `Started` while
//!   download slots (a semaphore of `max_concurrent_texture_downloads`
//!   permits) are available. It never touches the wire while holding a
//!   registry lock - it acts on a detached snapshot.
//! - **Workers**: one task per started request. A worker emits the
//!   `RequestImage` frame and then parks on the request's cancel token.
//!   Waking is a wake-reason, not a result: the worker re-reads state and
//!   only finalizes (as `Timeout`, with partial bytes) when the completion
//!   path has not already won.
//! - **Refresh timer**: every `pipeline_refresh_interval` it scans
//!   `InProgress` requests; a request stalled longer than 5 s gets a 1.05x
//!   priority bump and a re-request aimed at its first missing packet, and
//!   one stalled past `pipeline_request_timeout` gets its cancel token
//!   fired.
//! - **Ingress** (`handle_*`): header, body and not-found packets from the
//!   transport's dispatch tasks. Body packets arriving before the header
//!   wait up to 5 s on the request's header latch.
//!
//! # The completion path
//!
//! Whoever removes the request from the registry finalizes it - removal is
//! the atomic swap that decides the winner, so late duplicate packets
//! observe absence and are dropped. Finalization order: mark success,
//! best-effort cache write, terminal callbacks in registration order
//! (panics caught and logged), a final pipeline-wide progress event, and
//! the cancel token last so the worker slot is released only after the
//! request is fully settled.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use metawire_proto::{
    Frame, MessageKind,
    payloads::image::{
        DISCARD_CANCEL, ImageData, ImageNotInDatabase, ImagePacket, ImageRequestBlock,
        RequestImage,
    },
};
use tokio::{
    sync::{Notify, Semaphore, broadcast, mpsc},
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    cache::AssetCache,
    config::PipelineConfig,
    error::PipelineError,
    event::{ProgressEvent, TextureEvent, TextureSink, TextureState},
    registry::RequestRegistry,
    texture::request::{PlaceOutcome, RequestState, TextureRequest, TextureRequestOptions},
};

/// Stall threshold for the refresh pass's priority bump and re-request.
const STALL_BUMP_AFTER: Duration = Duration::from_secs(5);

/// Multiplier applied to a stalled request's priority.
const STALL_PRIORITY_FACTOR: f32 = 1.05;

/// How long a body packet waits for its header before the request is
/// treated as timed out.
const HEADER_WAIT: Duration = Duration::from_secs(5);

/// Capacity of the pipeline-wide progress broadcast.
const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// Identity carried in outbound request frames.
#[derive(Debug, Clone, Copy)]
pub struct SessionContext {
    /// Agent submitting requests
    pub agent_id: Uuid,
    /// Agent's session
    pub session_id: Uuid,
}

/// Snapshot of the pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Requests submitted through the API
    pub submitted: u64,
    /// Requests answered from the cache without touching the wire
    pub cache_hits: u64,
    /// Requests that finished with complete data
    pub completed: u64,
    /// Requests that hit the deadline
    pub timed_out: u64,
    /// Requests the server reported missing
    pub not_found: u64,
    /// Requests aborted by the caller or shutdown
    pub aborted: u64,
    /// Texture payload bytes received
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct StatCounters {
    submitted: AtomicU64,
    cache_hits: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    not_found: AtomicU64,
    aborted: AtomicU64,
    bytes_received: AtomicU64,
}

impl StatCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Handle to the texture pipeline. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct TexturePipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: PipelineConfig,
    session: SessionContext,
    registry: RequestRegistry,
    cache: Arc<dyn AssetCache>,
    outbound: mpsc::UnboundedSender<Frame>,
    slots: Arc<Semaphore>,
    submissions: Notify,
    shutdown: CancellationToken,
    progress: broadcast::Sender<ProgressEvent>,
    stats: StatCounters,
}

impl TexturePipeline {
    /// Create a pipeline and spawn its scheduler and refresh tasks.
    ///
    /// Must be called within a tokio runtime. Outbound request frames are
    /// queued on `outbound` for the transport to drain.
    pub fn new(
        config: PipelineConfig,
        session: SessionContext,
        cache: Arc<dyn AssetCache>,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        let (progress, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        let slots = Arc::new(Semaphore::new(config.max_concurrent_texture_downloads.max(1)));
        let inner = Arc::new(PipelineInner {
            config,
            session,
            registry: RequestRegistry::new(),
            cache,
            outbound,
            slots,
            submissions: Notify::new(),
            shutdown: CancellationToken::new(),
            progress,
            stats: StatCounters::default(),
        });

        if inner.config.use_texture_pipeline {
            tokio::spawn(run_scheduler(Arc::clone(&inner)));
            tokio::spawn(run_refresh(Arc::clone(&inner)));
        }

        Self { inner }
    }

    /// Submit a texture request.
    ///
    /// Cache hits finish synchronously without entering the registry. A
    /// request already in flight for the same asset coalesces: the sink is
    /// appended and the stored priority and discard level are refreshed,
    /// but no new wire request is issued until the scheduler or refresh
    /// pass acts. After [`TexturePipeline::shutdown`] every submission
    /// fires `Aborted` immediately.
    pub fn request_texture(
        &self,
        asset_id: Uuid,
        options: TextureRequestOptions,
        sink: impl Fn(&TextureEvent) + Send + Sync + 'static,
    ) {
        let inner = &self.inner;
        inner.stats.submitted.fetch_add(1, Ordering::Relaxed);
        let sink: TextureSink = Arc::new(sink);

        if !inner.config.use_texture_pipeline {
            // Cache-only mode: never touch the wire or the registry.
            match inner.cache.get(asset_id) {
                Some(data) => {
                    inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                    sink(&TextureEvent::Done { state: TextureState::Finished, data });
                },
                None => sink(&TextureEvent::Done {
                    state: TextureState::NotFound,
                    data: Bytes::new(),
                }),
            }
            return;
        }

        if inner.shutdown.is_cancelled() {
            debug!(asset = %asset_id, error = %PipelineError::ShutDown, "submission rejected");
            sink(&TextureEvent::Done { state: TextureState::Aborted, data: Bytes::new() });
            return;
        }

        if let Some(data) = inner.cache.get(asset_id) {
            inner.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            sink(&TextureEvent::Done { state: TextureState::Finished, data });
            return;
        }

        let (request, inserted) =
            inner.registry.get_or_insert(asset_id, || TextureRequest::new(asset_id, options));
        request.add_callback(sink);

        if inserted {
            inner.submissions.notify_one();
            return;
        }

        // Coalesced: refresh the stored wire parameters.
        request.set_priority(options.priority);
        request.set_discard_level(options.discard_level);

        // If finalization raced the append, deliver the terminal state to
        // whatever sinks are still queued (possibly just ours).
        let state = request.state();
        if state.is_terminal() {
            let terminal = terminal_texture_state(state);
            let data = match terminal {
                TextureState::Finished | TextureState::Timeout => request.assembled_bytes(),
                TextureState::Aborted | TextureState::NotFound => Bytes::new(),
            };
            deliver(
                &request.take_callbacks(),
                &TextureEvent::Done { state: terminal, data },
            );
        }
    }

    /// Abort an in-flight request.
    ///
    /// An `InProgress` request additionally gets the wire cancel escape
    /// (priority `0.0`, discard `-1`). Unknown ids are a no-op.
    pub fn abort_texture(&self, asset_id: Uuid) {
        let Some(request) = self.inner.registry.try_remove(asset_id) else {
            return;
        };
        if request.state() == RequestState::InProgress {
            self.inner.queue_wire_cancel(&request);
        }
        self.inner.finalize(&request, TextureState::Aborted, Bytes::new());
    }

    /// Number of requests currently in the registry.
    pub fn in_flight_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Subscribe to pipeline-wide progress events.
    pub fn progress_events(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.progress.subscribe()
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> PipelineStats {
        self.inner.stats.snapshot()
    }

    /// Cancel every outstanding request as `Aborted` and stop the
    /// background tasks. Later submissions abort immediately.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for request in self.inner.registry.drain() {
            self.inner.finalize(&request, TextureState::Aborted, Bytes::new());
        }
    }

    /// Ingress: texture header packet.
    pub fn handle_image_data(&self, header: &ImageData) {
        let inner = &self.inner;
        let Some(request) = inner.registry.get(header.id) else {
            trace!(asset = %header.id, "header for unknown request (late or duplicate)");
            return;
        };

        let (applied, complete, transferred, total_size) = {
            let mut transfer = request.transfer.lock();
            let applied =
                transfer.begin(header.codec, header.size, header.packets, &header.data);
            (applied, transfer.is_complete(), transfer.transferred, transfer.total_size)
        };
        request.mark_header_arrived();
        request.touch();

        if applied {
            inner.stats.bytes_received.fetch_add(header.data.len() as u64, Ordering::Relaxed);
        }
        if complete {
            inner.complete(&request);
        } else if applied {
            request.notify_progress(transferred, total_size);
            inner.broadcast_progress(request.asset_id, transferred, total_size);
        }
    }

    /// Ingress: texture body packet.
    ///
    /// May suspend up to 5 s waiting for the header latch; transports
    /// should call this from a per-packet task.
    pub async fn handle_image_packet(&self, packet: &ImagePacket) {
        let inner = &self.inner;
        let Some(request) = inner.registry.get(packet.id) else {
            trace!(asset = %packet.id, "body packet for unknown request (late or duplicate)");
            return;
        };

        if !request.header_arrived()
            && time::timeout(HEADER_WAIT, request.wait_for_header()).await.is_err()
        {
            warn!(asset = %packet.id, "body packet waited 5s with no header; timing out request");
            if let Some(owned) = inner.registry.try_remove(packet.id) {
                let data = owned.assembled_bytes();
                inner.finalize(&owned, TextureState::Timeout, data);
            }
            return;
        }

        let (outcome, transferred, total_size) = {
            let mut transfer = request.transfer.lock();
            let outcome = transfer.place_body(packet.packet, &packet.data);
            (outcome, transfer.transferred, transfer.total_size)
        };

        match outcome {
            PlaceOutcome::Duplicate => {
                trace!(asset = %packet.id, packet = packet.packet, "duplicate body packet");
            },
            PlaceOutcome::Rejected => {
                warn!(
                    asset = %packet.id,
                    packet = packet.packet,
                    "body packet inconsistent with header; dropped"
                );
            },
            PlaceOutcome::Placed { complete } => {
                inner.stats.bytes_received.fetch_add(packet.data.len() as u64, Ordering::Relaxed);
                request.touch();
                if complete {
                    inner.complete(&request);
                } else {
                    request.notify_progress(transferred, total_size);
                    inner.broadcast_progress(request.asset_id, transferred, total_size);
                }
            },
        }
    }

    /// Ingress: server not-found reply.
    pub fn handle_not_found(&self, miss: &ImageNotInDatabase) {
        let Some(request) = self.inner.registry.try_remove(miss.id) else {
            return;
        };
        debug!(asset = %miss.id, "server reported asset not in database");
        self.inner.finalize(&request, TextureState::NotFound, Bytes::new());
    }
}

impl PipelineInner {
    /// Completion path entry: the atomic removal decides the finalizer.
    fn complete(&self, request: &Arc<TextureRequest>) {
        let Some(owned) = self.registry.try_remove(request.asset_id) else {
            return;
        };
        let data = owned.assembled_bytes();
        self.finalize(&owned, TextureState::Finished, data);
    }

    /// Settle a request that has already been removed from the registry.
    fn finalize(&self, request: &Arc<TextureRequest>, state: TextureState, data: Bytes) {
        if state == TextureState::Finished {
            request.mark_success();
        }
        request.advance(terminal_request_state(state));

        match state {
            TextureState::Finished => {
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                if let Err(reason) = self.cache.put(request.asset_id, data.clone()) {
                    let error = PipelineError::CacheWrite { asset_id: request.asset_id, reason };
                    warn!(%error, "completed asset not persisted; request still finishes");
                }
            },
            TextureState::Timeout => {
                self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
            },
            TextureState::NotFound => {
                self.stats.not_found.fetch_add(1, Ordering::Relaxed);
            },
            TextureState::Aborted => {
                self.stats.aborted.fetch_add(1, Ordering::Relaxed);
            },
        }

        deliver(&request.take_callbacks(), &TextureEvent::Done { state, data });

        let (transferred, total_size) = {
            let transfer = request.transfer.lock();
            (transfer.transferred, transfer.total_size)
        };
        self.broadcast_progress(request.asset_id, transferred, total_size);

        // Last: release the worker only after the request is settled.
        request.cancel.cancel();
    }

    fn broadcast_progress(&self, asset_id: Uuid, transferred: u32, total_size: u32) {
        // Send errors just mean nobody is subscribed.
        let _ = self.progress.send(ProgressEvent { asset_id, transferred, total_size });
    }

    fn queue_request_image(&self, request: &TextureRequest, packet: u32) {
        self.queue_frame(RequestImage {
            agent_id: self.session.agent_id,
            session_id: self.session.session_id,
            requests: vec![ImageRequestBlock {
                image_id: request.asset_id,
                discard_level: request.discard_level(),
                download_priority: request.priority(),
                packet,
                kind: request.kind,
            }],
        });
    }

    fn queue_wire_cancel(&self, request: &TextureRequest) {
        self.queue_frame(RequestImage {
            agent_id: self.session.agent_id,
            session_id: self.session.session_id,
            requests: vec![ImageRequestBlock {
                image_id: request.asset_id,
                discard_level: DISCARD_CANCEL,
                download_priority: 0.0,
                packet: 0,
                kind: request.kind,
            }],
        });
    }

    fn queue_frame(&self, request: RequestImage) {
        let frame = Frame::new(MessageKind::RequestImage, request.encode());
        if self.outbound.send(frame).is_err() {
            debug!("transport channel closed; dropping outbound frame");
        }
    }
}

/// Promote pending requests while download slots last. Runs over a
/// detached snapshot so no registry lock is held while spawning or
/// sending.
fn promote_pending(inner: &Arc<PipelineInner>) {
    for request in inner.registry.snapshot() {
        if request.state() != RequestState::Pending {
            continue;
        }
        let Ok(permit) = Arc::clone(&inner.slots).try_acquire_owned() else {
            break;
        };
        if request.advance(RequestState::Started) {
            tokio::spawn(run_worker(Arc::clone(inner), request, permit));
        }
        // A failed transition means the request went terminal while still
        // queued; the permit drops and frees the slot.
    }
}

/// Per-request worker: emit the wire request, then park on the cancel
/// token until the request settles one way or the other.
async fn run_worker(
    inner: Arc<PipelineInner>,
    request: Arc<TextureRequest>,
    permit: tokio::sync::OwnedSemaphorePermit,
) {
    inner.queue_request_image(&request, request.resume_packet());
    request.advance(RequestState::InProgress);
    request.touch();

    request.cancel.cancelled().await;

    // Wake-up is a wake-reason, not a result. The completion path (and
    // abort, and shutdown) finalize before cancelling, so a removed
    // request means nothing is left to do here.
    if !request.succeeded() {
        if let Some(owned) = inner.registry.try_remove(request.asset_id) {
            let data = owned.assembled_bytes();
            inner.finalize(&owned, TextureState::Timeout, data);
        }
    }
    drop(permit);
}

/// Scheduler: wake on submissions and on a fallback tick, promote pending
/// requests into workers.
async fn run_scheduler(inner: Arc<PipelineInner>) {
    let mut tick = time::interval(inner.config.pipeline_refresh_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            () = inner.submissions.notified() => {},
            _ = tick.tick() => {},
        }
        promote_pending(&inner);
    }
}

/// Refresh pass: stall detection and deadline enforcement.
async fn run_refresh(inner: Arc<PipelineInner>) {
    let mut tick = time::interval(inner.config.pipeline_refresh_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = inner.shutdown.cancelled() => break,
            _ = tick.tick() => {},
        }
        for request in inner.registry.snapshot() {
            if request.state() != RequestState::InProgress {
                continue;
            }
            let stalled = request.since_last_packet();
            if stalled > inner.config.pipeline_request_timeout {
                debug!(asset = %request.asset_id, ?stalled, "request deadline expired");
                request.cancel.cancel();
            } else if stalled > STALL_BUMP_AFTER {
                let priority = request.bump_priority(STALL_PRIORITY_FACTOR);
                let resume = request.resume_packet();
                debug!(
                    asset = %request.asset_id,
                    priority,
                    resume,
                    "stalled request; bumping priority and re-requesting"
                );
                inner.queue_request_image(&request, resume);
            }
        }
    }
}

fn terminal_request_state(state: TextureState) -> RequestState {
    match state {
        TextureState::Finished => RequestState::Finished,
        TextureState::Timeout => RequestState::Timeout,
        TextureState::Aborted => RequestState::Aborted,
        TextureState::NotFound => RequestState::NotFound,
    }
}

fn terminal_texture_state(state: RequestState) -> TextureState {
    match state {
        RequestState::Finished => TextureState::Finished,
        RequestState::Timeout => TextureState::Timeout,
        RequestState::NotFound => TextureState::NotFound,
        // Callers only pass terminal states; the non-terminal arms are
        // unreachable but must map somewhere without panicking.
        RequestState::Aborted | RequestState::Pending | RequestState::Started
        | RequestState::InProgress => TextureState::Aborted,
    }
}

fn deliver(callbacks: &[TextureSink], event: &TextureEvent) {
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            warn!("texture callback panicked; continuing with remaining sinks");
        }
    }
}
