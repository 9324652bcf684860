//! Inbound frame dispatch.
//!
//! The transport owns reliability and framing; this module owns the seam
//! between "a frame arrived" and the subsystems that care. [`Dispatcher`]
//! decodes each frame and routes image traffic to the texture pipeline and
//! object traffic through the router to the consumer event channel.
//!
//! Body packets are handled on their own task because body ingress may
//! park up to 5 s on a header latch - one slow texture must not stall the
//! dispatch loop. A frame that fails to decode is logged and dropped; the
//! loop never crashes over a single bad datagram.

use metawire_proto::{Frame, Payload};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{event::ObjectEvent, objects::ObjectEventRouter, texture::pipeline::TexturePipeline};

/// Routes decoded frames to the pipeline and the object event channel.
pub struct Dispatcher {
    pipeline: TexturePipeline,
    router: ObjectEventRouter,
    object_events: mpsc::UnboundedSender<ObjectEvent>,
}

impl Dispatcher {
    /// Create a dispatcher delivering object events on `object_events`.
    pub fn new(
        pipeline: TexturePipeline,
        object_events: mpsc::UnboundedSender<ObjectEvent>,
    ) -> Self {
        Self { pipeline, router: ObjectEventRouter::new(), object_events }
    }

    /// Consume inbound frames until the channel closes.
    pub async fn run(self, mut inbound: mpsc::UnboundedReceiver<Frame>) {
        while let Some(frame) = inbound.recv().await {
            self.dispatch(&frame);
        }
        debug!("inbound frame channel closed; dispatcher exiting");
    }

    /// Decode and route a single frame.
    pub fn dispatch(&self, frame: &Frame) {
        let payload = match Payload::decode(frame) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(kind = ?frame.kind, %error, "dropping undecodable frame");
                return;
            },
        };

        match payload {
            Payload::ImageData(header) => self.pipeline.handle_image_data(&header),
            Payload::ImagePacket(packet) => {
                // Own task: body ingress may wait on the header latch.
                let pipeline = self.pipeline.clone();
                tokio::spawn(async move { pipeline.handle_image_packet(&packet).await });
            },
            Payload::ImageNotInDatabase(miss) => self.pipeline.handle_not_found(&miss),
            payload @ (Payload::ObjectUpdate(_)
            | Payload::ObjectUpdateCompressed(_)
            | Payload::ImprovedTerseObjectUpdate(_)
            | Payload::ObjectUpdateCached(_)
            | Payload::KillObject(_)) => {
                for event in self.router.handle(&payload) {
                    if self.object_events.send(event).is_err() {
                        debug!("object event receiver dropped; discarding events");
                        break;
                    }
                }
            },
            Payload::RequestImage(_) | Payload::RequestMultipleObjects(_) => {
                // Client-to-server payloads have no business arriving here.
                debug!(kind = ?frame.kind, "ignoring client-bound payload from transport");
            },
            Payload::Unknown { id, .. } => {
                debug!(id, "ignoring frame outside this library's scope");
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use metawire_proto::{MessageKind, payloads::object::KillObject};
    use uuid::Uuid;

    use super::*;
    use crate::{
        cache::MemoryCache,
        config::PipelineConfig,
        texture::pipeline::SessionContext,
    };

    fn pipeline() -> (TexturePipeline, mpsc::UnboundedReceiver<Frame>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let pipeline = TexturePipeline::new(
            PipelineConfig::default(),
            SessionContext { agent_id: Uuid::nil(), session_id: Uuid::nil() },
            Arc::new(MemoryCache::new()),
            outbound_tx,
        );
        (pipeline, outbound_rx)
    }

    #[tokio::test]
    async fn object_frames_reach_the_event_channel() {
        let (pipeline, _outbound) = pipeline();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(pipeline, events_tx);

        let kill = KillObject { local_ids: vec![11, 12] };
        dispatcher.dispatch(&Frame::new(MessageKind::KillObject, kill.encode()));

        match events_rx.recv().await {
            Some(ObjectEvent::Kill { local_ids }) => assert_eq!(local_ids, vec![11, 12]),
            other => panic!("expected kill event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_frames_are_dropped_quietly() {
        let (pipeline, _outbound) = pipeline();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(pipeline, events_tx);

        // A kill frame with a count byte promising more ids than present.
        dispatcher.dispatch(&Frame::new(MessageKind::KillObject, vec![9, 1, 0, 0]));
        // And an unknown kind, which routes to the ignore arm.
        dispatcher.dispatch(&Frame::new(MessageKind::Unknown(7777), Bytes::new()));

        assert!(events_rx.try_recv().is_err());
    }
}
