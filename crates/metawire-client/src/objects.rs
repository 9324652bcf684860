//! Object-update event routing.
//!
//! [`ObjectEventRouter`] is sans-IO in the action style: it takes a decoded
//! payload and returns the events it implies, leaving delivery to the
//! dispatcher. A malformed block is logged and skipped without dropping its
//! siblings from the same datagram - one broken object must not blind the
//! consumer to the rest of the region.

use metawire_proto::{
    Payload,
    object::{TerseUpdate, UpdateKind, compressed, full, object_data::ObjectDataVariant},
};
use tracing::warn;

use crate::event::ObjectEvent;

/// Stateless decoder from update payloads to consumer events.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectEventRouter;

impl ObjectEventRouter {
    /// Create a router.
    pub fn new() -> Self {
        Self
    }

    /// Decode a payload into zero or more object events.
    ///
    /// Non-object payloads produce nothing. Per-block decode failures are
    /// logged and skipped; the remaining blocks still produce events.
    pub fn handle(&self, payload: &Payload) -> Vec<ObjectEvent> {
        match payload {
            Payload::ObjectUpdate(update) => {
                let mut events = Vec::with_capacity(update.blocks.len());
                for block in &update.blocks {
                    match full::decode_full(block) {
                        Ok((snapshot, motion)) => {
                            if let ObjectDataVariant::Unknown(bytes) = &motion {
                                warn!(
                                    local_id = block.local_id,
                                    len = bytes.len(),
                                    "unknown motion-data length; pose left at defaults"
                                );
                            }
                            events.push(ObjectEvent::Update {
                                snapshot: Box::new(snapshot),
                                kind: UpdateKind::Full,
                                region_handle: update.region_handle,
                                time_dilation: update.time_dilation,
                            });
                        },
                        Err(error) => {
                            warn!(local_id = block.local_id, %error, "dropping malformed object update block");
                        },
                    }
                }
                events
            },
            Payload::ObjectUpdateCompressed(update) => {
                let mut events = Vec::with_capacity(update.blocks.len());
                for block in &update.blocks {
                    match compressed::decode_compressed(&block.data, block.update_flags) {
                        Ok(snapshot) => events.push(ObjectEvent::Update {
                            snapshot: Box::new(snapshot),
                            kind: UpdateKind::Compressed,
                            region_handle: update.region_handle,
                            time_dilation: update.time_dilation,
                        }),
                        Err(error) => {
                            warn!(%error, "dropping malformed compressed update block");
                        },
                    }
                }
                events
            },
            Payload::ImprovedTerseObjectUpdate(update) => {
                let mut events = Vec::with_capacity(update.blocks.len());
                for block in &update.blocks {
                    match TerseUpdate::decode(&block.data, &block.texture_entry) {
                        Ok(terse) => events.push(ObjectEvent::Update {
                            snapshot: Box::new(terse.into_snapshot()),
                            kind: UpdateKind::Terse,
                            region_handle: update.region_handle,
                            time_dilation: update.time_dilation,
                        }),
                        Err(error) => {
                            warn!(%error, "dropping malformed terse update block");
                        },
                    }
                }
                events
            },
            Payload::ObjectUpdateCached(update) => vec![ObjectEvent::CacheProbe {
                region_handle: update.region_handle,
                blocks: update.blocks.clone(),
            }],
            Payload::KillObject(kill) => {
                vec![ObjectEvent::Kill { local_ids: kill.local_ids.clone() }]
            },
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use glam::{Quat, Vec3};
    use metawire_proto::{
        object::{
            compressed::encode_compressed,
            snapshot::{ObjectSnapshot, Pcode},
        },
        payloads::object::{
            CachedBlock, CompressedBlock, KillObject, ObjectUpdateCached, ObjectUpdateCompressed,
        },
    };
    use uuid::Uuid;

    use super::*;

    fn compressed_payload(blocks: Vec<CompressedBlock>) -> Payload {
        Payload::ObjectUpdateCompressed(ObjectUpdateCompressed {
            region_handle: 42,
            time_dilation: 65_000,
            blocks,
        })
    }

    fn good_block(local_id: u32) -> CompressedBlock {
        let snapshot = ObjectSnapshot {
            local_id,
            full_id: Uuid::from_bytes([1; 16]),
            pcode: Pcode::Prim,
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::IDENTITY,
            owner_id: Some(Uuid::nil()),
            ..ObjectSnapshot::default()
        };
        CompressedBlock { update_flags: 0, data: Bytes::from(encode_compressed(&snapshot)) }
    }

    #[test]
    fn compressed_blocks_become_update_events() {
        let router = ObjectEventRouter::new();
        let events = router.handle(&compressed_payload(vec![good_block(1), good_block(2)]));
        assert_eq!(events.len(), 2);
        match &events[0] {
            ObjectEvent::Update { snapshot, kind, region_handle, time_dilation } => {
                assert_eq!(snapshot.local_id, 1);
                assert_eq!(*kind, UpdateKind::Compressed);
                assert_eq!(*region_handle, 42);
                assert_eq!(*time_dilation, 65_000);
            },
            other => panic!("expected update event, got {other:?}"),
        }
    }

    #[test]
    fn malformed_block_does_not_drop_siblings() {
        let router = ObjectEventRouter::new();
        let bad = CompressedBlock { update_flags: 0, data: Bytes::from(vec![1, 2, 3]) };
        let events = router.handle(&compressed_payload(vec![bad, good_block(7)]));
        assert_eq!(events.len(), 1);
        match &events[0] {
            ObjectEvent::Update { snapshot, .. } => assert_eq!(snapshot.local_id, 7),
            other => panic!("expected update event, got {other:?}"),
        }
    }

    #[test]
    fn kill_and_cache_probe_pass_through() {
        let router = ObjectEventRouter::new();

        let events = router.handle(&Payload::KillObject(KillObject { local_ids: vec![3, 4] }));
        assert!(matches!(&events[..], [ObjectEvent::Kill { local_ids }] if local_ids == &[3, 4]));

        let events = router.handle(&Payload::ObjectUpdateCached(ObjectUpdateCached {
            region_handle: 9,
            time_dilation: 0,
            blocks: vec![CachedBlock { local_id: 5, crc: 6, update_flags: 7 }],
        }));
        assert!(
            matches!(&events[..], [ObjectEvent::CacheProbe { region_handle: 9, blocks }] if blocks.len() == 1)
        );
    }

    #[test]
    fn image_payloads_produce_no_object_events() {
        let router = ObjectEventRouter::new();
        let payload = Payload::ImageNotInDatabase(
            metawire_proto::payloads::image::ImageNotInDatabase { id: Uuid::nil() },
        );
        assert!(router.handle(&payload).is_empty());
    }
}
