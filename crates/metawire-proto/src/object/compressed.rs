//! Delta-compressed object updates.
//!
//! The compressed grammar is a fixed prologue followed by optional blocks
//! gated, in wire order, by bits of the [`CompressedFlags`] word embedded in
//! the prologue. Presence is determined solely by the flags; the decoder
//! reads the bytes for each present block and only those bytes, and rejects
//! updates with trailing garbage.
//!
//! ```text
//! full_id:16  local_id:4  pcode:1  state:1  crc:4  material:1
//! click_action:1  scale:12  position:12  rotation:12  flags:4
//! owner_id:16
//! if HAS_ANGULAR_VELOCITY: angular_velocity:12
//! if HAS_PARENT:           parent_id:4
//! if TREE:                 tree_species:1
//! else if SCRATCHPAD:      len:1  bytes:len
//! if HAS_TEXT:             text:cstr  text_color:4
//! if MEDIA_URL:            media_url:cstr
//! if HAS_PARTICLES:        particle_system:86
//! extra_params:variable
//! if HAS_SOUND:            sound_id:16  gain:4  flags:1  radius:4
//! if HAS_NAME_VALUES:      name_values:cstr
//! path:14  profile:7
//! texture_entry_len:4  texture_entry:len
//! if TEXTURE_ANIMATION:    len:4  texture_animation:16
//! if HAS_PARTICLES_NEW:    particle_system:sized
//! ```
//!
//! `TREE` and `SCRATCHPAD` are mutually exclusive; the scratchpad length
//! byte is consumed before its payload.

use bytes::Bytes;

use crate::{
    error::{ProtocolError, Result},
    object::{
        extra_params::ExtraParams,
        name_values,
        particles::ParticleSystem,
        snapshot::{
            AttachedSound, ClickAction, CompressedFlags, FloatingText, Material, ObjectSnapshot,
            PathParams, Pcode, ProfileParams, Rgba, TextureAnimation,
        },
        texture_entry::TextureEntry,
    },
    payloads::object::{PackedPath, PackedProfile},
    wire::{Reader, Writer},
};

const CONTEXT: &str = "ObjectUpdateCompressed.Data";

/// Decode one compressed object block into a snapshot.
///
/// `update_flags` is the containing block's object-flags word; it is
/// carried through to the snapshot untouched.
pub fn decode_compressed(data: &[u8], update_flags: u32) -> Result<ObjectSnapshot> {
    let mut r = Reader::new(CONTEXT, data);

    let full_id = r.uuid()?;
    let local_id = r.u32()?;
    let pcode = Pcode::from_wire(r.u8()?);
    let state = r.u8()?;
    let crc = r.u32()?;
    let material = Material::from_wire(r.u8()?);
    let click_action = ClickAction::from_wire(r.u8()?);
    let scale = r.vec3()?;
    let position = r.vec3()?;
    let rotation = r.packed_quat()?;
    let flags = CompressedFlags::from_bits(r.u32()?);
    let owner_id = r.uuid()?;

    let angular_velocity =
        if flags.contains(CompressedFlags::HAS_ANGULAR_VELOCITY) { Some(r.vec3()?) } else { None };
    let parent_id = if flags.contains(CompressedFlags::HAS_PARENT) { Some(r.u32()?) } else { None };

    let mut tree_species = None;
    let mut scratch_pad = None;
    if flags.contains(CompressedFlags::TREE) {
        tree_species = Some(r.u8()?);
    } else if flags.contains(CompressedFlags::SCRATCHPAD) {
        let len = r.u8()? as usize;
        scratch_pad = Some(Bytes::copy_from_slice(r.bytes(len)?));
    }

    let floating_text = if flags.contains(CompressedFlags::HAS_TEXT) {
        let text = r.cstr()?;
        let b = r.bytes(4)?;
        Some(FloatingText { text, color: Rgba::from_bytes([b[0], b[1], b[2], b[3]]) })
    } else {
        None
    };

    let media_url = if flags.contains(CompressedFlags::MEDIA_URL) { Some(r.cstr()?) } else { None };

    let mut particle_system = if flags.contains(CompressedFlags::HAS_PARTICLES) {
        Some(ParticleSystem::decode_legacy(r.bytes(crate::object::particles::LEGACY_SIZE)?)?)
    } else {
        None
    };

    let extra_params = {
        let params = ExtraParams::decode(&mut r)?;
        if params.is_empty() { None } else { Some(params) }
    };

    let sound = if flags.contains(CompressedFlags::HAS_SOUND) {
        Some(AttachedSound { id: r.uuid()?, gain: r.f32()?, flags: r.u8()?, radius: r.f32()? })
    } else {
        None
    };

    let name_values = if flags.contains(CompressedFlags::HAS_NAME_VALUES) {
        Some(name_values::parse(&r.cstr()?)?)
    } else {
        None
    };

    let path = PathParams::unpack(&PackedPath::decode(&mut r)?);
    let profile = ProfileParams::unpack(&PackedProfile::decode(&mut r)?);

    let texture_entry = {
        let len = r.u32()? as usize;
        if len > r.remaining() {
            return Err(ProtocolError::BlockLength {
                context: CONTEXT,
                declared: len,
                available: r.remaining(),
            });
        }
        if len == 0 { None } else { Some(TextureEntry::decode(r.bytes(len)?)?) }
    };

    let texture_anim = if flags.contains(CompressedFlags::TEXTURE_ANIMATION) {
        let len = r.u32()? as usize;
        if len < TextureAnimation::SIZE || len > r.remaining() {
            return Err(ProtocolError::BlockLength {
                context: CONTEXT,
                declared: len,
                available: r.remaining(),
            });
        }
        let body = r.bytes(len)?;
        Some(TextureAnimation::decode(&mut Reader::new(CONTEXT, body))?)
    } else {
        None
    };

    if flags.contains(CompressedFlags::HAS_PARTICLES_NEW) {
        let tail_start = r.pos();
        let tail = r.bytes(r.remaining())?;
        let (system, consumed) = ParticleSystem::decode_sized(tail)?;
        particle_system = Some(system);
        if consumed < tail.len() {
            return Err(ProtocolError::malformed(
                CONTEXT,
                tail_start + consumed,
                format!("{} trailing bytes after grammar end", tail.len() - consumed),
            ));
        }
    }

    if !r.is_empty() {
        return Err(ProtocolError::malformed(
            CONTEXT,
            r.pos(),
            format!("{} trailing bytes after grammar end", r.remaining()),
        ));
    }

    Ok(ObjectSnapshot {
        local_id,
        full_id,
        state,
        crc,
        pcode,
        material,
        click_action,
        update_flags,
        scale,
        position,
        rotation,
        velocity: glam::Vec3::ZERO,
        acceleration: glam::Vec3::ZERO,
        angular_velocity,
        collision_plane: None,
        path,
        profile,
        owner_id: Some(owner_id),
        parent_id,
        tree_species,
        scratch_pad,
        floating_text,
        media_url,
        particle_system,
        extra_params,
        sound,
        name_values,
        texture_entry,
        texture_anim,
    })
}

/// Flags a snapshot's optional fields imply on the wire.
pub fn derive_flags(snapshot: &ObjectSnapshot) -> CompressedFlags {
    let mut flags = CompressedFlags::default();
    if snapshot.angular_velocity.is_some() {
        flags.insert(CompressedFlags::HAS_ANGULAR_VELOCITY);
    }
    if snapshot.parent_id.is_some() {
        flags.insert(CompressedFlags::HAS_PARENT);
    }
    if snapshot.tree_species.is_some() {
        flags.insert(CompressedFlags::TREE);
    } else if snapshot.scratch_pad.is_some() {
        flags.insert(CompressedFlags::SCRATCHPAD);
    }
    if snapshot.floating_text.is_some() {
        flags.insert(CompressedFlags::HAS_TEXT);
    }
    if snapshot.media_url.is_some() {
        flags.insert(CompressedFlags::MEDIA_URL);
    }
    match &snapshot.particle_system {
        Some(system) if system.legacy => flags.insert(CompressedFlags::HAS_PARTICLES),
        Some(_) => flags.insert(CompressedFlags::HAS_PARTICLES_NEW),
        None => {},
    }
    if snapshot.sound.is_some() {
        flags.insert(CompressedFlags::HAS_SOUND);
    }
    if snapshot.name_values.is_some() {
        flags.insert(CompressedFlags::HAS_NAME_VALUES);
    }
    if snapshot.texture_anim.is_some() {
        flags.insert(CompressedFlags::TEXTURE_ANIMATION);
    }
    flags
}

/// Encode a snapshot back into compressed-block bytes.
///
/// The flags word is derived from which optional fields are populated, so
/// `encode_compressed(decode_compressed(bytes)) == bytes` holds for
/// canonical encodings.
pub fn encode_compressed(snapshot: &ObjectSnapshot) -> Vec<u8> {
    let flags = derive_flags(snapshot);
    let mut w = Writer::with_capacity(128);

    w.put_uuid(snapshot.full_id);
    w.put_u32(snapshot.local_id);
    w.put_u8(snapshot.pcode.to_wire());
    w.put_u8(snapshot.state);
    w.put_u32(snapshot.crc);
    w.put_u8(snapshot.material.to_wire());
    w.put_u8(snapshot.click_action.to_wire());
    w.put_vec3(snapshot.scale);
    w.put_vec3(snapshot.position);
    w.put_packed_quat(snapshot.rotation);
    w.put_u32(flags.bits());
    w.put_uuid(snapshot.owner_id.unwrap_or_default());

    if let Some(av) = snapshot.angular_velocity {
        w.put_vec3(av);
    }
    if let Some(parent) = snapshot.parent_id {
        w.put_u32(parent);
    }
    if let Some(species) = snapshot.tree_species {
        w.put_u8(species);
    } else if let Some(pad) = &snapshot.scratch_pad {
        let len = pad.len().min(u8::MAX as usize);
        w.put_u8(len as u8);
        w.put_bytes(&pad[..len]);
    }
    if let Some(text) = &snapshot.floating_text {
        w.put_cstr(&text.text);
        w.put_bytes(&text.color.to_bytes());
    }
    if let Some(url) = &snapshot.media_url {
        w.put_cstr(url);
    }
    if let Some(system) = &snapshot.particle_system {
        if system.legacy {
            w.put_bytes(&system.encode());
        }
    }
    match &snapshot.extra_params {
        Some(params) => params.encode(&mut w),
        None => w.put_u8(0),
    }
    if let Some(sound) = &snapshot.sound {
        w.put_uuid(sound.id);
        w.put_f32(sound.gain);
        w.put_u8(sound.flags);
        w.put_f32(sound.radius);
    }
    if let Some(records) = &snapshot.name_values {
        w.put_cstr(&name_values::to_text(records));
    }
    snapshot.path.pack().encode(&mut w);
    snapshot.profile.pack().encode(&mut w);

    match &snapshot.texture_entry {
        None => w.put_u32(0),
        Some(entry) => {
            let body = entry.encode();
            w.put_u32(body.len() as u32);
            w.put_bytes(&body);
        },
    }
    if let Some(anim) = &snapshot.texture_anim {
        w.put_u32(TextureAnimation::SIZE as u32);
        anim.encode(&mut w);
    }
    if let Some(system) = &snapshot.particle_system {
        if !system.legacy {
            w.put_bytes(&system.encode());
        }
    }

    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};
    use uuid::Uuid;

    use super::*;
    use crate::object::name_values::{
        NameValue, NameValueClass, NameValueContent, NameValueSendTo,
    };

    fn base_snapshot() -> ObjectSnapshot {
        ObjectSnapshot {
            local_id: 424_242,
            full_id: Uuid::from_bytes([0x42; 16]),
            state: 0,
            crc: 0xCAFE_F00D,
            pcode: Pcode::Prim,
            material: Material::Wood,
            click_action: ClickAction::Touch,
            scale: Vec3::new(0.5, 0.5, 0.5),
            position: Vec3::new(128.5, 90.25, 21.0),
            rotation: Quat::from_xyzw(0.0, 0.0, 0.0, 1.0),
            owner_id: Some(Uuid::from_bytes([0x07; 16])),
            ..ObjectSnapshot::default()
        }
    }

    #[test]
    fn minimal_block_round_trips() {
        let snapshot = base_snapshot();
        let bytes = encode_compressed(&snapshot);
        let decoded = decode_compressed(&bytes, 0).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(encode_compressed(&decoded), bytes);
    }

    #[test]
    fn text_parent_and_animation_round_trip() {
        // The §8 scenario: HasText | HasParent | TextureAnimation, nothing
        // else optional.
        let snapshot = ObjectSnapshot {
            parent_id: Some(90_001),
            floating_text: Some(FloatingText {
                text: "for sale".to_owned(),
                color: Rgba::new(255, 16, 16, 255),
            }),
            texture_anim: Some(TextureAnimation {
                mode: 0x01,
                face: -1,
                size_x: 0,
                size_y: 0,
                start: 0.0,
                length: 0.0,
                rate: 4.0,
            }),
            ..base_snapshot()
        };
        let bytes = encode_compressed(&snapshot);
        let decoded = decode_compressed(&bytes, 7).unwrap();

        assert_eq!(decoded.parent_id, Some(90_001));
        assert_eq!(decoded.floating_text, snapshot.floating_text);
        assert_eq!(decoded.texture_anim, snapshot.texture_anim);
        assert_eq!(decoded.update_flags, 7);
        // Everything else optional stays off.
        assert!(decoded.media_url.is_none());
        assert!(decoded.sound.is_none());
        assert!(decoded.particle_system.is_none());
        assert!(decoded.name_values.is_none());
        assert!(decoded.tree_species.is_none());
        assert!(decoded.scratch_pad.is_none());
        assert!(decoded.angular_velocity.is_none());

        assert_eq!(encode_compressed(&decoded), bytes);
    }

    #[test]
    fn every_optional_block_round_trips() {
        let snapshot = ObjectSnapshot {
            angular_velocity: Some(Vec3::new(0.0, 0.0, 0.25)),
            parent_id: Some(11),
            scratch_pad: Some(Bytes::from(vec![1, 2, 3, 4, 5])),
            floating_text: Some(FloatingText {
                text: "hello".to_owned(),
                color: Rgba::new(1, 2, 3, 4),
            }),
            media_url: Some("http://example.invalid/stream".to_owned()),
            particle_system: Some(ParticleSystem {
                burst_part_count: 4,
                max_age: 8.0,
                ..ParticleSystem::default()
            }),
            extra_params: Some(ExtraParams {
                mesh_flags: Some(3),
                ..ExtraParams::default()
            }),
            sound: Some(AttachedSound {
                id: Uuid::from_bytes([9; 16]),
                gain: 0.5,
                flags: 1,
                radius: 20.0,
            }),
            name_values: Some(vec![NameValue {
                name: "Title".to_owned(),
                class: NameValueClass::ReadWrite,
                sendto: NameValueSendTo::SimViewer,
                value: NameValueContent::String("Greeter".to_owned()),
            }]),
            texture_entry: Some(TextureEntry::default()),
            texture_anim: Some(TextureAnimation {
                mode: 1,
                face: 0,
                size_x: 4,
                size_y: 2,
                start: 0.0,
                length: 1.0,
                rate: 10.0,
            }),
            ..base_snapshot()
        };
        let bytes = encode_compressed(&snapshot);
        let decoded = decode_compressed(&bytes, 0).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(encode_compressed(&decoded), bytes);
    }

    #[test]
    fn tree_wins_over_scratchpad() {
        let snapshot = ObjectSnapshot {
            pcode: Pcode::Tree,
            tree_species: Some(12),
            // A populated scratchpad must not be encoded alongside TREE.
            scratch_pad: Some(Bytes::from(vec![0xFF; 8])),
            ..base_snapshot()
        };
        let bytes = encode_compressed(&snapshot);
        let decoded = decode_compressed(&bytes, 0).unwrap();
        assert_eq!(decoded.tree_species, Some(12));
        assert!(decoded.scratch_pad.is_none());
    }

    #[test]
    fn sized_particle_system_rides_the_tail() {
        let snapshot = ObjectSnapshot {
            particle_system: Some(ParticleSystem {
                legacy: false,
                part_flags: ParticleSystem::DATA_GLOW,
                start_glow: Some(1.0),
                end_glow: Some(0.25),
                ..ParticleSystem::default()
            }),
            ..base_snapshot()
        };
        let bytes = encode_compressed(&snapshot);
        let decoded = decode_compressed(&bytes, 0).unwrap();
        assert_eq!(decoded.particle_system, snapshot.particle_system);
        assert_eq!(encode_compressed(&decoded), bytes);
    }

    #[test]
    fn truncated_block_is_rejected() {
        let bytes = encode_compressed(&base_snapshot());
        for cut in [10, 40, bytes.len() - 3] {
            assert!(decode_compressed(&bytes[..cut], 0).is_err(), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let mut bytes = encode_compressed(&base_snapshot());
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        assert!(matches!(
            decode_compressed(&bytes, 0),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn scratchpad_length_byte_is_consumed() {
        // Craft a block whose scratchpad is exactly [9, 9]; a decoder that
        // forgot to consume the length byte would misparse everything after.
        let snapshot = ObjectSnapshot {
            scratch_pad: Some(Bytes::from(vec![9, 9])),
            ..base_snapshot()
        };
        let bytes = encode_compressed(&snapshot);
        let decoded = decode_compressed(&bytes, 0).unwrap();
        assert_eq!(decoded.scratch_pad, Some(Bytes::from(vec![9, 9])));
        assert_eq!(decoded, snapshot);
    }
}
