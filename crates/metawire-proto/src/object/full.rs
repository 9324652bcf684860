//! Snapshot assembly for full object updates.
//!
//! A full [`ObjectUpdateBlock`](crate::payloads::object::ObjectUpdateBlock)
//! arrives mostly decoded - the codec already split its fields - but the
//! embedded byte fields still need their sub-grammars run: the motion
//! field, texture entry, extra parameters, particle block, texture
//! animation and name values. This module runs them and flattens the result
//! into the shared [`ObjectSnapshot`] shape.

use uuid::Uuid;

use crate::{
    error::Result,
    object::{
        extra_params::ExtraParams,
        name_values,
        object_data::ObjectDataVariant,
        particles::{self, ParticleSystem},
        snapshot::{
            AttachedSound, ClickAction, FloatingText, Material, ObjectSnapshot, PathParams, Pcode,
            ProfileParams, Rgba, TextureAnimation,
        },
        texture_entry::TextureEntry,
    },
    payloads::object::ObjectUpdateBlock,
    wire::Reader,
};

/// Decode a full update block into a snapshot.
///
/// The motion field is returned alongside so the caller can log unknown
/// lengths; everything recognized lands in the snapshot.
pub fn decode_full(block: &ObjectUpdateBlock) -> Result<(ObjectSnapshot, ObjectDataVariant)> {
    let motion = ObjectDataVariant::decode(&block.object_data)?;

    let mut snapshot = ObjectSnapshot {
        local_id: block.local_id,
        full_id: block.full_id,
        state: block.state,
        crc: block.crc,
        pcode: Pcode::from_wire(block.pcode),
        material: Material::from_wire(block.material),
        click_action: ClickAction::from_wire(block.click_action),
        update_flags: block.update_flags,
        scale: block.scale,
        parent_id: if block.parent_id == 0 { None } else { Some(block.parent_id) },
        path: PathParams::unpack(&block.path),
        profile: ProfileParams::unpack(&block.profile),
        ..ObjectSnapshot::default()
    };

    match &motion {
        ObjectDataVariant::TreeSpecies(species) => snapshot.tree_species = Some(*species),
        ObjectDataVariant::Motion(m) => {
            snapshot.position = m.position;
            snapshot.velocity = m.velocity;
            snapshot.acceleration = m.acceleration;
            snapshot.rotation = m.rotation;
            snapshot.angular_velocity = Some(m.angular_velocity);
        },
        ObjectDataVariant::MotionWithCollision { collision_plane, motion: m } => {
            snapshot.collision_plane = Some(*collision_plane);
            snapshot.position = m.position;
            snapshot.velocity = m.velocity;
            snapshot.acceleration = m.acceleration;
            snapshot.rotation = m.rotation;
            snapshot.angular_velocity = Some(m.angular_velocity);
        },
        ObjectDataVariant::Unknown(_) => {},
    }

    if !block.texture_entry.is_empty() {
        snapshot.texture_entry = Some(TextureEntry::decode(&block.texture_entry)?);
    }
    if !block.texture_anim.is_empty() {
        let mut r = Reader::new("ObjectUpdate.TextureAnim", &block.texture_anim);
        snapshot.texture_anim = Some(TextureAnimation::decode(&mut r)?);
    }
    if !block.name_values.is_empty() {
        let end = block.name_values.iter().position(|&b| b == 0).unwrap_or(block.name_values.len());
        let text = String::from_utf8_lossy(&block.name_values[..end]);
        snapshot.name_values = Some(name_values::parse(&text)?);
    }
    if !block.extra_params.is_empty() {
        let params = ExtraParams::decode_bytes(&block.extra_params)?;
        if !params.is_empty() {
            snapshot.extra_params = Some(params);
        }
    }
    if !block.ps_block.is_empty() {
        snapshot.particle_system = Some(if block.ps_block.len() == particles::LEGACY_SIZE {
            ParticleSystem::decode_legacy(&block.ps_block)?
        } else {
            ParticleSystem::decode_sized(&block.ps_block)?.0
        });
    }
    if !block.text.is_empty() {
        snapshot.floating_text = Some(FloatingText {
            text: block.text.clone(),
            color: Rgba::from_bytes(block.text_color),
        });
    }
    if !block.media_url.is_empty() {
        snapshot.media_url = Some(block.media_url.clone());
    }
    if block.owner_id != Uuid::nil() {
        snapshot.owner_id = Some(block.owner_id);
    }
    if block.sound_id != Uuid::nil() {
        snapshot.sound = Some(AttachedSound {
            id: block.sound_id,
            gain: block.gain,
            flags: block.sound_flags,
            radius: block.radius,
        });
    }

    Ok((snapshot, motion))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use glam::{Quat, Vec3};

    use super::*;
    use crate::{
        object::object_data::MotionData,
        payloads::object::{PackedPath, PackedProfile},
    };

    fn block_with_motion() -> ObjectUpdateBlock {
        let motion = ObjectDataVariant::Motion(MotionData {
            position: Vec3::new(10.0, 20.0, 30.0),
            velocity: Vec3::new(0.0, 1.0, 0.0),
            acceleration: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            angular_velocity: Vec3::ZERO,
        });
        ObjectUpdateBlock {
            local_id: 99,
            state: 0,
            full_id: Uuid::from_bytes([5; 16]),
            crc: 1,
            pcode: 9,
            material: 3,
            click_action: 0,
            scale: Vec3::ONE,
            object_data: Bytes::from(motion.encode()),
            parent_id: 0,
            update_flags: 0x8000,
            path: PackedPath { curve: 16, scale_x: 100, scale_y: 100, ..PackedPath::default() },
            profile: PackedProfile::default(),
            texture_entry: Bytes::from(TextureEntry::default().encode()),
            texture_anim: Bytes::new(),
            name_values: Bytes::from(&b"Touch STRING RW SV hello\0"[..]),
            data: Bytes::new(),
            text: "look here".to_owned(),
            text_color: [0, 255, 0, 255],
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
    fn motion_and_sub_grammars_land_in_snapshot() {
        let (snapshot, motion) = decode_full(&block_with_motion()).unwrap();
        assert!(matches!(motion, ObjectDataVariant::Motion(_)));
        assert_eq!(snapshot.local_id, 99);
        assert_eq!(snapshot.position, Vec3::new(10.0, 20.0, 30.0));
        assert_eq!(snapshot.velocity, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(snapshot.update_flags, 0x8000);
        assert!(snapshot.texture_entry.is_some());
        assert_eq!(snapshot.name_values.as_ref().map(Vec::len), Some(1));
        assert_eq!(
            snapshot.floating_text.as_ref().map(|t| t.text.as_str()),
            Some("look here")
        );
        assert!(snapshot.parent_id.is_none());
        assert!(snapshot.extra_params.is_none());
        assert!(snapshot.particle_system.is_none());
    }

    #[test]
    fn tree_species_motion_field() {
        let mut block = block_with_motion();
        block.pcode = 255;
        block.object_data = Bytes::from(vec![7u8]);
        let (snapshot, motion) = decode_full(&block).unwrap();
        assert_eq!(motion, ObjectDataVariant::TreeSpecies(7));
        assert_eq!(snapshot.tree_species, Some(7));
        assert_eq!(snapshot.pcode, Pcode::Tree);
    }

    #[test]
    fn unknown_motion_length_keeps_pose_defaults() {
        let mut block = block_with_motion();
        block.object_data = Bytes::from(vec![0u8; 32]);
        let (snapshot, motion) = decode_full(&block).unwrap();
        assert!(matches!(motion, ObjectDataVariant::Unknown(_)));
        assert_eq!(snapshot.position, Vec3::ZERO);
    }
}
