//! The decoded form of a single object update.
//!
//! [`ObjectSnapshot`] is a flat record: identity, pose, shape, and one
//! `Option` per flag-gated block. Which options are populated depends
//! solely on the update variant and its flags word; consumers merge
//! snapshots into whatever object store they keep.

use bytes::Bytes;
use glam::{Quat, Vec3, Vec4};
use uuid::Uuid;

use crate::{
    error::Result,
    object::{
        extra_params::ExtraParams, name_values::NameValue, particles::ParticleSystem,
        texture_entry::TextureEntry,
    },
    wire::{self, Reader, Writer},
};

/// Bitmask selecting the optional blocks present in a compressed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedFlags(u32);

impl CompressedFlags {
    /// Scratchpad bytes follow (mutually exclusive with [`Self::TREE`])
    pub const SCRATCHPAD: Self = Self(0x01);
    /// Tree species byte follows
    pub const TREE: Self = Self(0x02);
    /// Floating text and its color follow
    pub const HAS_TEXT: Self = Self(0x04);
    /// Legacy 86-byte particle block follows
    pub const HAS_PARTICLES: Self = Self(0x08);
    /// Attached sound follows
    pub const HAS_SOUND: Self = Self(0x10);
    /// Parent local id follows
    pub const HAS_PARENT: Self = Self(0x20);
    /// Texture animation block follows
    pub const TEXTURE_ANIMATION: Self = Self(0x40);
    /// Angular velocity follows
    pub const HAS_ANGULAR_VELOCITY: Self = Self(0x80);
    /// Name-value records follow
    pub const HAS_NAME_VALUES: Self = Self(0x100);
    /// Media URL follows
    pub const MEDIA_URL: Self = Self(0x200);
    /// Sized particle block follows (supersedes [`Self::HAS_PARTICLES`])
    pub const HAS_PARTICLES_NEW: Self = Self(0x400);

    /// Flags from a raw wire word; unknown bits are kept.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw wire word.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set every bit of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

/// Primitive codes, raw value preserved for unknown discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pcode {
    /// Ordinary primitive
    Prim,
    /// Avatar
    Avatar,
    /// Grass patch
    Grass,
    /// Tree (newer encoding)
    NewTree,
    /// Standalone particle system
    ParticleSystem,
    /// Tree (legacy encoding)
    Tree,
    /// Unrecognized code, kept as-is
    Other(u8),
}

impl Pcode {
    /// Map a wire discriminant.
    pub fn from_wire(v: u8) -> Self {
        match v {
            9 => Self::Prim,
            47 => Self::Avatar,
            95 => Self::Grass,
            111 => Self::NewTree,
            143 => Self::ParticleSystem,
            255 => Self::Tree,
            other => Self::Other(other),
        }
    }

    /// Wire discriminant for this code.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Prim => 9,
            Self::Avatar => 47,
            Self::Grass => 95,
            Self::NewTree => 111,
            Self::ParticleSystem => 143,
            Self::Tree => 255,
            Self::Other(v) => v,
        }
    }

    /// True for either tree encoding.
    pub fn is_tree(self) -> bool {
        matches!(self, Self::Tree | Self::NewTree)
    }
}

/// Surface material, raw value preserved for unknown discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Material {
    /// Stone
    Stone,
    /// Metal
    Metal,
    /// Glass
    Glass,
    /// Wood
    Wood,
    /// Flesh
    Flesh,
    /// Plastic
    Plastic,
    /// Rubber
    Rubber,
    /// Light-emitting
    Light,
    /// Unrecognized material, kept as-is
    Other(u8),
}

impl Material {
    /// Map a wire discriminant.
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Self::Stone,
            1 => Self::Metal,
            2 => Self::Glass,
            3 => Self::Wood,
            4 => Self::Flesh,
            5 => Self::Plastic,
            6 => Self::Rubber,
            7 => Self::Light,
            other => Self::Other(other),
        }
    }

    /// Wire discriminant for this material.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Stone => 0,
            Self::Metal => 1,
            Self::Glass => 2,
            Self::Wood => 3,
            Self::Flesh => 4,
            Self::Plastic => 5,
            Self::Rubber => 6,
            Self::Light => 7,
            Self::Other(v) => v,
        }
    }
}

/// Default touch behavior, raw value preserved for unknown discriminants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickAction {
    /// Touch (default)
    Touch,
    /// Sit on the object
    Sit,
    /// Buy the object
    Buy,
    /// Pay the object
    Pay,
    /// Open its inventory
    OpenTask,
    /// Play parcel media
    Play,
    /// Open parcel media
    OpenMedia,
    /// Zoom the camera
    Zoom,
    /// Unrecognized action, kept as-is
    Other(u8),
}

impl ClickAction {
    /// Map a wire discriminant.
    pub fn from_wire(v: u8) -> Self {
        match v {
            0 => Self::Touch,
            1 => Self::Sit,
            2 => Self::Buy,
            3 => Self::Pay,
            4 => Self::OpenTask,
            5 => Self::Play,
            6 => Self::OpenMedia,
            7 => Self::Zoom,
            other => Self::Other(other),
        }
    }

    /// Wire discriminant for this action.
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Touch => 0,
            Self::Sit => 1,
            Self::Buy => 2,
            Self::Pay => 3,
            Self::OpenTask => 4,
            Self::Play => 5,
            Self::OpenMedia => 6,
            Self::Zoom => 7,
            Self::Other(v) => v,
        }
    }
}

/// Raw RGBA color as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgba {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

impl Rgba {
    /// Opaque white, the protocol's default face color.
    pub const WHITE: Self = Self { r: 255, g: 255, b: 255, a: 255 };

    /// Construct from components.
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Construct from a 4-byte wire slice.
    pub fn from_bytes(b: [u8; 4]) -> Self {
        Self { r: b[0], g: b[1], b: b[2], a: b[3] }
    }

    /// Wire byte form.
    pub fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Component-wise inversion; some blocks store colors inverted so the
    /// all-zero default means opaque white.
    pub fn inverted(self) -> Self {
        Self { r: 255 - self.r, g: 255 - self.g, b: 255 - self.b, a: 255 - self.a }
    }
}

/// Path parameters unpacked to floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathParams {
    /// Extrusion curve discriminant
    pub curve: u8,
    /// Cut start in `[0, 1]`
    pub begin: f32,
    /// Cut end in `[0, 1]`
    pub end: f32,
    /// Scale X in `[-0.55, 2]`
    pub scale_x: f32,
    /// Scale Y
    pub scale_y: f32,
    /// Shear X
    pub shear_x: f32,
    /// Shear Y
    pub shear_y: f32,
    /// Twist at the far end
    pub twist: f32,
    /// Twist at the near end
    pub twist_begin: f32,
    /// Radius offset
    pub radius_offset: f32,
    /// Taper X
    pub taper_x: f32,
    /// Taper Y
    pub taper_y: f32,
    /// Revolutions along the path
    pub revolutions: f32,
    /// Skew
    pub skew: f32,
}

impl PathParams {
    /// Unpack from the wire's quantized bytes.
    pub fn unpack(p: &crate::payloads::object::PackedPath) -> Self {
        Self {
            curve: p.curve,
            begin: wire::unpack_begin_cut(p.begin),
            end: wire::unpack_end_cut(p.end),
            scale_x: wire::unpack_path_scale(p.scale_x),
            scale_y: wire::unpack_path_scale(p.scale_y),
            shear_x: wire::unpack_path_shear(p.shear_x as i8),
            shear_y: wire::unpack_path_shear(p.shear_y as i8),
            twist: wire::unpack_path_twist(p.twist),
            twist_begin: wire::unpack_path_twist(p.twist_begin),
            radius_offset: wire::unpack_path_taper(p.radius_offset),
            taper_x: wire::unpack_path_taper(p.taper_x),
            taper_y: wire::unpack_path_taper(p.taper_y),
            revolutions: wire::unpack_path_revolutions(p.revolutions),
            skew: wire::unpack_path_taper(p.skew),
        }
    }

    /// Repack into wire bytes.
    pub fn pack(&self) -> crate::payloads::object::PackedPath {
        crate::payloads::object::PackedPath {
            curve: self.curve,
            begin: wire::pack_begin_cut(self.begin),
            end: wire::pack_end_cut(self.end),
            scale_x: wire::pack_path_scale(self.scale_x),
            scale_y: wire::pack_path_scale(self.scale_y),
            shear_x: wire::pack_path_shear(self.shear_x) as u8,
            shear_y: wire::pack_path_shear(self.shear_y) as u8,
            twist: wire::pack_path_twist(self.twist),
            twist_begin: wire::pack_path_twist(self.twist_begin),
            radius_offset: wire::pack_path_taper(self.radius_offset),
            taper_x: wire::pack_path_taper(self.taper_x),
            taper_y: wire::pack_path_taper(self.taper_y),
            revolutions: wire::pack_path_revolutions(self.revolutions),
            skew: wire::pack_path_taper(self.skew),
        }
    }
}

/// Profile parameters unpacked to floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileParams {
    /// Cross-section curve discriminant
    pub curve: u8,
    /// Cut start in `[0, 1]`
    pub begin: f32,
    /// Cut end in `[0, 1]`
    pub end: f32,
    /// Hollow fraction in `[0, 1]`
    pub hollow: f32,
}

impl ProfileParams {
    /// Unpack from the wire's quantized shorts.
    pub fn unpack(p: &crate::payloads::object::PackedProfile) -> Self {
        Self {
            curve: p.curve,
            begin: wire::unpack_begin_cut(p.begin),
            end: wire::unpack_end_cut(p.end),
            hollow: wire::unpack_profile_hollow(p.hollow),
        }
    }

    /// Repack into wire shorts.
    pub fn pack(&self) -> crate::payloads::object::PackedProfile {
        crate::payloads::object::PackedProfile {
            curve: self.curve,
            begin: wire::pack_begin_cut(self.begin),
            end: wire::pack_end_cut(self.end),
            hollow: wire::pack_profile_hollow(self.hollow),
        }
    }
}

/// Floating text hovering over an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingText {
    /// Text content
    pub text: String,
    /// Text color
    pub color: Rgba,
}

/// Sound attached to an object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachedSound {
    /// Sound asset
    pub id: Uuid,
    /// Gain in `[0, 1]`
    pub gain: f32,
    /// Playback flags
    pub flags: u8,
    /// Audible radius in meters
    pub radius: f32,
}

/// Texture animation settings, a fixed 16-byte block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureAnimation {
    /// Animation mode bits
    pub mode: u8,
    /// Animated face, `-1` for all
    pub face: i8,
    /// Frame grid width
    pub size_x: u8,
    /// Frame grid height
    pub size_y: u8,
    /// Start offset in seconds
    pub start: f32,
    /// Animation length in seconds
    pub length: f32,
    /// Playback rate in frames per second
    pub rate: f32,
}

impl TextureAnimation {
    /// Serialized size in bytes.
    pub const SIZE: usize = 16;

    /// Decode from a reader positioned at the block.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(Self {
            mode: r.u8()?,
            face: r.i8()?,
            size_x: r.u8()?,
            size_y: r.u8()?,
            start: r.f32()?,
            length: r.f32()?,
            rate: r.f32()?,
        })
    }

    /// Encode into a writer.
    pub fn encode(&self, w: &mut Writer) {
        w.put_u8(self.mode);
        w.put_i8(self.face);
        w.put_u8(self.size_x);
        w.put_u8(self.size_y);
        w.put_f32(self.start);
        w.put_f32(self.length);
        w.put_f32(self.rate);
    }
}

/// Which update variant produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Full `ObjectUpdate` block
    Full,
    /// Delta-compressed block
    Compressed,
    /// Terse movement block
    Terse,
}

/// Decoded attributes of a single object for a single update.
///
/// Optional fields are `None` unless the update's flags carried the block;
/// a terse update additionally leaves all identity fields except
/// `local_id` at their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSnapshot {
    /// Region-local object id
    pub local_id: u32,
    /// Grid-stable object id
    pub full_id: Uuid,
    /// Object state byte (attachment point for attachments)
    pub state: u8,
    /// Update checksum
    pub crc: u32,
    /// Primitive code
    pub pcode: Pcode,
    /// Surface material
    pub material: Material,
    /// Default touch behavior
    pub click_action: ClickAction,
    /// Object flags word from the containing message
    pub update_flags: u32,

    /// Object dimensions in meters
    pub scale: Vec3,
    /// Region-relative position
    pub position: Vec3,
    /// Orientation
    pub rotation: Quat,
    /// Linear velocity
    pub velocity: Vec3,
    /// Linear acceleration
    pub acceleration: Vec3,
    /// Angular velocity, present when the update carried it
    pub angular_velocity: Option<Vec3>,
    /// Avatar ground plane, terse avatar updates only
    pub collision_plane: Option<Vec4>,

    /// Path parameters unpacked to floats
    pub path: PathParams,
    /// Profile parameters unpacked to floats
    pub profile: ProfileParams,

    /// Object owner, compressed updates only
    pub owner_id: Option<Uuid>,
    /// Parent object local id
    pub parent_id: Option<u32>,
    /// Tree species for tree pcodes
    pub tree_species: Option<u8>,
    /// Opaque scratchpad bytes
    pub scratch_pad: Option<Bytes>,
    /// Floating text and color
    pub floating_text: Option<FloatingText>,
    /// Media URL
    pub media_url: Option<String>,
    /// Particle system
    pub particle_system: Option<ParticleSystem>,
    /// Extra parameters (flexible/light/sculpt/mesh)
    pub extra_params: Option<ExtraParams>,
    /// Attached sound
    pub sound: Option<AttachedSound>,
    /// Name-value records
    pub name_values: Option<Vec<NameValue>>,
    /// Per-face surface materials
    pub texture_entry: Option<TextureEntry>,
    /// Texture animation
    pub texture_anim: Option<TextureAnimation>,
}

impl Default for ObjectSnapshot {
    fn default() -> Self {
        Self {
            local_id: 0,
            full_id: Uuid::nil(),
            state: 0,
            crc: 0,
            pcode: Pcode::Prim,
            material: Material::Wood,
            click_action: ClickAction::Touch,
            update_flags: 0,
            scale: Vec3::ONE,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            angular_velocity: None,
            collision_plane: None,
            path: PathParams {
                curve: 0,
                begin: 0.0,
                end: 1.0,
                scale_x: 1.0,
                scale_y: 1.0,
                shear_x: 0.0,
                shear_y: 0.0,
                twist: 0.0,
                twist_begin: 0.0,
                radius_offset: 0.0,
                taper_x: 0.0,
                taper_y: 0.0,
                revolutions: 1.0,
                skew: 0.0,
            },
            profile: ProfileParams { curve: 0, begin: 0.0, end: 1.0, hollow: 0.0 },
            owner_id: None,
            parent_id: None,
            tree_species: None,
            scratch_pad: None,
            floating_text: None,
            media_url: None,
            particle_system: None,
            extra_params: None,
            sound: None,
            name_values: None,
            texture_entry: None,
            texture_anim: None,
        }
    }
}

impl ObjectSnapshot {
    /// Attachment point encoded in the state byte, 0 when unattached.
    pub fn attachment_point(&self) -> u8 {
        (self.state & 0xF0) >> 4 | (self.state & 0x0F) << 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::object::{PackedPath, PackedProfile};

    #[test]
    fn compressed_flags_contains() {
        let mut flags = CompressedFlags::from_bits(0);
        flags.insert(CompressedFlags::HAS_TEXT);
        flags.insert(CompressedFlags::HAS_PARENT);
        assert!(flags.contains(CompressedFlags::HAS_TEXT));
        assert!(!flags.contains(CompressedFlags::TREE));
        assert_eq!(flags.bits(), 0x24);
    }

    #[test]
    fn unknown_discriminants_survive() {
        assert_eq!(Pcode::from_wire(200).to_wire(), 200);
        assert_eq!(Material::from_wire(42).to_wire(), 42);
        assert_eq!(ClickAction::from_wire(99).to_wire(), 99);
    }

    #[test]
    fn path_params_round_trip() {
        let packed = PackedPath {
            curve: 32,
            begin: 100,
            end: 49_000,
            scale_x: 150,
            scale_y: 90,
            shear_x: 12,
            shear_y: 0,
            twist: -50,
            twist_begin: 10,
            radius_offset: -3,
            taper_x: 25,
            taper_y: -25,
            revolutions: 66,
            skew: 8,
        };
        assert_eq!(PathParams::unpack(&packed).pack(), packed);

        let profile = PackedProfile { curve: 5, begin: 200, end: 48_000, hollow: 42_500 };
        assert_eq!(ProfileParams::unpack(&profile).pack(), profile);
    }

    #[test]
    fn texture_animation_round_trip() {
        let anim = TextureAnimation {
            mode: 0x01,
            face: -1,
            size_x: 4,
            size_y: 4,
            start: 0.0,
            length: 0.0,
            rate: 10.0,
        };
        let mut w = Writer::new();
        anim.encode(&mut w);
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), TextureAnimation::SIZE);
        assert_eq!(
            TextureAnimation::decode(&mut Reader::new("test", &bytes)).unwrap(),
            anim
        );
    }

    #[test]
    fn attachment_point_swaps_nibbles() {
        let snap = ObjectSnapshot { state: 0x90, ..ObjectSnapshot::default() };
        assert_eq!(snap.attachment_point(), 0x09);
    }
}
