//! Per-face surface material block.
//!
//! A texture entry is a default face followed by, for each attribute in a
//! fixed order, zero or more `{face bitmask, value}` overrides and a `0x00`
//! terminator. The face bitmask uses a continuation-byte encoding: each
//! byte contributes seven low bits, and a set high bit means another byte
//! follows. A bitmask of zero ends the attribute's override list.
//!
//! Attribute wire order: texture id, color (stored inverted so the all-zero
//! default reads as opaque white), repeat-u, repeat-v, offset-u, offset-v,
//! rotation, material, media, glow, materials id. The materials-id section
//! is a later protocol addition; input ending before it decodes with nil
//! materials ids.
//!
//! # Invariants
//!
//! - `encode(decode(bytes)) == bytes` for canonical encodings (overrides
//!   grouped by value in first-face order, no no-op overrides, terminators
//!   present).
//! - Face indices are bounded by [`MAX_FACES`]; a bitfield wider than 32
//!   bits is malformed.

use std::f32::consts::TAU;

use uuid::Uuid;

use crate::{
    error::{ProtocolError, Result},
    object::snapshot::Rgba,
    wire::{Reader, Writer},
};

/// Highest number of faces a single entry can address.
pub const MAX_FACES: usize = 32;

/// Texture applied to faces with no explicit texture override.
pub const DEFAULT_TEXTURE: Uuid = Uuid::from_bytes([
    0x89, 0x55, 0x67, 0x47, 0x24, 0xcb, 0x43, 0xed, 0x92, 0x0b, 0x47, 0xca, 0xed, 0x15, 0x46,
    0x5f,
]);

/// Material parameters of a single face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureFace {
    /// Texture asset
    pub texture_id: Uuid,
    /// Face color
    pub color: Rgba,
    /// Horizontal repeats per face
    pub repeat_u: f32,
    /// Vertical repeats per face
    pub repeat_v: f32,
    /// Horizontal offset in `[-1, 1]`
    pub offset_u: f32,
    /// Vertical offset in `[-1, 1]`
    pub offset_v: f32,
    /// Rotation in radians
    pub rotation: f32,
    /// Shininess/bump bits
    pub material: u8,
    /// Media flags
    pub media: u8,
    /// Glow amount in `[0, 1]`
    pub glow: f32,
    /// Server-side materials entry
    pub materials_id: Uuid,
}

impl Default for TextureFace {
    fn default() -> Self {
        Self {
            texture_id: DEFAULT_TEXTURE,
            color: Rgba::WHITE,
            repeat_u: 1.0,
            repeat_v: 1.0,
            offset_u: 0.0,
            offset_v: 0.0,
            rotation: 0.0,
            material: 0,
            media: 0,
            glow: 0.0,
            materials_id: Uuid::nil(),
        }
    }
}

/// A default face plus per-face overrides.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextureEntry {
    /// Values for faces without overrides
    pub default_face: TextureFace,
    /// Overridden faces by index; `None` where the default applies
    pub faces: Vec<Option<TextureFace>>,
}

impl TextureEntry {
    /// Face values in effect for `index`.
    pub fn face(&self, index: usize) -> &TextureFace {
        self.faces.get(index).and_then(Option::as_ref).unwrap_or(&self.default_face)
    }

    /// Override a face, growing the table as needed.
    ///
    /// Indices at or beyond [`MAX_FACES`] are ignored.
    pub fn set_face(&mut self, index: usize, face: TextureFace) {
        if index >= MAX_FACES {
            return;
        }
        if self.faces.len() <= index {
            self.faces.resize(index + 1, None);
        }
        self.faces[index] = Some(face);
    }

    /// Decode from raw block bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new("TextureEntry", bytes);

        let textures = decode_section(&mut r, |r| r.uuid())?;
        let colors = decode_section(&mut r, |r| {
            let b = r.bytes(4)?;
            Ok(Rgba::from_bytes([b[0], b[1], b[2], b[3]]).inverted())
        })?;
        let repeats_u = decode_section(&mut r, |r| r.f32())?;
        let repeats_v = decode_section(&mut r, |r| r.f32())?;
        let offsets_u = decode_section(&mut r, |r| Ok(offset_to_float(r.i16()?)))?;
        let offsets_v = decode_section(&mut r, |r| Ok(offset_to_float(r.i16()?)))?;
        let rotations = decode_section(&mut r, |r| Ok(rotation_to_float(r.i16()?)))?;
        let materials = decode_section(&mut r, |r| r.u8())?;
        let media = decode_section(&mut r, |r| r.u8())?;
        let glows = decode_section(&mut r, |r| Ok(f32::from(r.u8()?) / 255.0))?;
        // Materials ids postdate the rest of the block; absence is legal.
        let materials_ids = if r.is_empty() {
            (Uuid::nil(), Vec::new())
        } else {
            decode_section(&mut r, |r| r.uuid())?
        };

        let default_face = TextureFace {
            texture_id: textures.0,
            color: colors.0,
            repeat_u: repeats_u.0,
            repeat_v: repeats_v.0,
            offset_u: offsets_u.0,
            offset_v: offsets_v.0,
            rotation: rotations.0,
            material: materials.0,
            media: media.0,
            glow: glows.0,
            materials_id: materials_ids.0,
        };

        let mut entry = Self { default_face, faces: Vec::new() };
        apply_overrides(&mut entry, &textures.1, |f, v| f.texture_id = v);
        apply_overrides(&mut entry, &colors.1, |f, v| f.color = v);
        apply_overrides(&mut entry, &repeats_u.1, |f, v| f.repeat_u = v);
        apply_overrides(&mut entry, &repeats_v.1, |f, v| f.repeat_v = v);
        apply_overrides(&mut entry, &offsets_u.1, |f, v| f.offset_u = v);
        apply_overrides(&mut entry, &offsets_v.1, |f, v| f.offset_v = v);
        apply_overrides(&mut entry, &rotations.1, |f, v| f.rotation = v);
        apply_overrides(&mut entry, &materials.1, |f, v| f.material = v);
        apply_overrides(&mut entry, &media.1, |f, v| f.media = v);
        apply_overrides(&mut entry, &glows.1, |f, v| f.glow = v);
        apply_overrides(&mut entry, &materials_ids.1, |f, v| f.materials_id = v);
        Ok(entry)
    }

    /// Encode to canonical block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(64 + self.faces.len() * 8);

        encode_section(&mut w, self, |f| f.texture_id, |w, v| w.put_uuid(v));
        encode_section(&mut w, self, |f| f.color, |w, v| w.put_bytes(&v.inverted().to_bytes()));
        encode_section(&mut w, self, |f| f.repeat_u, Writer::put_f32);
        encode_section(&mut w, self, |f| f.repeat_v, Writer::put_f32);
        encode_section(&mut w, self, |f| float_to_offset(f.offset_u), Writer::put_i16);
        encode_section(&mut w, self, |f| float_to_offset(f.offset_v), Writer::put_i16);
        encode_section(&mut w, self, |f| float_to_rotation(f.rotation), Writer::put_i16);
        encode_section(&mut w, self, |f| f.material, Writer::put_u8);
        encode_section(&mut w, self, |f| f.media, Writer::put_u8);
        encode_section(&mut w, self, |f| (f.glow * 255.0).round() as u8, Writer::put_u8);
        encode_section(&mut w, self, |f| f.materials_id, |w, v| w.put_uuid(v));

        w.into_bytes()
    }
}

fn offset_to_float(v: i16) -> f32 {
    f32::from(v) / 32_767.0
}

fn float_to_offset(v: f32) -> i16 {
    (v.clamp(-1.0, 1.0) * 32_767.0).round() as i16
}

fn rotation_to_float(v: i16) -> f32 {
    f32::from(v) / 32_768.0 * TAU
}

fn float_to_rotation(v: f32) -> i16 {
    (v / TAU * 32_768.0).round() as i16
}

/// Read one continuation-encoded face bitfield. Zero means "no more
/// overrides for this attribute".
///
/// Accumulates in a `u64` so a set bit beyond the 32-face space is caught
/// rather than wrapped; no legitimate encoder produces such padding bits.
fn read_face_bitfield(r: &mut Reader<'_>) -> Result<u32> {
    let mut bits: u64 = 0;
    loop {
        let b = r.u8()?;
        bits = (bits << 7) | u64::from(b & 0x7F);
        if bits >> 32 != 0 {
            return Err(ProtocolError::malformed(
                r.context(),
                r.pos(),
                "face bitfield overflows u32",
            ));
        }
        if b & 0x80 == 0 {
            return Ok(bits as u32);
        }
    }
}

/// Write a face bitfield in minimal continuation form.
fn write_face_bitfield(w: &mut Writer, bits: u32) {
    let mut groups = [0u8; 5];
    let mut n = 0;
    let mut rest = bits;
    loop {
        groups[n] = (rest & 0x7F) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        w.put_u8(groups[i] | continuation);
    }
}

/// Decode one attribute section: default value, then `{bitfield, value}`
/// pairs until a zero bitfield (or end of input, for the final section of
/// legacy blocks).
fn decode_section<T>(
    r: &mut Reader<'_>,
    mut read: impl FnMut(&mut Reader<'_>) -> Result<T>,
) -> Result<(T, Vec<(u32, T)>)> {
    let default = read(r)?;
    let mut overrides = Vec::new();
    while !r.is_empty() {
        let bits = read_face_bitfield(r)?;
        if bits == 0 {
            break;
        }
        overrides.push((bits, read(r)?));
    }
    Ok((default, overrides))
}

fn apply_overrides<T: Copy>(
    entry: &mut TextureEntry,
    overrides: &[(u32, T)],
    mut set: impl FnMut(&mut TextureFace, T),
) {
    for &(mask, value) in overrides {
        for index in 0..MAX_FACES {
            if mask & (1 << index) != 0 {
                let mut face = *entry.face(index);
                set(&mut face, value);
                entry.set_face(index, face);
            }
        }
    }
}

/// Encode one attribute section in canonical form: overrides grouped by
/// value in first-face order, no-op overrides dropped, zero terminator.
fn encode_section<T: PartialEq + Copy>(
    w: &mut Writer,
    entry: &TextureEntry,
    get: impl Fn(&TextureFace) -> T,
    put: impl Fn(&mut Writer, T),
) {
    put(w, get(&entry.default_face));

    let default = get(&entry.default_face);
    let mut groups: Vec<(T, u32)> = Vec::new();
    for (index, face) in entry.faces.iter().enumerate().take(MAX_FACES) {
        let Some(face) = face else { continue };
        let value = get(face);
        if value == default {
            continue;
        }
        if let Some(group) = groups.iter_mut().find(|(v, _)| *v == value) {
            group.1 |= 1 << index;
        } else {
            groups.push((value, 1 << index));
        }
    }
    for (value, mask) in groups {
        write_face_bitfield(w, mask);
        put(w, value);
    }
    w.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_only_entry_round_trips() {
        let entry = TextureEntry::default();
        let bytes = entry.encode();
        let decoded = TextureEntry::decode(&bytes).unwrap();
        assert_eq!(decoded, entry);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn single_face_override_round_trips() {
        let mut entry = TextureEntry::default();
        let mut face = entry.default_face;
        face.color = Rgba::new(255, 0, 0, 255);
        face.glow = 0.5;
        entry.set_face(2, face);

        let bytes = entry.encode();
        let decoded = TextureEntry::decode(&bytes).unwrap();
        assert_eq!(decoded.face(2).color, Rgba::new(255, 0, 0, 255));
        assert_eq!(decoded.face(0).color, Rgba::WHITE);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn multi_byte_bitfield_addresses_high_faces() {
        // Face 20 needs a three-byte continuation bitfield (1 << 20).
        let mut entry = TextureEntry::default();
        let mut face = entry.default_face;
        face.texture_id = Uuid::from_bytes([7; 16]);
        entry.set_face(20, face);

        let bytes = entry.encode();
        let decoded = TextureEntry::decode(&bytes).unwrap();
        assert_eq!(decoded.face(20).texture_id, Uuid::from_bytes([7; 16]));
        assert_eq!(decoded.face(19).texture_id, DEFAULT_TEXTURE);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn shared_value_faces_group_into_one_mask() {
        let mut entry = TextureEntry::default();
        let mut face = entry.default_face;
        face.media = 1;
        entry.set_face(0, face);
        entry.set_face(3, face);
        entry.set_face(9, face);

        let bytes = entry.encode();
        let decoded = TextureEntry::decode(&bytes).unwrap();
        for i in [0usize, 3, 9] {
            assert_eq!(decoded.face(i).media, 1);
        }
        assert_eq!(decoded.face(1).media, 0);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn bitfield_write_read_round_trip() {
        for bits in [1u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0xFFFF_FFFF] {
            let mut w = Writer::new();
            write_face_bitfield(&mut w, bits);
            let bytes = w.into_bytes();
            let got = read_face_bitfield(&mut Reader::new("test", &bytes)).unwrap();
            assert_eq!(got, bits);
        }
    }

    #[test]
    fn oversized_bitfield_is_malformed() {
        // Six continuation bytes exceed the 32-bit face space.
        let bytes = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(
            read_face_bitfield(&mut Reader::new("test", &bytes)),
            Err(ProtocolError::Malformed { .. })
        ));

        // Five bytes is a legal length, but the top padding bits of the
        // leading group must be clear; 35 raw bits with any of the high 3
        // set would otherwise wrap in the accumulator.
        let padded = [0xFF, 0xFF, 0xFF, 0xFF, 0x0F];
        assert!(matches!(
            read_face_bitfield(&mut Reader::new("test", &padded)),
            Err(ProtocolError::Malformed { .. })
        ));

        // The full 32-bit mask itself is still representable.
        let full = [0x8F, 0xFF, 0xFF, 0xFF, 0x7F];
        assert_eq!(read_face_bitfield(&mut Reader::new("test", &full)).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn legacy_block_without_materials_ids_decodes() {
        let entry = TextureEntry::default();
        let mut bytes = entry.encode();
        // Strip the trailing materials-id section (16-byte uuid + terminator).
        bytes.truncate(bytes.len() - 17);
        let decoded = TextureEntry::decode(&bytes).unwrap();
        assert_eq!(decoded.default_face.materials_id, Uuid::nil());
        assert_eq!(decoded.default_face.texture_id, entry.default_face.texture_id);
    }

    #[test]
    fn offset_and_rotation_quantizers_invert() {
        for raw in [i16::MIN + 1, -1000, 0, 1, 500, i16::MAX] {
            assert_eq!(float_to_offset(offset_to_float(raw)), raw);
            assert_eq!(float_to_rotation(rotation_to_float(raw)), raw);
        }
    }
}
