//! Typed message payloads.
//!
//! Each payload is a plain struct with a hand-written binary codec; there is
//! no reflection and no self-describing envelope. Fields follow the wire
//! order exactly, little-endian, with variable-length fields carried behind
//! `u8` or `u16` length prefixes as the schema dictates.
//!
//! # Invariants
//!
//! - Each payload maps to exactly one [`crate::MessageKind`] (enforced by
//!   the exhaustive dispatch in [`crate::message`]).
//! - A declared length never reads past the surrounding buffer; the codec
//!   fails with [`crate::ProtocolError`] instead.
//! - `decode(encode(x)) == x` for every payload.

pub mod image;
pub mod object;
