//! Object-state decoders.
//!
//! The wire's three update variants share one output type,
//! [`snapshot::ObjectSnapshot`], but follow very different grammars:
//!
//! - [`compressed`] - the flag-driven delta-compressed grammar, every
//!   optional block gated by a bit in [`snapshot::CompressedFlags`]
//! - [`terse`] - the fixed-layout movement block with quantized dynamics
//! - [`object_data`] - the 1/60/76-byte motion field of full updates
//!
//! plus the embedded sub-grammars they all draw on:
//!
//! - [`texture_entry`] - per-face surface materials with face-bitmask
//!   overrides
//! - [`extra_params`] - flexible/light/sculpt/mesh parameter TLVs
//! - [`particles`] - the bit-packed particle system block
//! - [`name_values`] - newline-delimited typed attribute records
//!
//! Every decoder has an encoder and round-trips canonical encodings
//! byte-exactly; the property tests in `tests/` lean on that.

pub mod compressed;
pub mod extra_params;
pub mod full;
pub mod name_values;
pub mod object_data;
pub mod particles;
pub mod snapshot;
pub mod terse;
pub mod texture_entry;

pub use compressed::{decode_compressed, encode_compressed};
pub use snapshot::{CompressedFlags, ObjectSnapshot, UpdateKind};
pub use terse::TerseUpdate;
