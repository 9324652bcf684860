//! Wire codecs for a virtual-world protocol in the Second Life /
//! OpenSimulator family.
//!
//! This crate is the pure, sans-IO half of the client library: byte-level
//! primitives, typed payload codecs, and the object-state decoders that turn
//! the wire's densest payloads (compressed, terse, and full object updates)
//! into [`object::ObjectSnapshot`] values. No sockets, no clocks, no tasks -
//! the transport hands this crate `(kind, bytes)` frames and gets frames
//! back.
//!
//! Layering, bottom up:
//!
//! - [`wire`] - cursor-based readers/writers for the protocol's scalar
//!   encodings (little-endian integers, quantized floats, packed path
//!   parameters, null-terminated strings, big-endian fixed point)
//! - [`payloads`] - the typed message payloads in scope (image transfer and
//!   object updates)
//! - [`message`] - frame type enumeration and the top-level payload dispatch
//! - [`object`] - the flag-driven object-update grammars and their output
//!   snapshot type

pub mod error;
pub mod message;
pub mod object;
pub mod payloads;
pub mod wire;

pub use error::{ProtocolError, Result};
pub use message::{Frame, MessageKind, Payload};
