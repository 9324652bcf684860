//! Error types for wire decoding.
//!
//! Every decoder failure carries the grammar context it occurred in and the
//! byte offset reached, so a dropped update can be diagnosed from the log
//! line alone. Decoders never read past the end of a buffer; running out of
//! bytes is a [`ProtocolError::Truncated`], bytes that contradict the
//! grammar are [`ProtocolError::Malformed`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

/// Errors produced while decoding or encoding wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ended before the grammar did.
    #[error("{context}: truncated at offset {offset}: need {expected} more bytes, {remaining} remain")]
    Truncated {
        /// Grammar context (payload or block name)
        context: &'static str,
        /// Cursor position when the read was attempted
        offset: usize,
        /// Bytes the read required
        expected: usize,
        /// Bytes actually remaining
        remaining: usize,
    },

    /// Bytes inconsistent with the grammar.
    #[error("{context}: malformed at offset {offset}: {reason}")]
    Malformed {
        /// Grammar context (payload or block name)
        context: &'static str,
        /// Cursor position when the inconsistency was found
        offset: usize,
        /// What was wrong
        reason: String,
    },

    /// A declared block length exceeds the surrounding buffer.
    #[error("{context}: declared length {declared} exceeds {available} available bytes")]
    BlockLength {
        /// Grammar context (payload or block name)
        context: &'static str,
        /// Length the wire claimed
        declared: usize,
        /// Bytes actually available
        available: usize,
    },
}

impl ProtocolError {
    /// Shorthand for a [`ProtocolError::Malformed`] with a formatted reason.
    pub fn malformed(context: &'static str, offset: usize, reason: impl Into<String>) -> Self {
        Self::Malformed { context, offset, reason: reason.into() }
    }
}
