//! Error types for the client runtime.
//!
//! Most protocol adversity is not an error here: missing packets, server
//! not-found replies and deadline expiry all surface as terminal callback
//! states on the affected request. These types cover the remainder - wire
//! decode failures bubbling up from `metawire-proto` and cache writes.

use thiserror::Error;

/// Errors surfaced by the pipeline and dispatcher.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A frame failed to decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] metawire_proto::ProtocolError),

    /// The asset cache rejected a completed asset.
    ///
    /// Logged at the completion site; the request still reports `Finished`
    /// since the bytes are in memory regardless.
    #[error("cache write failed for {asset_id}: {reason}")]
    CacheWrite {
        /// Asset whose write failed
        asset_id: uuid::Uuid,
        /// Cache-reported reason
        reason: String,
    },

    /// The pipeline has been shut down.
    #[error("pipeline is shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_convert() {
        let proto = metawire_proto::ProtocolError::malformed("X", 3, "nope");
        let err: PipelineError = proto.into();
        assert!(err.to_string().contains("protocol error"));
    }

    #[test]
    fn cache_write_names_the_asset() {
        let err = PipelineError::CacheWrite {
            asset_id: uuid::Uuid::from_bytes([0xAB; 16]),
            reason: "disk full".to_owned(),
        };
        let msg = err.to_string();
        assert!(msg.contains("abababab"));
        assert!(msg.contains("disk full"));

        assert_eq!(PipelineError::ShutDown.to_string(), "pipeline is shut down");
    }
}
