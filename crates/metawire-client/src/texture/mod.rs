//! The texture download pipeline.
//!
//! Split in two: [`request`] holds the per-request state machine and the
//! reassembly buffer (pure data, synchronous, exhaustively unit-tested);
//! [`pipeline`] holds the moving parts - admission, the scheduler, workers,
//! the refresh timer, packet ingress and the completion path.

pub mod pipeline;
pub mod request;
