//! Client-side runtime for the Metawire protocol: the texture download
//! pipeline, the concurrent request registry, and object-update event
//! routing.
//!
//! The crate sits between two seams. Downward, a transport (external to
//! this library) delivers `(kind, bytes)` frames over a channel and drains
//! outbound frames from another; the transport owns reliability and
//! ordering concerns. Upward, consumers submit texture requests with
//! callback sinks and subscribe to decoded [`event::ObjectEvent`]s.
//!
//! The interesting machinery is the texture pipeline ([`texture`]): a
//! bounded-concurrency downloader that coalesces duplicate requests,
//! reassembles out-of-order body packets, bumps priorities on stalls,
//! re-requests from the first missing packet, enforces per-request
//! deadlines, and persists completed assets to the [`cache::AssetCache`].

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod objects;
pub mod registry;
pub mod texture;

pub use cache::{AssetCache, MemoryCache};
pub use config::PipelineConfig;
pub use dispatch::Dispatcher;
pub use error::PipelineError;
pub use event::{ObjectEvent, ProgressEvent, TextureEvent, TextureState};
pub use texture::pipeline::{SessionContext, TexturePipeline};
pub use texture::request::TextureRequestOptions;
