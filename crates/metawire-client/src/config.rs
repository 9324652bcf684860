//! Pipeline configuration.
//!
//! Consumers hand a [`PipelineConfig`] to the pipeline constructor; the
//! defaults match the protocol's conventional client behavior. Durations
//! deserialize from integer milliseconds so the structure drops cleanly out
//! of whatever config file format the embedding application uses.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Default bound on concurrently downloading textures.
pub const DEFAULT_MAX_CONCURRENT: usize = 8;

/// Default per-request deadline.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Default refresh/scheduler tick period.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Tunables for the texture pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum number of texture downloads in flight at once.
    pub max_concurrent_texture_downloads: usize,

    /// Deadline after which a request with no progress times out.
    #[serde(deserialize_with = "duration_ms")]
    pub pipeline_request_timeout: Duration,

    /// Period of the refresh pass (stall detection, priority bumps) and
    /// the scheduler's fallback tick.
    #[serde(deserialize_with = "duration_ms")]
    pub pipeline_refresh_interval: Duration,

    /// When false, requests short-circuit to the cache and never touch the
    /// wire: a hit finishes immediately, a miss reports not-found.
    pub use_texture_pipeline: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_texture_downloads: DEFAULT_MAX_CONCURRENT,
            pipeline_request_timeout: DEFAULT_REQUEST_TIMEOUT,
            pipeline_refresh_interval: DEFAULT_REFRESH_INTERVAL,
            use_texture_pipeline: true,
        }
    }
}

fn duration_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
}
