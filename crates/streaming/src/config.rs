use serde::{Deserialize, Serialize};

use crate::sampler::{DEFAULT_CELL_LIMIT, DEFAULT_CELL_SIZE_PX};
use crate::tile::TILE_ZOOM;

/// What to do when a page request fails transiently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Mark the page loaded; pagination for that tile stops for the session.
    #[default]
    Never,
    /// Requeue up to `max_retries` times, waiting `backoff_ms · 2^attempt`.
    Retry { max_retries: u32, backoff_ms: u64 },
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1`, or `None` when out of retries.
    pub fn delay_ms(&self, attempt: u32) -> Option<u64> {
        match *self {
            RetryPolicy::Never => None,
            RetryPolicy::Retry {
                max_retries,
                backoff_ms,
            } => (attempt < max_retries)
                .then(|| backoff_ms.saturating_mul(1u64 << attempt.min(16))),
        }
    }
}

/// Configuration for the paginated tile loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Items per page; a page of exactly this size means more may follow.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Zoom of the catalog tiling; values above `MAX_TILE_ZOOM` are clamped.
    #[serde(default = "default_tile_zoom")]
    pub tile_zoom: u8,

    /// Upper bound on concurrently running page fetches across all tiles.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Viewport sampling cell edge, in pixels.
    #[serde(default = "default_cell_size_px")]
    pub cell_size_px: f64,

    /// Maximum images returned per sampling cell.
    #[serde(default = "default_cell_limit")]
    pub cell_limit: usize,
}

fn default_page_size() -> u32 {
    1000
}

fn default_tile_zoom() -> u8 {
    TILE_ZOOM
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_cell_size_px() -> f64 {
    DEFAULT_CELL_SIZE_PX
}

fn default_cell_limit() -> usize {
    DEFAULT_CELL_LIMIT
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            tile_zoom: default_tile_zoom(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            retry: RetryPolicy::default(),
            cell_size_px: default_cell_size_px(),
            cell_limit: default_cell_limit(),
        }
    }
}
