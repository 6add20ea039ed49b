//! Centralized path functions for app storage locations.

use std::path::PathBuf;

/// App cache root: `~/Library/Caches/noisescope/` (macOS) or `~/.cache/noisescope/` (Linux).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("noisescope"))
}

/// Durable per-subject timelines: `<app_cache_dir>/timelines/`.
pub fn timeline_dir() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("timelines"))
}
