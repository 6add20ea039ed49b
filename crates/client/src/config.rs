// crates/client/src/config.rs
//! Client configuration: environment defaults, overridable by the CLI.

use std::path::PathBuf;
use std::time::Duration;

use noisescope_core::{paths, StreamOptions, DEFAULT_SEED};

/// Default worker base URL when `NOISESCOPE_WORKER_URL` is unset.
pub const DEFAULT_WORKER_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Worker base URL (http or https). The stream endpoint is derived from it.
    pub worker_url: String,
    /// Where durable timelines live. `None` keeps timelines in memory only.
    pub cache_dir: Option<PathBuf>,
    pub stream: StreamOptions,
    pub seed: u64,
    /// Bound on opening the stream. Jobs themselves are never timed out.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            worker_url: std::env::var("NOISESCOPE_WORKER_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_WORKER_URL.to_string()),
            cache_dir: std::env::var("NOISESCOPE_CACHE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .or_else(paths::timeline_dir),
            stream: StreamOptions::default(),
            seed: DEFAULT_SEED,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Config pointing at `worker_url` with in-memory timelines.
    pub fn ephemeral(worker_url: impl Into<String>) -> Self {
        Self {
            worker_url: worker_url.into(),
            cache_dir: None,
            ..Self::default()
        }
    }

    /// `ws(s)://<host>/diffuse/ws` for the configured worker.
    pub fn stream_url(&self) -> String {
        let base = self.worker_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{ws_base}/diffuse/ws")
    }

    /// `<worker>/<path>` with exactly one slash between.
    pub fn http_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.worker_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
