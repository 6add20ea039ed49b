// crates/worker-sim/src/state.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

/// An uploaded subject image.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub id: u64,
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Knobs that make the simulated worker misbehave on purpose.
#[derive(Debug, Clone, Default)]
pub struct SimBehavior {
    /// Pause before each step. Zero streams as fast as the socket allows.
    pub step_delay: Duration,
    /// Drop the connection without a close frame once this step is reached.
    pub drop_after: Option<u32>,
    /// Send unparseable and unrecognized messages before the first step.
    pub inject_garbage: bool,
    /// Follow every emitted frame with a metrics-only message for the same `t`.
    pub metrics_followup: bool,
    /// Fail every stream with `{"status":"error"}` after this many steps.
    pub fail_after: Option<u32>,
}

/// Shared simulator state.
#[derive(Clone, Default)]
pub struct SimState {
    /// Uploaded images, keyed by id.
    pub images: Arc<DashMap<u64, StoredImage>>,
    next_id: Arc<AtomicU64>,
    pub behavior: SimBehavior,
}

impl SimState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: SimBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn next_image_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}
