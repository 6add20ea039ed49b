// crates/core/src/frame.rs
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scalar diagnostics the worker attaches to a step (e.g. `Cosine`).
pub type Metrics = BTreeMap<String, f64>;

/// Metric key the worker uses for cosine similarity against the source image.
pub const COSINE_METRIC: &str = "Cosine";

/// One observation of the diffusion process at a given step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Step index as reported by the worker for the run that produced it.
    pub local_step: u32,
    /// `local_step + run_offset`; the key on the subject's timeline.
    pub global_step: u64,
    /// Encoded preview (data URL). Absent on metrics-only updates.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub metrics: Option<Metrics>,
    #[serde(default)]
    pub schedule_value: Option<f64>,
}

impl Frame {
    pub fn new(local_step: u32, offset: u64) -> Self {
        Self {
            local_step,
            global_step: u64::from(local_step) + offset,
            image: None,
            metrics: None,
            schedule_value: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value);
        self
    }

    pub fn with_schedule_value(mut self, value: f64) -> Self {
        self.schedule_value = Some(value);
        self
    }

    /// Look up a finite metric value by name.
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics
            .as_ref()
            .and_then(|m| m.get(name))
            .copied()
            .filter(|v| v.is_finite())
    }
}
