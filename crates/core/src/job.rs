// crates/core/src/job.rs
//! Diffusion job specification and the preview-cadence rule.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MIN_STEPS: u32 = 1;
pub const MAX_STEPS: u32 = 1000;
pub const DEFAULT_SEED: u64 = 42;
/// Schedule bounds used by streamed runs when the user leaves them blank.
pub const DEFAULT_SCHEDULE_START: f64 = 1e-3;
pub const DEFAULT_SCHEDULE_END: f64 = 2e-2;
/// Roughly how many previews a streamed run should produce.
pub const DEFAULT_PREVIEW_TARGET: u32 = 25;
pub const DEFAULT_IMAGE_QUALITY: u8 = 85;

/// Shorter payloads are rejected by the worker as truncated.
const MIN_IMAGE_PAYLOAD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    #[default]
    Linear,
    Cosine,
}

impl std::str::FromStr for ScheduleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "cosine" => Ok(Self::Cosine),
            other => Err(format!("unknown schedule '{other}' (expected linear or cosine)")),
        }
    }
}

/// What the worker should compute for one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Subject image as a data URL or raw base64.
    pub image: String,
    pub total_steps: u32,
    pub schedule: ScheduleKind,
    pub schedule_start: Option<f64>,
    pub schedule_end: Option<f64>,
    pub seed: u64,
}

impl JobSpec {
    /// Steps are clamped into the range the worker accepts.
    pub fn new(image: impl Into<String>, total_steps: u32) -> Self {
        Self {
            image: image.into(),
            total_steps: clamp_steps(total_steps),
            schedule: ScheduleKind::default(),
            schedule_start: None,
            schedule_end: None,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_schedule(mut self, kind: ScheduleKind) -> Self {
        self.schedule = kind;
        self
    }

    pub fn with_bounds(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.schedule_start = start;
        self.schedule_end = end;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.image.trim().len() < MIN_IMAGE_PAYLOAD_LEN {
            return Err(ValidationError::EmptyImage);
        }
        Ok(())
    }

    /// Last local step the worker will report.
    pub fn final_step(&self) -> u32 {
        self.total_steps.saturating_sub(1)
    }
}

/// Knobs for streamed runs that are not part of the job itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamOptions {
    pub preview_target: u32,
    pub quality: u8,
    pub include_metrics: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            preview_target: DEFAULT_PREVIEW_TARGET,
            quality: DEFAULT_IMAGE_QUALITY,
            include_metrics: true,
        }
    }
}

pub fn clamp_steps(steps: u32) -> u32 {
    steps.clamp(MIN_STEPS, MAX_STEPS)
}

/// Emit one preview every `max(1, floor(total_steps / target))` steps.
pub fn preview_cadence(total_steps: u32, target: u32) -> u32 {
    (total_steps / target.max(1)).max(1)
}

/// Upper bound on frame events a streamed run can produce before `done`:
/// one per cadence multiple plus the forced final step.
pub fn max_frame_events(total_steps: u32, cadence: u32) -> u32 {
    total_steps / cadence.max(1) + 1
}
