// crates/core/src/frame_store.rs
//! Ordered per-subject timeline of frames keyed by global step.

use std::collections::BTreeMap;

use crate::frame::{Frame, COSINE_METRIC};

/// What a [`FrameStore::merge`] did to the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A new global step was added.
    Inserted,
    /// An existing global step was updated in place.
    Replaced,
}

/// Ordered mapping `global_step -> Frame` for exactly one subject.
///
/// Global steps are unique; iteration is always ascending. Persisting the
/// merged set is the owner's job (see `SubjectCache::save`), so the store
/// itself stays a plain value that can be cloned and compared in tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStore {
    frames: BTreeMap<u64, Frame>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a persisted sequence. Later duplicates win.
    pub fn from_frames(frames: impl IntoIterator<Item = Frame>) -> Self {
        let mut store = Self::new();
        for frame in frames {
            store.merge(frame);
        }
        store
    }

    /// Insert a frame, or update the frame already at its global step.
    ///
    /// An update keeps any field the incoming frame leaves empty, so a
    /// metrics-only message enriches an earlier image-only one (and the
    /// reverse) instead of erasing it.
    pub fn merge(&mut self, frame: Frame) -> MergeOutcome {
        match self.frames.get_mut(&frame.global_step) {
            Some(existing) => {
                let Frame {
                    local_step,
                    global_step: _,
                    image,
                    metrics,
                    schedule_value,
                } = frame;
                existing.local_step = local_step;
                if image.is_some() {
                    existing.image = image;
                }
                if metrics.is_some() {
                    existing.metrics = metrics;
                }
                if schedule_value.is_some() {
                    existing.schedule_value = schedule_value;
                }
                MergeOutcome::Replaced
            }
            None => {
                self.frames.insert(frame.global_step, frame);
                MergeOutcome::Inserted
            }
        }
    }

    /// The timeline in ascending global-step order.
    pub fn to_sorted_sequence(&self) -> Vec<Frame> {
        self.frames.values().cloned().collect()
    }

    /// Ascending by global step; `.rev()` walks newest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Frame> {
        self.frames.values()
    }

    /// Frame with the highest global step.
    pub fn latest(&self) -> Option<&Frame> {
        self.frames.values().next_back()
    }

    pub fn get(&self, global_step: u64) -> Option<&Frame> {
        self.frames.get(&global_step)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Offset that appends a new run after the existing history.
    pub fn next_offset(&self) -> u64 {
        self.latest().map(|f| f.global_step + 1).unwrap_or(0)
    }

    /// `(global_step, value)` for every frame carrying a finite `name` metric.
    pub fn metric_series(&self, name: &str) -> Vec<(u64, f64)> {
        self.frames
            .values()
            .filter_map(|f| f.metric(name).map(|v| (f.global_step, v)))
            .collect()
    }

    /// Noise residual `1 - cosine` per step, as charted by the viewer.
    pub fn residual_series(&self) -> Vec<(u64, f64)> {
        self.metric_series(COSINE_METRIC)
            .into_iter()
            .map(|(step, cosine)| (step, 1.0 - cosine))
            .collect()
    }

    /// `(global_step, beta)` for every frame the worker tagged with its
    /// schedule value.
    pub fn schedule_series(&self) -> Vec<(u64, f64)> {
        self.frames
            .values()
            .filter_map(|f| {
                f.schedule_value
                    .filter(|v| v.is_finite())
                    .map(|v| (f.global_step, v))
            })
            .collect()
    }
}
