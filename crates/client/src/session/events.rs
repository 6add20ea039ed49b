// crates/client/src/session/events.rs
//! Typed events produced from worker messages.

use noisescope_core::{Frame, Inbound, StepUpdate, WorkerStatus};

use super::state::Transition;
use crate::error::TransportError;

/// Identifies one `start()` of a stream session. Events carry the
/// generation that produced them so stale ones can be recognized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Channel open and job submitted.
    Opened,
    /// A step, already rebased onto the subject's timeline.
    Frame(Frame),
    Progress {
        fraction: f64,
        local_step: Option<u32>,
    },
    Done,
    /// The worker acknowledged a cancellation.
    Canceled,
    Failed(TransportError),
}

impl StreamEvent {
    /// The state-machine input this event represents.
    pub fn transition(&self) -> Transition {
        match self {
            Self::Opened => Transition::ChannelReady,
            Self::Frame(_) | Self::Progress { .. } => Transition::StepReceived,
            Self::Done => Transition::WorkerDone,
            Self::Canceled => Transition::Cancel,
            Self::Failed(_) => Transition::Fail,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub generation: Generation,
    pub kind: StreamEvent,
}

impl SessionEvent {
    pub fn new(generation: Generation, kind: StreamEvent) -> Self {
        Self { generation, kind }
    }
}

/// Rebase a step update onto the timeline: `global = local + offset`.
pub fn frame_from_update(update: &StepUpdate, offset: u64) -> Frame {
    Frame {
        local_step: update.local_step,
        global_step: u64::from(update.local_step) + offset,
        image: update.image.clone(),
        metrics: update.metrics.clone(),
        schedule_value: update.schedule_value,
    }
}

/// Events for one decoded worker message, in the order they are delivered.
pub fn translate(inbound: Inbound, offset: u64) -> Vec<StreamEvent> {
    match inbound {
        Inbound::Step(update) => {
            let mut events = vec![StreamEvent::Frame(frame_from_update(&update, offset))];
            if let Some(fraction) = update.progress {
                events.push(StreamEvent::Progress {
                    fraction: fraction.clamp(0.0, 1.0),
                    local_step: Some(update.local_step),
                });
            }
            events
        }
        Inbound::Terminal {
            status,
            progress,
            detail,
        } => {
            let mut events = Vec::with_capacity(2);
            if let Some(fraction) = progress {
                events.push(StreamEvent::Progress {
                    fraction: fraction.clamp(0.0, 1.0),
                    local_step: None,
                });
            }
            events.push(match status {
                WorkerStatus::Done => StreamEvent::Done,
                WorkerStatus::Canceled => StreamEvent::Canceled,
                WorkerStatus::Error => StreamEvent::Failed(TransportError::Worker(
                    detail.unwrap_or_else(|| "unknown error".to_string()),
                )),
            });
            events
        }
    }
}
