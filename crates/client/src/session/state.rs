// crates/client/src/session/state.rs
//! Lifecycle of one worker stream.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Streaming,
    Done,
    Canceled,
    Errored,
}

impl SessionState {
    /// A connection is open or being opened.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Errored)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Done => "done",
            Self::Canceled => "canceled",
            Self::Errored => "errored",
        }
    }
}

/// Inputs that can move a session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    ChannelReady,
    StepReceived,
    WorkerDone,
    Cancel,
    Fail,
}

/// The single place session transitions are decided.
///
/// Returns `None` when the input does not apply in `from`, in which case
/// the state is left untouched. Cancel on a session with nothing live is
/// such a no-op, which makes cancellation idempotent.
pub fn next_state(from: SessionState, input: Transition) -> Option<SessionState> {
    use SessionState::*;
    use Transition::*;

    match (from, input) {
        (Idle | Done | Canceled | Errored, Start) => Some(Connecting),
        (Connecting, ChannelReady) => Some(Streaming),
        (Streaming, StepReceived) => Some(Streaming),
        (Connecting | Streaming, WorkerDone) => Some(Done),
        (Connecting | Streaming, Cancel) => Some(Canceled),
        (Connecting | Streaming, Fail) => Some(Errored),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;
    use Transition::*;

    #[test]
    fn test_happy_path() {
        let s = next_state(Idle, Start).unwrap();
        assert_eq!(s, Connecting);
        let s = next_state(s, ChannelReady).unwrap();
        assert_eq!(s, Streaming);
        let s = next_state(s, StepReceived).unwrap();
        assert_eq!(s, Streaming);
        assert_eq!(next_state(s, WorkerDone), Some(Done));
    }

    #[test]
    fn test_cancel_from_live_states() {
        assert_eq!(next_state(Connecting, Cancel), Some(Canceled));
        assert_eq!(next_state(Streaming, Cancel), Some(Canceled));
    }

    #[test]
    fn test_cancel_is_noop_when_nothing_live() {
        for s in [Idle, Done, Canceled, Errored] {
            assert_eq!(next_state(s, Cancel), None, "cancel from {s:?}");
        }
    }

    #[test]
    fn test_failure_from_live_states() {
        assert_eq!(next_state(Connecting, Fail), Some(Errored));
        assert_eq!(next_state(Streaming, Fail), Some(Errored));
        assert_eq!(next_state(Done, Fail), None);
    }

    #[test]
    fn test_restart_after_terminal() {
        for s in [Done, Canceled, Errored] {
            assert_eq!(next_state(s, Start), Some(Connecting));
        }
        assert_eq!(next_state(Streaming, Start), None);
    }

    #[test]
    fn test_steps_ignored_outside_streaming() {
        assert_eq!(next_state(Connecting, StepReceived), None);
        assert_eq!(next_state(Canceled, StepReceived), None);
    }

    #[test]
    fn test_liveness() {
        assert!(Connecting.is_live());
        assert!(Streaming.is_live());
        assert!(!Idle.is_live());
        assert!(Canceled.is_terminal());
        assert!(!Idle.is_terminal());
    }
}
