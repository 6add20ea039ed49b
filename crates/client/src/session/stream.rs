// crates/client/src/session/stream.rs
//! The single live connection to the worker's stream endpoint.
//!
//! `StreamSession` owns the lifecycle state; the socket itself lives in a
//! spawned task that reports back through an unbounded channel. Every event
//! is tagged with the generation of the `start()` that produced it, and
//! `accept()` drops anything from an older generation or arriving after the
//! session stopped being live.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use noisescope_core::{
    decode_worker_message, ClientControl, JobSpec, ProtocolError, StreamOptions,
    StreamStartRequest,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::events::{translate, Generation, SessionEvent, StreamEvent};
use super::state::{next_state, SessionState, Transition};
use crate::error::TransportError;

pub struct StreamSession {
    ws_url: String,
    options: StreamOptions,
    connect_timeout: Duration,
    state: SessionState,
    generation: Generation,
    offset: u64,
    cancel_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl StreamSession {
    /// Create an idle session. The receiver yields events from every
    /// generation; filter them through [`StreamSession::accept`].
    pub fn new(
        ws_url: impl Into<String>,
        options: StreamOptions,
        connect_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            ws_url: ws_url.into(),
            options,
            connect_timeout,
            state: SessionState::Idle,
            generation: Generation::default(),
            offset: 0,
            cancel_tx: None,
            task: None,
            events_tx,
        };
        (session, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Offset applied to local steps of the current generation.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Open a fresh stream for `spec`. Any live session is canceled first,
    /// so at most one connection is ever open.
    pub fn start(&mut self, spec: &JobSpec, offset: u64) -> Generation {
        self.cancel();

        self.generation = self.generation.next();
        self.offset = offset;
        self.state = next_state(self.state, Transition::Start).unwrap_or(SessionState::Connecting);

        let request = StreamStartRequest::from_job(spec, &self.options);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel_tx = Some(cancel_tx);

        info!(
            generation = %self.generation,
            steps = spec.total_steps,
            offset,
            "starting stream"
        );
        let io = tokio::spawn(run_stream(
            self.ws_url.clone(),
            request,
            self.connect_timeout,
            self.generation,
            offset,
            cancel_rx,
            self.events_tx.clone(),
        ));
        self.task = Some(tokio::spawn(watch_stream_task(
            io,
            self.generation,
            self.events_tx.clone(),
        )));
        self.generation
    }

    /// Stop the live stream, if any. Returns `false` (and changes nothing)
    /// when no session is live, so repeated calls are harmless.
    pub fn cancel(&mut self) -> bool {
        let Some(next) = next_state(self.state, Transition::Cancel) else {
            return false;
        };
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        debug!(generation = %self.generation, "stream canceled");
        self.state = next;
        true
    }

    /// Apply `event` to the lifecycle. Returns `true` when the caller
    /// should act on it; stale and out-of-state events return `false`.
    pub fn accept(&mut self, event: &SessionEvent) -> bool {
        if event.generation != self.generation || !self.state.is_live() {
            return false;
        }
        match next_state(self.state, event.kind.transition()) {
            Some(next) => {
                if next.is_terminal() {
                    self.cancel_tx = None;
                }
                self.state = next;
                true
            }
            None => false,
        }
    }

    /// Cancel and wait for the io task to exit.
    pub async fn shutdown(&mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Turn an io task that died (panic or abort) into a `Failed` event so the
/// coordinator never waits on a session nobody will finish. After a normal
/// terminal event this arrives late and `accept()` drops it.
async fn watch_stream_task(
    io: JoinHandle<()>,
    generation: Generation,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    if let Err(e) = io.await {
        warn!(%generation, error = %e, "stream task exited abnormally");
        let _ = events.send(SessionEvent::new(
            generation,
            StreamEvent::Failed(TransportError::TaskExited(e.to_string())),
        ));
    }
}

async fn run_stream(
    url: String,
    request: StreamStartRequest,
    connect_timeout: Duration,
    generation: Generation,
    offset: u64,
    mut cancel_rx: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    let emit = |kind: StreamEvent| {
        let _ = events.send(SessionEvent::new(generation, kind));
    };

    let connect = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));
    let ws_stream = tokio::select! {
        _ = &mut cancel_rx => {
            debug!(%generation, "canceled before connect");
            return;
        }
        result = connect => match result {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                warn!(%generation, %url, error = %e, "stream connect failed");
                emit(StreamEvent::Failed(TransportError::Connect(e.to_string())));
                return;
            }
            Err(_) => {
                warn!(%generation, %url, "stream connect timed out");
                emit(StreamEvent::Failed(TransportError::ConnectTimeout(connect_timeout)));
                return;
            }
        },
    };

    let (mut sink, mut stream) = ws_stream.split();

    let payload = match serde_json::to_string(&request) {
        Ok(p) => p,
        Err(e) => {
            emit(StreamEvent::Failed(TransportError::Encode(e.to_string())));
            return;
        }
    };
    if let Err(e) = sink.send(Message::Text(payload.into())).await {
        emit(StreamEvent::Failed(TransportError::Dropped(e.to_string())));
        return;
    }
    emit(StreamEvent::Opened);

    loop {
        tokio::select! {
            biased;

            _ = &mut cancel_rx => {
                if let Ok(control) = serde_json::to_string(&ClientControl::Cancel) {
                    let _ = sink.send(Message::Text(control.into())).await;
                }
                let _ = sink.close().await;
                debug!(%generation, "stream closed after cancel");
                return;
            }

            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let inbound = match decode_worker_message(&text) {
                        Ok(inbound) => inbound,
                        Err(e) => {
                            warn!(%generation, error = %e, "ignoring worker message (non-fatal)");
                            continue;
                        }
                    };
                    let batch = translate(inbound, offset);
                    let terminal = batch.iter().any(|ev| {
                        matches!(ev, StreamEvent::Done | StreamEvent::Canceled | StreamEvent::Failed(_))
                    });
                    for ev in batch {
                        emit(ev);
                    }
                    if terminal {
                        let _ = sink.close().await;
                        return;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    let e = ProtocolError::UnexpectedBinary { len: bytes.len() };
                    warn!(%generation, error = %e, "ignoring worker message (non-fatal)");
                }
                Some(Ok(Message::Close(_))) | None => {
                    emit(StreamEvent::Failed(TransportError::ClosedEarly));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(StreamEvent::Failed(TransportError::Dropped(e.to_string())));
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noisescope_core::Frame;

    fn session() -> (StreamSession, mpsc::UnboundedReceiver<SessionEvent>) {
        // Nothing listens on port 9; these tests never let the task connect.
        StreamSession::new(
            "ws://127.0.0.1:9/diffuse/ws",
            StreamOptions::default(),
            Duration::from_millis(200),
        )
    }

    fn spec() -> JobSpec {
        JobSpec::new("data:image/png;base64,AAAAAAAAAAAAAAAA", 10)
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let (mut s, _rx) = session();
        assert!(!s.cancel());
        assert!(!s.cancel());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_bumps_generation_and_cancel_twice() {
        let (mut s, _rx) = session();
        let g1 = s.start(&spec(), 0);
        assert_eq!(s.state(), SessionState::Connecting);
        let g2 = s.start(&spec(), 0);
        assert!(g2 > g1);
        assert!(s.cancel());
        assert_eq!(s.state(), SessionState::Canceled);
        assert!(!s.cancel());
        assert_eq!(s.state(), SessionState::Canceled);
    }

    #[tokio::test]
    async fn test_stale_generation_rejected() {
        let (mut s, _rx) = session();
        let old = s.start(&spec(), 0);
        s.start(&spec(), 0);
        let stale = SessionEvent::new(old, StreamEvent::Opened);
        assert!(!s.accept(&stale));
        assert_eq!(s.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_accept_drives_state() {
        let (mut s, _rx) = session();
        let g = s.start(&spec(), 0);
        assert!(s.accept(&SessionEvent::new(g, StreamEvent::Opened)));
        assert_eq!(s.state(), SessionState::Streaming);
        let frame = StreamEvent::Frame(Frame::new(0, 0));
        assert!(s.accept(&SessionEvent::new(g, frame.clone())));
        assert!(s.accept(&SessionEvent::new(g, StreamEvent::Done)));
        assert_eq!(s.state(), SessionState::Done);
        // Nothing after a terminal event is applied.
        assert!(!s.accept(&SessionEvent::new(g, frame)));
    }

    #[tokio::test]
    async fn test_events_after_cancel_rejected() {
        let (mut s, _rx) = session();
        let g = s.start(&spec(), 0);
        s.accept(&SessionEvent::new(g, StreamEvent::Opened));
        s.cancel();
        let late = SessionEvent::new(g, StreamEvent::Frame(Frame::new(3, 0)));
        assert!(!s.accept(&late));
    }

    #[tokio::test]
    async fn test_panicked_io_task_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let io = tokio::spawn(async { panic!("decoder blew up") });
        watch_stream_task(io, Generation(3), tx).await;

        let event = rx.recv().await.expect("failure event");
        assert_eq!(event.generation, Generation(3));
        assert!(matches!(
            event.kind,
            StreamEvent::Failed(TransportError::TaskExited(_))
        ));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_clean_io_exit_reports_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        watch_stream_task(tokio::spawn(async {}), Generation(1), tx).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_task_failure_moves_live_session_to_errored() {
        let (mut s, _rx) = session();
        let g = s.start(&spec(), 0);
        let failed = SessionEvent::new(
            g,
            StreamEvent::Failed(TransportError::TaskExited("panicked".into())),
        );
        assert!(s.accept(&failed));
        assert_eq!(s.state(), SessionState::Errored);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error() {
        let (mut s, mut rx) = session();
        let g = s.start(&spec(), 0);
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event before timeout")
            .expect("channel open");
        assert_eq!(event.generation, g);
        assert!(matches!(event.kind, StreamEvent::Failed(_)));
        assert!(s.accept(&event));
        assert_eq!(s.state(), SessionState::Errored);
    }
}
