// crates/worker-sim/src/ws.rs
//! `GET /diffuse/ws`: one job per connection, previews pushed as they are
//! produced, `{"action":"cancel"}` honored at any time.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use noisescope_core::{ClientControl, StreamStartRequest, WorkerMessage, WorkerStatus, COSINE_METRIC};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::schedule::NoiseSchedule;
use crate::state::SimState;
use crate::synthetic_image;

type Sink = SplitSink<WebSocket, Message>;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SimState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json(sink: &mut Sink, msg: &WorkerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(text) => sink.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    }
}

async fn fail(sink: &mut Sink, detail: impl Into<String>) {
    let msg = WorkerMessage {
        status: Some(WorkerStatus::Error),
        detail: Some(detail.into()),
        ..WorkerMessage::default()
    };
    send_json(sink, &msg).await;
    let _ = sink.close().await;
}

fn is_cancel(text: &str) -> bool {
    matches!(serde_json::from_str::<ClientControl>(text), Ok(ClientControl::Cancel))
}

async fn handle_socket(socket: WebSocket, state: SimState) {
    let stream_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();

    // First message must be the job
    let Some(Ok(Message::Text(first_msg))) = stream.next().await else {
        return;
    };
    let req = match serde_json::from_str::<StreamStartRequest>(&first_msg) {
        Ok(req) => req,
        Err(e) => {
            warn!(%stream_id, error = %e, "invalid start payload");
            fail(&mut sink, format!("invalid start payload: {e}")).await;
            return;
        }
    };
    if req.image_b64.trim().len() < 16 {
        fail(&mut sink, "image_b64 looks invalid/empty").await;
        return;
    }
    let schedule = match NoiseSchedule::build(req.steps, req.schedule, req.beta_start, req.beta_end) {
        Ok(s) => s,
        Err(e) => {
            fail(&mut sink, e.to_string()).await;
            return;
        }
    };

    info!(%stream_id, steps = req.steps, every = req.preview_every, "stream started");
    let behavior = state.behavior.clone();

    if behavior.inject_garbage {
        let _ = sink.send(Message::Text("not json at all".into())).await;
        let _ = sink.send(Message::Text(r#"{"hello":"world"}"#.into())).await;
        let _ = sink.send(Message::Binary(vec![1u8, 2, 3].into())).await;
    }

    let steps = req.steps;
    let stride = req.preview_every.max(1);
    let mut t: u32 = 0;
    let mut last_image = None;

    while t < steps {
        tokio::select! {
            biased;

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if is_cancel(&text) {
                        let ack = WorkerMessage {
                            status: Some(WorkerStatus::Canceled),
                            ..WorkerMessage::default()
                        };
                        send_json(&mut sink, &ack).await;
                        let _ = sink.close().await;
                        info!(%stream_id, at = t, "stream canceled by client");
                        return;
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    debug!(%stream_id, at = t, "client went away");
                    return;
                }
                Some(Ok(_)) => {}
            },

            _ = tokio::time::sleep(behavior.step_delay) => {
                if behavior.drop_after == Some(t) {
                    warn!(%stream_id, at = t, "dropping connection on purpose");
                    return;
                }
                if behavior.fail_after == Some(t) {
                    fail(&mut sink, "simulated worker failure").await;
                    return;
                }
                if t % stride == 0 || t == steps - 1 {
                    let mut msg = step_message(&req, &schedule, t);
                    last_image = msg.image.clone();
                    // With a follow-up the frame itself carries only the image.
                    let followup = if behavior.metrics_followup {
                        msg.metrics.take().map(|metrics| WorkerMessage {
                            t: Some(i64::from(t)),
                            metrics: Some(metrics),
                            ..WorkerMessage::default()
                        })
                    } else {
                        None
                    };
                    if !send_json(&mut sink, &msg).await {
                        return;
                    }
                    if let Some(followup) = followup {
                        send_json(&mut sink, &followup).await;
                    }
                }
                t += 1;
            }
        }
    }

    let done = WorkerMessage {
        t: Some(i64::from(steps - 1)),
        step: Some(steps),
        progress: Some(1.0),
        image: last_image,
        status: Some(WorkerStatus::Done),
        ..WorkerMessage::default()
    };
    send_json(&mut sink, &done).await;
    let _ = sink.close().await;
    info!(%stream_id, steps, "stream done");
}

fn step_message(req: &StreamStartRequest, schedule: &NoiseSchedule, t: u32) -> WorkerMessage {
    let metrics = req.include_metrics.then(|| {
        let mut m = noisescope_core::Metrics::new();
        m.insert(COSINE_METRIC.to_string(), schedule.expected_cosine(t));
        m
    });
    WorkerMessage {
        t: Some(i64::from(t)),
        step: Some(t + 1),
        progress: Some(f64::from(t + 1) / f64::from(req.steps)),
        image: Some(synthetic_image(req.seed.unwrap_or_default(), t, req.data_url)),
        metrics,
        beta: Some(schedule.beta(t)),
        ..WorkerMessage::default()
    }
}
