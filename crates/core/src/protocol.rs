// crates/core/src/protocol.rs
//! Wire messages exchanged with the diffusion worker.
//!
//! Field names follow the worker's JSON exactly (`image_b64`, `preview_every`,
//! `t`, ...). Both directions derive `Serialize` and `Deserialize` so the
//! simulated worker can reuse them.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::frame::Metrics;
use crate::job::{
    preview_cadence, JobSpec, ScheduleKind, StreamOptions, DEFAULT_SCHEDULE_END,
    DEFAULT_SCHEDULE_START,
};

/// First (and only) message the client sends on a fresh stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStartRequest {
    pub image_b64: String,
    pub steps: u32,
    pub beta_start: f64,
    pub beta_end: f64,
    pub schedule: ScheduleKind,
    pub seed: Option<u64>,
    pub preview_every: u32,
    pub quality: u8,
    pub data_url: bool,
    pub include_metrics: bool,
}

impl StreamStartRequest {
    pub fn from_job(spec: &JobSpec, options: &StreamOptions) -> Self {
        Self {
            image_b64: spec.image.clone(),
            steps: spec.total_steps,
            beta_start: spec.schedule_start.unwrap_or(DEFAULT_SCHEDULE_START),
            beta_end: spec.schedule_end.unwrap_or(DEFAULT_SCHEDULE_END),
            schedule: spec.schedule,
            seed: Some(spec.seed),
            preview_every: preview_cadence(spec.total_steps, options.preview_target),
            quality: options.quality,
            data_url: true,
            include_metrics: options.include_metrics,
        }
    }
}

/// Request body for the single-shot `POST /diffuse` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleShotRequest {
    pub image_b64: String,
    pub steps: u32,
    pub schedule: ScheduleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta_end: Option<f64>,
    pub seed: Option<u64>,
    pub return_data_url: bool,
}

impl SingleShotRequest {
    pub fn from_job(spec: &JobSpec) -> Self {
        Self {
            image_b64: spec.image.clone(),
            steps: spec.total_steps,
            schedule: spec.schedule,
            beta_start: spec.schedule_start,
            beta_end: spec.schedule_end,
            seed: Some(spec.seed),
            return_data_url: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleShotResponse {
    pub image: String,
    /// Step the returned image corresponds to.
    pub t: u32,
}

/// Control messages the client may send mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientControl {
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Done,
    #[serde(alias = "cancelled")]
    Canceled,
    Error,
}

/// Any message the worker pushes down the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<i64>,
    /// 1-based step counter; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkerStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A step update, before offset rebasing.
#[derive(Debug, Clone, PartialEq)]
pub struct StepUpdate {
    pub local_step: u32,
    pub image: Option<String>,
    pub metrics: Option<Metrics>,
    pub schedule_value: Option<f64>,
    pub progress: Option<f64>,
}

/// A decoded worker message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Step(StepUpdate),
    /// `done`, `canceled` or `error`. Terminal messages never carry a frame:
    /// the worker always streams its final step before reporting `done`.
    Terminal {
        status: WorkerStatus,
        progress: Option<f64>,
        detail: Option<String>,
    },
}

/// Decode one text frame from the worker.
pub fn decode_worker_message(text: &str) -> Result<Inbound, ProtocolError> {
    let msg: WorkerMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedJson {
            message: e.to_string(),
        })?;

    if let Some(status) = msg.status {
        return Ok(Inbound::Terminal {
            status,
            progress: msg.progress.filter(|p| p.is_finite()),
            detail: msg.detail,
        });
    }

    let Some(t) = msg.t else {
        return Err(ProtocolError::UnrecognizedShape {
            raw: truncate(text, 120),
        });
    };
    let local_step = u32::try_from(t).map_err(|_| ProtocolError::InvalidStep {
        value: t.to_string(),
    })?;

    Ok(Inbound::Step(StepUpdate {
        local_step,
        image: msg.image.filter(|s| !s.is_empty()),
        metrics: msg.metrics,
        schedule_value: msg.beta.filter(|b| b.is_finite()),
        progress: msg.progress.filter(|p| p.is_finite()),
    }))
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;

    #[test]
    fn test_stream_start_request_defaults() {
        let spec = JobSpec::new("data:image/png;base64,iVBORw0KGgoAAAA", 500);
        let req = StreamStartRequest::from_job(&spec, &StreamOptions::default());
        assert_eq!(req.preview_every, 20);
        assert_eq!(req.beta_start, DEFAULT_SCHEDULE_START);
        assert_eq!(req.beta_end, DEFAULT_SCHEDULE_END);
        assert_eq!(req.seed, Some(42));
        assert!(req.include_metrics);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["schedule"], "linear");
        assert_eq!(json["quality"], 85);
    }

    #[test]
    fn test_single_shot_request_omits_absent_bounds() {
        let spec = JobSpec::new("data:image/png;base64,iVBORw0KGgoAAAA", 50);
        let json = serde_json::to_string(&SingleShotRequest::from_job(&spec)).unwrap();
        assert!(!json.contains("beta_start"));
        assert!(json.contains("\"return_data_url\":true"));
    }

    #[test]
    fn test_cancel_control_shape() {
        let json = serde_json::to_string(&ClientControl::Cancel).unwrap();
        assert_eq!(json, r#"{"action":"cancel"}"#);
    }

    #[test]
    fn test_decode_step_message() {
        let inbound = decode_worker_message(
            r#"{"t":20,"step":21,"progress":0.042,"image":"data:x","metrics":{"Cosine":0.98}}"#,
        )
        .unwrap();
        match inbound {
            Inbound::Step(update) => {
                assert_eq!(update.local_step, 20);
                assert_eq!(update.image.as_deref(), Some("data:x"));
                assert_eq!(update.progress, Some(0.042));
                assert_eq!(update.metrics.unwrap()["Cosine"], 0.98);
            }
            other => panic!("expected step, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_done_is_terminal_even_with_step() {
        let inbound =
            decode_worker_message(r#"{"status":"done","t":499,"progress":1.0,"image":"x"}"#)
                .unwrap();
        assert_eq!(
            inbound,
            Inbound::Terminal {
                status: WorkerStatus::Done,
                progress: Some(1.0),
                detail: None,
            }
        );
    }

    #[test]
    fn test_decode_error_and_cancelled_status() {
        let inbound = decode_worker_message(r#"{"status":"error","detail":"boom"}"#).unwrap();
        assert!(matches!(
            inbound,
            Inbound::Terminal { status: WorkerStatus::Error, detail: Some(ref d), .. } if d == "boom"
        ));
        let inbound = decode_worker_message(r#"{"status":"cancelled"}"#).unwrap();
        assert!(matches!(
            inbound,
            Inbound::Terminal { status: WorkerStatus::Canceled, .. }
        ));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(matches!(
            decode_worker_message("not json"),
            Err(ProtocolError::MalformedJson { .. })
        ));
        assert!(matches!(
            decode_worker_message(r#"{"progress":0.5}"#),
            Err(ProtocolError::UnrecognizedShape { .. })
        ));
        assert!(matches!(
            decode_worker_message(r#"{"t":-3}"#),
            Err(ProtocolError::InvalidStep { .. })
        ));
        assert!(matches!(
            decode_worker_message(r#"{"status":"queued"}"#),
            Err(ProtocolError::MalformedJson { .. })
        ));
    }
}
