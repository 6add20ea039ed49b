// crates/client/src/worker.rs
//! Request/response calls to the worker: the single-shot job and the error
//! body shape shared by every HTTP endpoint.

use noisescope_core::{JobSpec, SingleShotRequest, SingleShotResponse};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Error body returned by the worker on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

/// Turn a non-success response into `ClientError::Http`, extracting the
/// worker's `{detail}` when present.
pub(crate) async fn error_from_response(resp: reqwest::Response) -> ClientError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no response body".to_string(),
        Err(_) => body,
    };
    ClientError::Http { status, detail }
}

#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    diffuse_url: String,
}

impl WorkerClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_http(reqwest::Client::new(), config)
    }

    pub fn with_http(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            diffuse_url: config.http_url("/diffuse"),
        }
    }

    /// Run one job to completion and return the final image.
    pub async fn diffuse(&self, spec: &JobSpec) -> Result<SingleShotResponse, ClientError> {
        spec.validate()?;
        let body = SingleShotRequest::from_job(spec);
        debug!(steps = spec.total_steps, schedule = ?spec.schedule, "single-shot request");

        let resp = self.http.post(&self.diffuse_url).json(&body).send().await?;
        if !resp.status().is_success() {
            let err = error_from_response(resp).await;
            warn!(error = %err, "single-shot job failed");
            return Err(err);
        }
        Ok(resp.json::<SingleShotResponse>().await?)
    }
}
