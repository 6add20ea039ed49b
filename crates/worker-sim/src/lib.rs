// crates/worker-sim/src/lib.rs
//! A protocol-compatible stand-in for the diffusion worker.
//!
//! Serves the same endpoints as the real worker (`/diffuse`, `/diffuse/ws`,
//! `/images`) but emits synthetic frames instead of diffusing anything.

pub mod images;
pub mod schedule;
pub mod state;
pub mod ws;

use std::net::SocketAddr;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use noisescope_core::{
    SingleShotRequest, SingleShotResponse, DEFAULT_SCHEDULE_END, DEFAULT_SCHEDULE_START,
};
use serde_json::json;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use schedule::NoiseSchedule;
use state::SimState;

/// Error responses use the worker's `{"detail": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Preview payload for step `t`. Decodes to `<seed>:<t>`, which lets tests
/// tell frames apart without real images.
pub fn synthetic_image(seed: u64, t: u32, data_url: bool) -> String {
    let payload = STANDARD.encode(format!("{seed}:{t}"));
    if data_url {
        format!("data:text/plain;base64,{payload}")
    } else {
        payload
    }
}

/// POST /diffuse: run a whole job and return the final step.
async fn diffuse(Json(req): Json<SingleShotRequest>) -> Result<Json<SingleShotResponse>, ApiError> {
    if req.image_b64.trim().len() < 16 {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "image_b64 looks invalid/empty",
        ));
    }
    NoiseSchedule::build(
        req.steps,
        req.schedule,
        req.beta_start.unwrap_or(DEFAULT_SCHEDULE_START),
        req.beta_end.unwrap_or(DEFAULT_SCHEDULE_END),
    )
    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Diffusion failed: {e}")))?;

    let t = req.steps - 1;
    Ok(Json(SingleShotResponse {
        image: synthetic_image(req.seed.unwrap_or_default(), t, req.return_data_url),
        t,
    }))
}

pub fn app(state: SimState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/diffuse", post(diffuse))
        .route("/diffuse/ws", get(ws::ws_handler))
        .route("/images", get(images::list_images).post(images::upload_image))
        .route("/images/{id}", delete(images::delete_image))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `127.0.0.1:0` and serve in the background. Returns the bound address.
pub async fn serve_ephemeral(state: SimState) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    let app = app(state);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!(error = %e, "simulated worker stopped");
        }
    });
    info!(%addr, "simulated worker listening");
    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_image_encodes_step() {
        let url = synthetic_image(42, 7, true);
        let payload = url.strip_prefix("data:text/plain;base64,").unwrap();
        assert_eq!(STANDARD.decode(payload).unwrap(), b"42:7");
        assert_eq!(synthetic_image(42, 7, false), payload);
    }
}
