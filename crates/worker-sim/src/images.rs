// crates/worker-sim/src/images.rs
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Serialize;
use tracing::info;

use crate::state::{SimState, StoredImage};
use crate::ApiError;

#[derive(Debug, Serialize)]
pub struct ImageOut {
    pub id: u64,
    pub filename: String,
    pub content_type: String,
    /// Base64 of the stored bytes.
    pub image_data: String,
}

impl From<&StoredImage> for ImageOut {
    fn from(img: &StoredImage) -> Self {
        Self {
            id: img.id,
            filename: img.filename.clone(),
            content_type: img.content_type.clone(),
            image_data: STANDARD.encode(&img.data),
        }
    }
}

/// POST /images: multipart upload, field `file`.
pub async fn upload_image(
    State(state): State<SimState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ImageOut>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
        if data.is_empty() {
            return Err(ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "empty upload"));
        }

        let image = StoredImage {
            id: state.next_image_id(),
            filename,
            content_type,
            data: data.to_vec(),
        };
        let out = ImageOut::from(&image);
        info!(id = image.id, filename = %image.filename, "image stored");
        state.images.insert(image.id, image);
        return Ok((StatusCode::CREATED, Json(out)));
    }
    Err(ApiError::new(
        StatusCode::UNPROCESSABLE_ENTITY,
        "missing multipart field 'file'",
    ))
}

/// GET /images: all stored images, oldest first.
pub async fn list_images(State(state): State<SimState>) -> Json<Vec<ImageOut>> {
    let mut out: Vec<ImageOut> = state.images.iter().map(|e| ImageOut::from(e.value())).collect();
    out.sort_by_key(|img| img.id);
    Json(out)
}

/// DELETE /images/{id}
pub async fn delete_image(
    State(state): State<SimState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    match state.images.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::new(StatusCode::NOT_FOUND, "Not found")),
    }
}
