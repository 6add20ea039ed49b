// crates/client/src/subjects.rs
//! Subject directory: where uploaded images get their durable identity.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::image::sniff_image;
use crate::worker::error_from_response;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: String,
    #[serde(default)]
    pub filename: Option<String>,
    /// Preview handle (data URL) for the subject image, when known.
    #[serde(default)]
    pub preview: Option<String>,
}

#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<SubjectRecord, ClientError>;
    async fn delete(&self, id: &str) -> Result<(), ClientError>;
    async fn list(&self) -> Result<Vec<SubjectRecord>, ClientError>;
}

/// Ids arrive as integers from some backends and strings from others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Int(i64),
    Str(String),
}

impl From<WireId> for String {
    fn from(id: WireId) -> Self {
        match id {
            WireId::Int(n) => n.to_string(),
            WireId::Str(s) => s,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireImage {
    id: WireId,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    image_data: Option<String>,
}

impl From<WireImage> for SubjectRecord {
    fn from(w: WireImage) -> Self {
        let preview = w.image_data.map(|data| {
            if data.starts_with("data:") {
                data
            } else {
                let mime = w.content_type.as_deref().unwrap_or("image/png");
                format!("data:{mime};base64,{data}")
            }
        });
        Self {
            id: w.id.into(),
            filename: w.filename,
            preview,
        }
    }
}

/// `SubjectDirectory` backed by the worker's `/images` endpoints.
#[derive(Debug, Clone)]
pub struct HttpSubjectDirectory {
    http: reqwest::Client,
    images_url: String,
}

impl HttpSubjectDirectory {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            images_url: config.http_url("/images"),
        }
    }
}

#[async_trait]
impl SubjectDirectory for HttpSubjectDirectory {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<SubjectRecord, ClientError> {
        let mime = sniff_image(&bytes)
            .map(|format| format.mime())
            .unwrap_or("application/octet-stream");
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)?;
        let form = Form::new().part("file", part);
        let resp = self
            .http
            .post(&self.images_url)
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(resp.json::<WireImage>().await?.into())
    }

    async fn delete(&self, id: &str) -> Result<(), ClientError> {
        let resp = self
            .http
            .delete(format!("{}/{id}", self.images_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SubjectRecord>, ClientError> {
        let resp = self.http.get(&self.images_url).send().await?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        let images: Vec<WireImage> = resp.json().await?;
        Ok(images.into_iter().map(SubjectRecord::from).collect())
    }
}
