//! Face image uploads to a Supabase-compatible storage bucket.

use derive_more::Display;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug, Display)]
pub enum BlobError {
    #[display(fmt = "storage request failed: {}", _0)]
    Network(String),
    #[display(fmt = "storage returned {}: {}", status, body)]
    Api { status: u16, body: String },
}

impl std::error::Error for BlobError {}

struct Endpoint {
    base_url: String,
    service_key: String,
}

pub struct BlobStore {
    endpoint: Option<Endpoint>,
    bucket: String,
    http_client: Client,
}

impl BlobStore {
    /// Without both a URL and a key every upload is skipped.
    pub fn new(base_url: Option<&str>, service_key: Option<&str>, bucket: &str) -> Result<Self, BlobError> {
        let endpoint = match (base_url, service_key) {
            (Some(url), Some(key)) => Some(Endpoint {
                base_url: url.trim_end_matches('/').to_string(),
                service_key: key.to_string(),
            }),
            _ => None,
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BlobError::Network(e.to_string()))?;

        Ok(Self {
            endpoint,
            bucket: bucket.to_string(),
            http_client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, BlobError> {
        Self::new(
            config.supabase_url.as_deref(),
            config.supabase_service_key.as_deref(),
            &config.supabase_bucket,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Uploads (or replaces) the object and returns its public URL.
    /// `Ok(None)` when storage is not configured.
    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<Option<String>, BlobError> {
        let Some(endpoint) = &self.endpoint else {
            return Ok(None);
        };

        let url = format!("{}/storage/v1/object/{}/{}", endpoint.base_url, self.bucket, path);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&endpoint.service_key)
            .header("apikey", &endpoint.service_key)
            .header("x-upsert", "true")
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| BlobError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BlobError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        info!(path, bucket = %self.bucket, "Uploaded face image");
        Ok(Some(format!(
            "{}/storage/v1/object/public/{}/{}",
            endpoint.base_url, self.bucket, path
        )))
    }

    /// Stores a user's face image. Failures are logged and yield `None`.
    pub async fn upload_face_image(&self, user_id: u64, email: &str, jpeg: Vec<u8>) -> Option<String> {
        let path = face_image_path(user_id, email);
        match self.upload(&path, jpeg, "image/jpeg").await {
            Ok(url) => url,
            Err(e) => {
                warn!(user_id, error = %e, "Face image upload failed");
                None
            }
        }
    }
}

pub fn face_image_path(user_id: u64, email: &str) -> String {
    format!("faces/{}_{}.jpg", user_id, email.replace('@', "_"))
}
