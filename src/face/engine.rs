//! Client for the face detection/embedding sidecar.
//!
//! The sidecar wraps the deep-learning library (detector + embedding models)
//! and exposes it over HTTP:
//!
//! ```text
//! POST {base}/represent  {"image": "<base64>", "models": ["Facenet512"], "detector": "opencv"}
//!   → {"faces": [{"bbox": {"x":..,"y":..,"w":..,"h":..},
//!                 "embeddings": {"Facenet512": [..]},
//!                 "emotion": "neutral"}]}
//! GET  {base}/health     → 2xx when models are loaded
//! ```

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use derive_more::Display;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::matcher::l2_normalize;
use super::{BoundingBox, ModelEmbeddings};
use crate::config::Config;

#[derive(Debug, Display)]
pub enum FaceEngineError {
    #[display(fmt = "network error: {}", _0)]
    Network(String),
    #[display(fmt = "engine returned {}: {}", status, body)]
    Api { status: u16, body: String },
    #[display(fmt = "could not parse engine response: {}", _0)]
    Parse(String),
}

impl std::error::Error for FaceEngineError {}

/// Result of analysing one image: the largest face and its embeddings.
#[derive(Debug, Clone)]
pub struct FaceAnalysis {
    pub embeddings: ModelEmbeddings,
    pub bbox: BoundingBox,
    pub emotion: Option<String>,
}

#[async_trait]
pub trait FaceEngine: Send + Sync {
    /// `Ok(None)` means the image contained no usable face.
    async fn analyze(&self, image: &[u8]) -> Result<Option<FaceAnalysis>, FaceEngineError>;

    async fn health(&self) -> Result<(), FaceEngineError>;
}

#[derive(Serialize)]
struct RepresentRequest<'a> {
    image: String,
    models: &'a [String],
    detector: &'a str,
}

#[derive(Deserialize)]
struct RepresentResponse {
    #[serde(default)]
    faces: Vec<RepresentedFace>,
}

#[derive(Deserialize)]
struct RepresentedFace {
    bbox: BoundingBox,
    #[serde(default)]
    embeddings: ModelEmbeddings,
    emotion: Option<String>,
}

pub struct HttpFaceEngine {
    base_url: String,
    models: Vec<String>,
    http_client: Client,
}

impl HttpFaceEngine {
    pub fn new(base_url: &str, models: Vec<String>, timeout: Duration) -> Result<Self, FaceEngineError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FaceEngineError::Network(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            models,
            http_client,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, FaceEngineError> {
        Self::new(
            &config.face_engine_url,
            config.face_models.clone(),
            Duration::from_secs(config.face_engine_timeout_secs),
        )
    }
}

#[async_trait]
impl FaceEngine for HttpFaceEngine {
    async fn analyze(&self, image: &[u8]) -> Result<Option<FaceAnalysis>, FaceEngineError> {
        let url = format!("{}/represent", self.base_url);
        let body = RepresentRequest {
            image: STANDARD.encode(image),
            models: &self.models,
            detector: "opencv",
        };

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FaceEngineError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FaceEngineError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RepresentResponse = response
            .json()
            .await
            .map_err(|e| FaceEngineError::Parse(e.to_string()))?;

        debug!(faces = parsed.faces.len(), "Face engine responded");
        Ok(select_largest_face(parsed.faces, &self.models))
    }

    async fn health(&self) -> Result<(), FaceEngineError> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| FaceEngineError::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(FaceEngineError::Api {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Keeps the largest face, only the requested models, and unit-length vectors.
fn select_largest_face(faces: Vec<RepresentedFace>, models: &[String]) -> Option<FaceAnalysis> {
    let face = faces.into_iter().max_by_key(|f| f.bbox.area())?;

    let embeddings: ModelEmbeddings = face
        .embeddings
        .into_iter()
        .filter(|(model, _)| models.iter().any(|m| m == model))
        .filter_map(|(model, vector)| match l2_normalize(&vector) {
            Some(v) => Some((model, v)),
            None => {
                warn!(model = %model, "Dropping zero-norm embedding");
                None
            }
        })
        .collect();

    if embeddings.is_empty() {
        return None;
    }

    Some(FaceAnalysis {
        embeddings,
        bbox: face.bbox,
        emotion: face.emotion,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn models() -> Vec<String> {
        vec!["Facenet512".into(), "ArcFace".into()]
    }

    #[actix_web::test]
    async fn analyze_picks_largest_face_and_normalizes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/represent")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "models": ["Facenet512", "ArcFace"],
                "detector": "opencv"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"faces":[
                    {"bbox":{"x":0,"y":0,"w":10,"h":10},"embeddings":{"Facenet512":[1.0,0.0]}},
                    {"bbox":{"x":20,"y":20,"w":80,"h":90},
                     "embeddings":{"Facenet512":[3.0,4.0],"VGG-Face":[1.0]},
                     "emotion":"happy"}
                ]}"#,
            )
            .create_async()
            .await;

        let engine = HttpFaceEngine::new(&server.url(), models(), Duration::from_secs(5)).unwrap();
        let analysis = engine.analyze(b"fake-jpeg").await.unwrap().expect("face");

        mock.assert_async().await;
        assert_eq!(analysis.bbox, BoundingBox { x: 20, y: 20, w: 80, h: 90 });
        assert_eq!(analysis.emotion.as_deref(), Some("happy"));
        assert_eq!(analysis.embeddings.len(), 1);
        let v = &analysis.embeddings["Facenet512"];
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
    }

    #[actix_web::test]
    async fn analyze_without_faces_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/represent")
            .with_status(200)
            .with_body(r#"{"faces":[]}"#)
            .create_async()
            .await;

        let engine = HttpFaceEngine::new(&server.url(), models(), Duration::from_secs(5)).unwrap();
        assert!(engine.analyze(b"img").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn engine_errors_carry_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/represent")
            .with_status(503)
            .with_body("model loading")
            .create_async()
            .await;

        let engine = HttpFaceEngine::new(&server.url(), models(), Duration::from_secs(5)).unwrap();
        match engine.analyze(b"img").await {
            Err(FaceEngineError::Api { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "model loading");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[actix_web::test]
    async fn health_check_succeeds() {
        let mut server = mockito::Server::new_async().await;
        server.mock("GET", "/health").with_status(200).create_async().await;

        let engine = HttpFaceEngine::new(&format!("{}/", server.url()), models(), Duration::from_secs(5)).unwrap();
        assert!(engine.health().await.is_ok());
    }
}
