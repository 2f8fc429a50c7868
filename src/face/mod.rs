//! Face recognition orchestration.
//!
//! Detection and embedding extraction are delegated to an external engine
//! ([`engine::FaceEngine`]); everything here is bookkeeping around the
//! vectors it returns: matching, duplicate checks, frame quality and the
//! in-memory gallery of registered students.

pub mod engine;
pub mod gallery;
pub mod matcher;
pub mod quality;
pub mod registration;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Embedding vectors keyed by the model that produced them
/// (e.g. `Facenet512`, `ArcFace`).
pub type ModelEmbeddings = BTreeMap<String, Vec<f32>>;

/// Pixel-space box of a detected face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }
}
