//! Storing a user's face: single-image and multi-frame paths share the
//! duplicate check and the final write.

use chrono::Utc;
use futures_util::StreamExt;
use sqlx::MySqlPool;
use sqlx::types::Json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::face::engine::FaceEngine;
use crate::face::gallery::FaceGallery;
use crate::face::matcher::find_duplicate;
use crate::face::{BoundingBox, ModelEmbeddings};
use crate::model::user::User;
use crate::storage::blob_store::BlobStore;
use crate::utils::db_utils::skip_undecodable;
use crate::utils::image_data::{decode_base64_image, load_image, to_jpeg};

pub struct Enrollment<'a> {
    pub pool: &'a MySqlPool,
    pub engine: &'a dyn FaceEngine,
    pub gallery: &'a FaceGallery,
    pub blobs: &'a BlobStore,
    pub duplicate_threshold: f32,
}

#[derive(Debug)]
pub struct Enrolled {
    pub image_url: Option<String>,
    pub bbox: BoundingBox,
}

pub fn ensure_not_registered(user: &User) -> Result<(), AppError> {
    if user.face_registered {
        Err(AppError::forbidden("Face already registered"))
    } else {
        Ok(())
    }
}

impl Enrollment<'_> {
    /// Registers `user` from one base64 image.
    pub async fn from_image(&self, user: &User, image_b64: &str) -> Result<Enrolled, AppError> {
        ensure_not_registered(user)?;

        let bytes = decode_base64_image(image_b64)?;
        let image = load_image(&bytes)?;

        let analysis = self
            .engine
            .analyze(&bytes)
            .await?
            .ok_or_else(|| AppError::bad_request("No face detected"))?;

        self.reject_duplicates(user.id, &analysis.embeddings).await?;

        let image_url = match to_jpeg(&image) {
            Ok(jpeg) => self.blobs.upload_face_image(user.id, &user.email, jpeg).await,
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Could not encode face image");
                None
            }
        };

        save_face(self.pool, user.id, &analysis.embeddings, image_url.as_deref()).await?;
        self.gallery.invalidate();

        Ok(Enrolled {
            image_url,
            bbox: analysis.bbox,
        })
    }

    /// Registers `user` from embeddings already averaged over several frames.
    pub async fn from_embeddings(&self, user: &User, embeddings: &ModelEmbeddings) -> Result<(), AppError> {
        ensure_not_registered(user)?;
        self.reject_duplicates(user.id, embeddings).await?;
        save_face(self.pool, user.id, embeddings, None).await?;
        self.gallery.invalidate();
        Ok(())
    }

    async fn reject_duplicates(&self, user_id: u64, embeddings: &ModelEmbeddings) -> Result<(), AppError> {
        if let Some(owner) =
            find_duplicate_owner(self.pool, embeddings, user_id, self.duplicate_threshold).await?
        {
            warn!(user_id, existing_user = owner, "Duplicate face rejected");
            return Err(AppError::bad_request("Face already registered to another user"));
        }
        Ok(())
    }
}

/// Scans every stored face and returns the first other user it matches.
pub async fn find_duplicate_owner(
    pool: &MySqlPool,
    query: &ModelEmbeddings,
    exclude_user: u64,
    threshold: f32,
) -> Result<Option<u64>, sqlx::Error> {
    let mut rows = sqlx::query_as::<_, (u64, Json<ModelEmbeddings>)>(
        r#"
        SELECT id, face_embeddings
        FROM users
        WHERE face_registered = TRUE
          AND face_embeddings IS NOT NULL
          AND id <> ?
        "#,
    )
    .bind(exclude_user)
    .fetch(pool);

    while let Some(row) = rows.next().await {
        let Some((id, stored)) = skip_undecodable(row)? else {
            continue;
        };
        if let Some(owner) = find_duplicate(query, [(id, &stored.0)], exclude_user, threshold) {
            return Ok(Some(owner));
        }
    }
    Ok(None)
}

/// Writes the face once; a concurrent registration that landed first wins.
async fn save_face(
    pool: &MySqlPool,
    user_id: u64,
    embeddings: &ModelEmbeddings,
    image_url: Option<&str>,
) -> Result<(), AppError> {
    let done = sqlx::query(
        r#"
        UPDATE users
        SET face_registered = TRUE,
            face_embeddings = ?,
            face_image_url = COALESCE(?, face_image_url),
            face_registered_at = ?
        WHERE id = ? AND face_registered = FALSE
        "#,
    )
    .bind(Json(embeddings))
    .bind(image_url)
    .bind(Utc::now().naive_utc())
    .bind(user_id)
    .execute(pool)
    .await?;

    if done.rows_affected() == 0 {
        return Err(AppError::forbidden("Face already registered"));
    }

    let models: Vec<&str> = embeddings.keys().map(String::as_str).collect();
    info!(user_id, ?models, "Face registered");
    Ok(())
}
