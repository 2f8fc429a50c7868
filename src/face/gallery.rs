//! In-memory list of registered students, reloaded from MySQL on an interval.

use futures_util::StreamExt;
use sqlx::MySqlPool;
use sqlx::types::Json;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::ModelEmbeddings;
use crate::utils::db_utils::skip_undecodable;
use super::matcher::{GalleryEntry, MatchOutcome, best_match};

#[derive(Default)]
struct GalleryState {
    entries: Arc<Vec<GalleryEntry>>,
    loaded_at: Option<Instant>,
}

pub struct FaceGallery {
    state: RwLock<GalleryState>,
    refresh_interval: Duration,
}

impl FaceGallery {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            state: RwLock::new(GalleryState::default()),
            refresh_interval,
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<GalleryEntry>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    pub fn is_stale(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match state.loaded_at {
            Some(at) => at.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    /// Forces the next [`refresh_if_stale`](Self::refresh_if_stale) to reload.
    pub fn invalidate(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .loaded_at = None;
    }

    /// Drops one user from the current list right away and schedules a reload.
    pub fn remove(&self, user_id: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.entries.iter().any(|e| e.user_id == user_id) {
            let kept: Vec<GalleryEntry> = state
                .entries
                .iter()
                .filter(|e| e.user_id != user_id)
                .cloned()
                .collect();
            state.entries = Arc::new(kept);
        }
        state.loaded_at = None;
    }

    pub fn replace(&self, entries: Vec<GalleryEntry>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.entries = Arc::new(entries);
        state.loaded_at = Some(Instant::now());
    }

    pub fn best_match(&self, query: &ModelEmbeddings, accept_percent: f32) -> MatchOutcome {
        best_match(query, &self.snapshot(), accept_percent)
    }

    pub async fn refresh_if_stale(&self, pool: &MySqlPool) {
        if !self.is_stale() {
            return;
        }
        // A failed reload keeps serving the previous list.
        if let Err(e) = self.reload(pool).await {
            warn!(error = %e, "Face gallery refresh failed");
        }
    }

    /// Streams every registered student and swaps the list in one step.
    pub async fn reload(&self, pool: &MySqlPool) -> Result<usize, sqlx::Error> {
        let mut stream = sqlx::query_as::<_, GalleryRow>(
            r#"
            SELECT id, name, roll_no, face_embeddings
            FROM users
            WHERE role = 'student'
              AND face_registered = TRUE
              AND face_embeddings IS NOT NULL
            "#,
        )
        .fetch(pool);

        let mut entries = Vec::new();
        let mut skipped = 0usize;

        while let Some(row) = stream.next().await {
            match skip_undecodable(row)?.and_then(GalleryRow::into_entry) {
                Some(entry) => entries.push(entry),
                None => skipped += 1,
            }
        }

        let loaded = entries.len();
        self.replace(entries);
        info!(loaded, skipped, "Face gallery reloaded");
        Ok(loaded)
    }
}

#[derive(sqlx::FromRow)]
struct GalleryRow {
    id: u64,
    name: String,
    roll_no: Option<String>,
    face_embeddings: Option<Json<ModelEmbeddings>>,
}

impl GalleryRow {
    fn into_entry(self) -> Option<GalleryEntry> {
        let embeddings: ModelEmbeddings = self
            .face_embeddings?
            .0
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .collect();

        if embeddings.is_empty() {
            return None;
        }

        Some(GalleryEntry {
            user_id: self.id,
            name: self.name,
            roll_no: self.roll_no,
            embeddings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, v: Vec<f32>) -> GalleryEntry {
        GalleryEntry {
            user_id: id,
            name: format!("student {id}"),
            roll_no: None,
            embeddings: ModelEmbeddings::from([("Facenet512".to_string(), v)]),
        }
    }

    #[test]
    fn starts_stale_and_fresh_after_replace() {
        let gallery = FaceGallery::new(Duration::from_secs(300));
        assert!(gallery.is_stale());
        assert!(gallery.snapshot().is_empty());

        gallery.replace(vec![entry(1, vec![1.0, 0.0])]);
        assert!(!gallery.is_stale());
        assert_eq!(gallery.snapshot().len(), 1);

        gallery.invalidate();
        assert!(gallery.is_stale());
        // invalidation keeps the current list until the reload lands
        assert_eq!(gallery.snapshot().len(), 1);
    }

    #[test]
    fn removed_users_stop_matching_immediately() {
        let gallery = FaceGallery::new(Duration::from_secs(300));
        gallery.replace(vec![entry(1, vec![0.0, 1.0]), entry(2, vec![1.0, 0.0])]);

        gallery.remove(2);
        assert_eq!(gallery.snapshot().len(), 1);
        assert!(gallery.is_stale());

        let query = ModelEmbeddings::from([("Facenet512".to_string(), vec![1.0, 0.0])]);
        let out = gallery.best_match(&query, 50.0);
        assert!(!out.matched);
        assert_eq!(out.user_id, None);

        // unknown ids leave the list alone
        gallery.remove(42);
        assert_eq!(gallery.snapshot().len(), 1);
    }

    #[test]
    fn zero_interval_is_always_stale() {
        let gallery = FaceGallery::new(Duration::ZERO);
        gallery.replace(vec![]);
        assert!(gallery.is_stale());
    }

    #[test]
    fn matches_against_current_snapshot() {
        let gallery = FaceGallery::new(Duration::from_secs(300));
        gallery.replace(vec![entry(1, vec![0.0, 1.0]), entry(2, vec![1.0, 0.0])]);

        let query = ModelEmbeddings::from([("Facenet512".to_string(), vec![1.0, 0.0])]);
        let out = gallery.best_match(&query, 50.0);
        assert_eq!(out.user_id, Some(2));
    }

    #[test]
    fn rows_without_usable_embeddings_are_skipped() {
        let row = GalleryRow {
            id: 4,
            name: "n".into(),
            roll_no: None,
            face_embeddings: Some(Json(ModelEmbeddings::from([("ArcFace".to_string(), vec![])]))),
        };
        assert!(row.into_entry().is_none());

        let row = GalleryRow { id: 4, name: "n".into(), roll_no: None, face_embeddings: None };
        assert!(row.into_entry().is_none());
    }
}
