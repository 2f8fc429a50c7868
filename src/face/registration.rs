//! Multi-frame registration sessions, kept in memory with a fixed lifetime.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use super::ModelEmbeddings;
use super::matcher::average_embeddings;

pub const DEFAULT_TARGET_FRAMES: u32 = 50;
pub const MAX_TARGET_FRAMES: u32 = 200;
const MAX_OPEN_SESSIONS: u64 = 10_000;

#[derive(Debug)]
pub struct RegistrationSession {
    pub user_id: u64,
    pub target: u32,
    pub count: u32,
    pub started_at: DateTime<Utc>,
    embeddings: BTreeMap<String, Vec<Vec<f32>>>,
}

impl RegistrationSession {
    fn new(user_id: u64, target: u32) -> Self {
        Self {
            user_id,
            target,
            count: 0,
            started_at: Utc::now(),
            embeddings: BTreeMap::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.target
    }

    /// Records one accepted frame. Returns the new count.
    pub fn add_frame(&mut self, frame: ModelEmbeddings) -> u32 {
        for (model, vector) in frame {
            self.embeddings.entry(model).or_default().push(vector);
        }
        self.count += 1;
        self.count
    }

    /// Per-model mean of every captured frame.
    pub fn averaged(&self) -> ModelEmbeddings {
        self.embeddings
            .iter()
            .filter_map(|(model, frames)| average_embeddings(frames).map(|v| (model.clone(), v)))
            .collect()
    }
}

pub type SharedSession = Arc<Mutex<RegistrationSession>>;

/// Why a lookup was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum LookupError {
    /// Unknown or expired id.
    Invalid,
    /// Started by somebody else.
    NotOwner,
}

pub struct RegistrationStore {
    sessions: Cache<String, SharedSession>,
}

impl RegistrationStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(MAX_OPEN_SESSIONS)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn clamp_target(requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(DEFAULT_TARGET_FRAMES)
            .clamp(1, MAX_TARGET_FRAMES)
    }

    pub async fn start(&self, user_id: u64, target: u32) -> String {
        let id = Uuid::new_v4().to_string();
        let session = RegistrationSession::new(user_id, target);
        self.sessions
            .insert(id.clone(), Arc::new(Mutex::new(session)))
            .await;
        id
    }

    pub async fn get(&self, id: &str, user_id: u64) -> Result<SharedSession, LookupError> {
        let session = self
            .sessions
            .get(id)
            .await
            .ok_or(LookupError::Invalid)?;

        let owner = lock(&session).user_id;
        if owner != user_id {
            return Err(LookupError::NotOwner);
        }
        Ok(session)
    }

    pub async fn remove(&self, id: &str) {
        self.sessions.invalidate(id).await;
    }
}

/// Frame updates never panic while holding the lock, so a poisoned mutex
/// still holds consistent data.
pub fn lock(session: &SharedSession) -> std::sync::MutexGuard<'_, RegistrationSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(v: Vec<f32>) -> ModelEmbeddings {
        ModelEmbeddings::from([("Facenet512".to_string(), v)])
    }

    #[test]
    fn target_is_clamped() {
        assert_eq!(RegistrationStore::clamp_target(None), 50);
        assert_eq!(RegistrationStore::clamp_target(Some(0)), 1);
        assert_eq!(RegistrationStore::clamp_target(Some(5000)), 200);
        assert_eq!(RegistrationStore::clamp_target(Some(12)), 12);
    }

    #[test]
    fn frames_are_averaged_per_model() {
        let mut s = RegistrationSession::new(1, 2);
        s.add_frame(frame(vec![1.0, 0.0]));
        assert!(!s.is_full());
        s.add_frame(ModelEmbeddings::from([
            ("Facenet512".to_string(), vec![0.0, 1.0]),
            ("ArcFace".to_string(), vec![2.0]),
        ]));
        assert!(s.is_full());

        let avg = s.averaged();
        assert_eq!(avg["Facenet512"], vec![0.5, 0.5]);
        assert_eq!(avg["ArcFace"], vec![2.0]);
    }

    #[actix_web::test]
    async fn sessions_belong_to_their_starter() {
        let store = RegistrationStore::new(Duration::from_secs(60));
        let id = store.start(7, 3).await;

        assert!(store.get(&id, 7).await.is_ok());
        assert_eq!(store.get(&id, 8).await.err(), Some(LookupError::NotOwner));
        assert_eq!(store.get("nope", 7).await.err(), Some(LookupError::Invalid));

        store.remove(&id).await;
        assert_eq!(store.get(&id, 7).await.err(), Some(LookupError::Invalid));
    }

    #[actix_web::test]
    async fn sessions_expire() {
        let store = RegistrationStore::new(Duration::from_millis(50));
        let id = store.start(1, 3).await;
        actix_web::rt::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(store.get(&id, 1).await.err(), Some(LookupError::Invalid));
    }

    #[actix_web::test]
    async fn updates_through_the_store_are_shared() {
        let store = RegistrationStore::new(Duration::from_secs(60));
        let id = store.start(1, 3).await;
        {
            let s = store.get(&id, 1).await.unwrap();
            lock(&s).add_frame(frame(vec![1.0]));
        }
        let s = store.get(&id, 1).await.unwrap();
        assert_eq!(lock(&s).count, 1);
    }
}
