//! Shared fixtures for handler tests.

use actix_web::web::{self, Data};
use async_trait::async_trait;
use sqlx::MySqlPool;
use sqlx::error::{DatabaseError, ErrorKind};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::jwt::generate_access_token;
use crate::config::{Config, test_config};
use crate::face::engine::{FaceAnalysis, FaceEngine, FaceEngineError};
use crate::face::gallery::FaceGallery;
use crate::face::registration::RegistrationStore;
use crate::face::{BoundingBox, ModelEmbeddings};
use crate::model::role::Role;
use crate::routes;
use crate::storage::blob_store::BlobStore;

/// Never connects unless a handler actually reaches a query.
pub fn lazy_pool() -> MySqlPool {
    MySqlPool::connect_lazy(&test_config().database_url).unwrap()
}

pub fn bearer(role: Role, user_id: u64) -> (&'static str, String) {
    let config = test_config();
    let token = generate_access_token(
        user_id,
        format!("{role}{user_id}@example.edu"),
        role,
        &config.jwt_secret,
        3600,
    )
    .unwrap();
    ("Authorization", format!("Bearer {token}"))
}

/// Returns the same face for every image.
pub struct StubEngine {
    pub analysis: Option<FaceAnalysis>,
}

impl StubEngine {
    pub fn one_face() -> Self {
        Self {
            analysis: Some(FaceAnalysis {
                embeddings: ModelEmbeddings::from([("Facenet512".to_string(), vec![1.0, 0.0])]),
                bbox: BoundingBox { x: 1, y: 1, w: 2, h: 2 },
                emotion: Some("neutral".into()),
            }),
        }
    }
}

#[async_trait]
impl FaceEngine for StubEngine {
    async fn analyze(&self, _image: &[u8]) -> Result<Option<FaceAnalysis>, FaceEngineError> {
        Ok(self.analysis.clone())
    }

    async fn health(&self) -> Result<(), FaceEngineError> {
        Ok(())
    }
}

/// Registers app state and routes without rate limiting.
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    configure_app_with(cfg, Data::new(RegistrationStore::new(Duration::from_secs(60))));
}

/// Like [`configure_app`], sharing a registration store with the test.
pub fn configure_app_with(cfg: &mut web::ServiceConfig, registrations: Data<RegistrationStore>) {
    let config: Config = test_config();
    let engine: Arc<dyn FaceEngine> = Arc::new(StubEngine::one_face());
    // Loaded and empty, so handlers never try to refresh it from the lazy pool.
    let gallery = FaceGallery::new(Duration::from_secs(300));
    gallery.replace(Vec::new());

    cfg.app_data(Data::new(lazy_pool()))
        .app_data(Data::from(engine))
        .app_data(Data::new(gallery))
        .app_data(registrations)
        .app_data(Data::new(BlobStore::new(None, None, &config.supabase_bucket).unwrap()));
    routes::configure_unlimited(cfg, &config);
    cfg.app_data(Data::new(config));
}

/// What MySQL returns when an insert or update hits a unique key.
#[derive(Debug)]
pub struct UniqueViolation;

impl std::fmt::Display for UniqueViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Duplicate entry for key")
    }
}

impl std::error::Error for UniqueViolation {}

impl DatabaseError for UniqueViolation {
    fn message(&self) -> &str {
        "Duplicate entry for key"
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed("23000"))
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        ErrorKind::UniqueViolation
    }
}

pub fn duplicate_key_error() -> sqlx::Error {
    sqlx::Error::Database(Box::new(UniqueViolation))
}
