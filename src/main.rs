use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod face;
mod model;
mod models;
mod routes;
mod services;
mod storage;
mod utils;

#[cfg(test)]
mod test_support;

use config::Config;
use db::{init_db, seed_admin};
use face::engine::{FaceEngine, HttpFaceEngine};
use face::gallery::FaceGallery;
use face::registration::RegistrationStore;
use storage::blob_store::BlobStore;

use crate::docs::ApiDoc;
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Face attendance backend is running"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let pool = init_db(&config.database_url).await?;
    seed_admin(&pool, &config).await?;

    let engine: Arc<dyn FaceEngine> =
        Arc::new(HttpFaceEngine::from_config(&config).context("Failed to build face engine client")?);
    let blobs = Data::new(BlobStore::from_config(&config).context("Failed to build storage client")?);
    if !blobs.is_enabled() {
        warn!("SUPABASE_URL / SUPABASE_SERVICE_ROLE_KEY not set; face images will not be stored");
    }

    let gallery = Data::new(FaceGallery::new(Duration::from_secs(config.gallery_refresh_secs)));
    let registrations = Data::new(RegistrationStore::new(Duration::from_secs(
        config.registration_ttl_secs,
    )));

    // The engine may still be loading models; requests fail with 502 until it is up.
    match engine.health().await {
        Ok(()) => info!(url = %config.face_engine_url, "Face engine reachable"),
        Err(e) => warn!(url = %config.face_engine_url, error = %e, "Face engine not reachable"),
    }

    match gallery.reload(&pool).await {
        Ok(count) => info!(count, "Face gallery loaded"),
        Err(e) => warn!(error = %e, "Initial face gallery load failed"),
    }

    let refresh_pool = pool.clone();
    let refresh_gallery = gallery.clone();
    let refresh_every = Duration::from_secs(config.gallery_refresh_secs.max(1));
    actix_web::rt::spawn(async move {
        let mut ticker = actix_web::rt::time::interval(refresh_every);
        loop {
            ticker.tick().await;
            refresh_gallery.refresh_if_stale(&refresh_pool).await;
        }
    });

    let server_addr = config.server_addr.clone();
    let engine = Data::from(engine);
    let config_data = Data::new(config);
    let pool_data = Data::new(pool);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard matches JS/CSS assets
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(pool_data.clone())
            .app_data(config_data.clone())
            .app_data(engine.clone())
            .app_data(gallery.clone())
            .app_data(registrations.clone())
            .app_data(blobs.clone())
            .service(index)
            .configure(|cfg| routes::configure(cfg, &config_data))
    })
    .bind(&server_addr)
    .with_context(|| format!("Failed to bind {server_addr}"))?
    .run()
    .await?;

    Ok(())
}
