use anyhow::{Context, Result};
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use tracing::info;

use crate::config::Config;
use crate::model::role::Role;
use crate::services::users::{self, NewUser};

pub async fn init_db(database_url: &str) -> Result<MySqlPool> {
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}

/// Creates the first admin from `SEED_ADMIN_*` when no account uses that email.
pub async fn seed_admin(pool: &MySqlPool, config: &Config) -> Result<()> {
    let (Some(email), Some(password)) = (&config.seed_admin_email, &config.seed_admin_password) else {
        return Ok(());
    };

    if users::find_by_email(pool, email).await?.is_some() {
        return Ok(());
    }

    users::create_user(
        pool,
        NewUser {
            role: Role::Admin,
            name: &config.seed_admin_name,
            email,
            password,
            class_name: None,
            roll_no: None,
        },
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to seed admin account: {e}"))?;

    info!(%email, "Seeded admin account");
    Ok(())
}
