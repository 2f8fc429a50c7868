use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Key of the single settings row.
pub const GLOBAL_SETTINGS_KEY: &str = "global";

#[derive(Debug, Default, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub mobile_gps_enabled: bool,
}

impl Settings {
    /// Missing row means defaults.
    pub async fn load(pool: &sqlx::MySqlPool) -> Result<Self, sqlx::Error> {
        let row = sqlx::query_as::<_, Settings>(
            "SELECT mobile_gps_enabled FROM settings WHERE setting_key = ?",
        )
        .bind(GLOBAL_SETTINGS_KEY)
        .fetch_optional(pool)
        .await?;
        Ok(row.unwrap_or_default())
    }

    pub async fn save(&self, pool: &sqlx::MySqlPool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO settings (setting_key, mobile_gps_enabled)
            VALUES (?, ?)
            ON DUPLICATE KEY UPDATE mobile_gps_enabled = VALUES(mobile_gps_enabled)
            "#,
        )
        .bind(GLOBAL_SETTINGS_KEY)
        .bind(self.mobile_gps_enabled)
        .execute(pool)
        .await?;
        Ok(())
    }
}
