use crate::database::Database;

/// Singleton feature-flag row.
pub struct AppConfig;

impl AppConfig {
    pub async fn android_enabled_and_configured(db: &Database) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT android_enabled_and_configured FROM app_config WHERE id = 1",
        )
        .fetch_one(&**db)
        .await
    }

    pub async fn set_android_enabled_and_configured(
        enabled: bool,
        db: &Database,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE app_config SET android_enabled_and_configured = ?1 WHERE id = 1")
            .bind(enabled)
            .execute(&**db)
            .await?;
        Ok(())
    }
}
