use std::fmt;

use serde_json::Value;
use sqlx::FromRow;

use crate::database::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityType {
    EnabledAndroidMdm,
    DisabledAndroidMdm,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::EnabledAndroidMdm => "enabled_android_mdm",
            ActivityType::DisabledAndroidMdm => "disabled_android_mdm",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of an administrative action.
#[derive(Debug, Clone, FromRow)]
pub struct Activity {
    pub id: i64,
    pub user_id: Option<i64>,
    pub activity_type: String,
    pub details: String,
}

impl Activity {
    pub async fn create(
        user_id: Option<i64>,
        activity_type: ActivityType,
        details: &Value,
        db: &Database,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO activities (user_id, activity_type, details) VALUES (?1, ?2, ?3)")
            .bind(user_id)
            .bind(activity_type.as_str())
            .bind(details.to_string())
            .execute(&**db)
            .await?;
        tracing::info!(activity = %activity_type, ?user_id, "activity recorded");
        Ok(())
    }

    pub async fn list(db: &Database) -> Result<Vec<Activity>, sqlx::Error> {
        sqlx::query_as::<_, Activity>(
            "SELECT id, user_id, activity_type, details FROM activities ORDER BY id",
        )
        .fetch_all(&**db)
        .await
    }
}
