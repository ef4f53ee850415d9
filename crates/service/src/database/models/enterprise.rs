use sqlx::FromRow;

use crate::database::Database;

/// An Android enterprise signup. Pending until the signup callback fills in
/// `enterprise_id`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Enterprise {
    pub id: i64,
    /// Upstream signup URL resource name, `signupUrls/...`.
    pub signup_name: String,
    pub signup_token: String,
    /// Short enterprise id; empty while the signup is pending.
    pub enterprise_id: String,
    pub topic_id: String,
    /// User that started the signup.
    pub user_id: i64,
}

const COLUMNS: &str = "id, signup_name, signup_token, enterprise_id, topic_id, user_id";

impl Enterprise {
    /// Full upstream resource name, `enterprises/<id>`.
    pub fn name(&self) -> String {
        format!("enterprises/{}", self.enterprise_id)
    }

    pub fn is_registered(&self) -> bool {
        !self.enterprise_id.is_empty()
    }

    /// Insert an empty pending row for a new signup.
    pub async fn create(user_id: i64, db: &Database) -> Result<Enterprise, sqlx::Error> {
        let id = sqlx::query("INSERT INTO android_enterprises (user_id) VALUES (?1)")
            .bind(user_id)
            .execute(&**db)
            .await?
            .last_insert_rowid();

        Self::get(id, db).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get(id: i64, db: &Database) -> Result<Option<Enterprise>, sqlx::Error> {
        sqlx::query_as::<_, Enterprise>(&format!(
            "SELECT {COLUMNS} FROM android_enterprises WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&**db)
        .await
    }

    /// The registered enterprise, if a signup has completed.
    pub async fn get_registered(db: &Database) -> Result<Option<Enterprise>, sqlx::Error> {
        sqlx::query_as::<_, Enterprise>(&format!(
            "SELECT {COLUMNS} FROM android_enterprises
             WHERE enterprise_id != ''
             ORDER BY id DESC
             LIMIT 1"
        ))
        .fetch_optional(&**db)
        .await
    }

    /// Pending signups that have been issued a signup token.
    pub async fn list_pending(db: &Database) -> Result<Vec<Enterprise>, sqlx::Error> {
        sqlx::query_as::<_, Enterprise>(&format!(
            "SELECT {COLUMNS} FROM android_enterprises
             WHERE enterprise_id = '' AND signup_token != ''
             ORDER BY id"
        ))
        .fetch_all(&**db)
        .await
    }

    pub async fn list(db: &Database) -> Result<Vec<Enterprise>, sqlx::Error> {
        sqlx::query_as::<_, Enterprise>(&format!(
            "SELECT {COLUMNS} FROM android_enterprises ORDER BY id"
        ))
        .fetch_all(&**db)
        .await
    }

    pub async fn set_signup(
        id: i64,
        signup_name: &str,
        signup_token: &str,
        db: &Database,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE android_enterprises
            SET signup_name = ?2, signup_token = ?3, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(signup_name)
        .bind(signup_token)
        .execute(&**db)
        .await?;
        Ok(())
    }

    pub async fn register(
        id: i64,
        enterprise_id: &str,
        topic_id: &str,
        db: &Database,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE android_enterprises
            SET enterprise_id = ?2, topic_id = ?3, updated_at = CURRENT_TIMESTAMP
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(enterprise_id)
        .bind(topic_id)
        .execute(&**db)
        .await?;
        Ok(())
    }

    /// Remove every row except `keep_id`. Returns the number removed.
    pub async fn delete_others(keep_id: i64, db: &Database) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM android_enterprises WHERE id != ?1")
            .bind(keep_id)
            .execute(&**db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete(id: i64, db: &Database) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM android_enterprises WHERE id = ?1")
            .bind(id)
            .execute(&**db)
            .await?;
        Ok(())
    }

    pub async fn delete_all(db: &Database) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM android_enterprises")
            .execute(&**db)
            .await?;
        Ok(result.rows_affected())
    }
}
