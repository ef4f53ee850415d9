use crate::database::Database;

pub struct EnrollSecret;

impl EnrollSecret {
    pub async fn create(secret: &str, db: &Database) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO enroll_secrets (secret) VALUES (?1)")
            .bind(secret)
            .execute(&**db)
            .await?;
        Ok(())
    }

    pub async fn verify(secret: &str, db: &Database) -> Result<bool, sqlx::Error> {
        if secret.is_empty() {
            return Ok(false);
        }
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM enroll_secrets WHERE secret = ?1")
            .bind(secret)
            .fetch_optional(&**db)
            .await?;
        Ok(found.is_some())
    }
}
