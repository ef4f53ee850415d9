use sqlx::FromRow;

use crate::database::Database;

/// An Android device reported through pub/sub enrollment notifications.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AndroidHost {
    pub id: i64,
    pub enterprise_specific_id: String,
    pub device_id: String,
    pub serial_number: String,
    pub model: String,
    pub brand: String,
    pub enrolled: bool,
    pub last_status_report_at: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAndroidHost {
    pub enterprise_specific_id: String,
    pub device_id: String,
    pub serial_number: String,
    pub model: String,
    pub brand: String,
}

const COLUMNS: &str = "id, enterprise_specific_id, device_id, serial_number, model, brand, \
                       enrolled, last_status_report_at";

impl AndroidHost {
    /// Insert the host, or refresh and re-enroll it if it is already known.
    pub async fn upsert(host: &NewAndroidHost, db: &Database) -> Result<AndroidHost, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO android_hosts (
                enterprise_specific_id, device_id, serial_number, model, brand, enrolled
            )
            VALUES (?1, ?2, ?3, ?4, ?5, 1)
            ON CONFLICT (enterprise_specific_id) DO UPDATE SET
                device_id = excluded.device_id,
                serial_number = excluded.serial_number,
                model = excluded.model,
                brand = excluded.brand,
                enrolled = 1,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&host.enterprise_specific_id)
        .bind(&host.device_id)
        .bind(&host.serial_number)
        .bind(&host.model)
        .bind(&host.brand)
        .execute(&**db)
        .await?;

        Self::get(&host.enterprise_specific_id, db)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get(
        enterprise_specific_id: &str,
        db: &Database,
    ) -> Result<Option<AndroidHost>, sqlx::Error> {
        sqlx::query_as::<_, AndroidHost>(&format!(
            "SELECT {COLUMNS} FROM android_hosts WHERE enterprise_specific_id = ?1"
        ))
        .bind(enterprise_specific_id)
        .fetch_optional(&**db)
        .await
    }

    pub async fn list(db: &Database) -> Result<Vec<AndroidHost>, sqlx::Error> {
        sqlx::query_as::<_, AndroidHost>(&format!("SELECT {COLUMNS} FROM android_hosts ORDER BY id"))
            .fetch_all(&**db)
            .await
    }

    /// Record a status report; `unenroll` marks the device as gone.
    pub async fn record_status_report(
        enterprise_specific_id: &str,
        reported_at: &str,
        unenroll: bool,
        db: &Database,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE android_hosts
            SET last_status_report_at = ?2,
                enrolled = CASE WHEN ?3 THEN 0 ELSE enrolled END,
                updated_at = CURRENT_TIMESTAMP
            WHERE enterprise_specific_id = ?1
            "#,
        )
        .bind(enterprise_specific_id)
        .bind(reported_at)
        .bind(unenroll)
        .execute(&**db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn unenroll_all(db: &Database) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE android_hosts SET enrolled = 0, updated_at = CURRENT_TIMESTAMP WHERE enrolled = 1",
        )
        .execute(&**db)
        .await?;
        Ok(result.rows_affected())
    }
}
