//! SQLite-backed job store (`database` feature)
//!
//! Records are stored whole as JSON, one row per job. Saves read, patch and
//! write the row inside a single transaction.

#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use sqlx::{migrate::MigrateDatabase, Row, SqlitePool};
#[cfg(feature = "database")]
use tracing::info;

#[cfg(feature = "database")]
use crate::pipeline::{JobId, JobRecord, JobUpdate};
#[cfg(feature = "database")]
use crate::store::{JobStore, StoreError};

#[cfg(feature = "database")]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

#[cfg(feature = "database")]
impl SqliteJobStore {
    /// Open (creating if needed) the database and run migrations
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        if !sqlx::Sqlite::database_exists(database_url).await? {
            info!("Creating database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;

        Ok(Self { pool })
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down database connections...");
        self.pool.close().await;
        info!("Database connections closed");
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(&record)?;
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO jobs (id, record, updated_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(record.id.as_str())
        .bind(body)
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(record.id));
        }
        Ok(())
    }

    async fn load(&self, job_id: &JobId) -> Result<Option<JobRecord>, StoreError> {
        let row = sqlx::query("SELECT record FROM jobs WHERE id = ?1")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let body: String = row.get("record");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT record FROM jobs WHERE id = ?1")
            .bind(job_id.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.clone()))?;
        let body: String = row.get("record");
        let mut record: JobRecord = serde_json::from_str(&body)?;
        update.apply(&mut record);

        sqlx::query("UPDATE jobs SET record = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(&record)?)
            .bind(record.updated_at.to_rfc3339())
            .bind(job_id.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn list(&self) -> Result<Vec<JobId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM jobs ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| JobId::new(row.get::<String, _>("id")))
            .collect())
    }
}
