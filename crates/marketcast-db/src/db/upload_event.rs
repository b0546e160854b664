use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketcast_core::{CacheConfig, Stage, UploadEvent, UploadStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

use super::{CacheError, CacheResult, UploadEventCache};

/// Row shape of `upload_events`; enums are stored as text.
#[derive(Debug, sqlx::FromRow)]
struct UploadEventRow {
    key: String,
    status: String,
    reference_url: Option<String>,
    failure_reason: Option<String>,
    stage: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UploadEventRow> for UploadEvent {
    type Error = CacheError;

    fn try_from(row: UploadEventRow) -> Result<Self, Self::Error> {
        let invalid = |reason: String| CacheError::InvalidRecord {
            key: row.key.clone(),
            reason,
        };
        let status = row
            .status
            .parse::<UploadStatus>()
            .map_err(|e| invalid(e.to_string()))?;
        let stage = row
            .stage
            .as_deref()
            .map(str::parse::<Stage>)
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(UploadEvent {
            key: row.key,
            status,
            reference_url: row.reference_url,
            failure_reason: row.failure_reason,
            stage,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed idempotency cache
#[derive(Clone)]
pub struct PgUploadEventCache {
    pool: PgPool,
}

impl PgUploadEventCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized from configuration and apply pending migrations.
    pub async fn connect(config: &CacheConfig) -> Result<Self, anyhow::Error> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set for the postgres cache"))?;

        tracing::info!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

        tracing::info!(
            max_connections = config.db_max_connections,
            "Database connected successfully"
        );

        let cache = Self::new(pool);
        cache.migrate().await?;
        Ok(cache)
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> CacheResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl UploadEventCache for PgUploadEventCache {
    #[tracing::instrument(skip(self), fields(
        db.system = "postgresql",
        db.table = "upload_events",
        db.operation = "select"
    ))]
    async fn get(&self, key: &str) -> CacheResult<UploadEvent> {
        let row = sqlx::query_as::<_, UploadEventRow>(
            r#"
            SELECT key, status, reference_url, failure_reason, stage, created_at, updated_at
            FROM upload_events
            WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = ?e, key = %key, "Failed to fetch upload event");
            CacheError::Database(e)
        })?;

        match row {
            Some(row) => row.try_into(),
            None => Ok(UploadEvent::new(key)),
        }
    }

    #[tracing::instrument(skip(self, event), fields(
        db.system = "postgresql",
        db.table = "upload_events",
        db.operation = "upsert",
        status = %event.status
    ))]
    async fn insert(&self, key: &str, event: &UploadEvent) -> CacheResult<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_events (
                key, status, reference_url, failure_reason, stage, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (key) DO UPDATE SET
                status = EXCLUDED.status,
                reference_url = EXCLUDED.reference_url,
                failure_reason = EXCLUDED.failure_reason,
                stage = EXCLUDED.stage,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(event.status.to_string())
        .bind(&event.reference_url)
        .bind(&event.failure_reason)
        .bind(event.stage.map(|s| s.to_string()))
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                error = ?e,
                key = %key,
                status = %event.status,
                "Failed to upsert upload event"
            );
            CacheError::Database(e)
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, stage: Option<&str>) -> UploadEventRow {
        let now = Utc::now();
        UploadEventRow {
            key: "product-image/3/a.png".to_string(),
            status: status.to_string(),
            reference_url: None,
            failure_reason: Some("Invalid content type".to_string()),
            stage: stage.map(String::from),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_conversion() {
        let event = UploadEvent::try_from(row("failed", Some("validated"))).unwrap();
        assert_eq!(event.status, UploadStatus::Failed);
        assert_eq!(event.stage, Some(Stage::Validated));
        assert_eq!(event.failure_reason.as_deref(), Some("Invalid content type"));
    }

    #[test]
    fn test_corrupt_row_is_invalid_record() {
        let err = UploadEvent::try_from(row("pending", None)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidRecord { ref key, .. } if key == "product-image/3/a.png"));

        let err = UploadEvent::try_from(row("failed", Some("somewhere"))).unwrap_err();
        assert!(matches!(err, CacheError::InvalidRecord { .. }));
    }
}
