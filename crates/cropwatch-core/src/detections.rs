//! Read and update access to the `image_data` detection table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::DbPool;
use crate::types::{
    CategoryTag, CategoryUpdate, DetectionRow, HistoryRecord, Priority, Readings,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait DetectionRepository: Send + Sync {
    /// Rows with `start <= time < end`, newest first.
    async fn detections_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DetectionRow>, RepositoryError>;

    async fn recent_detections(&self, limit: i64) -> Result<Vec<DetectionRow>, RepositoryError>;

    async fn detection(&self, image_id: &str) -> Result<Option<DetectionRow>, RepositoryError>;

    /// Other images from `device_id` taken in the same minute as `time`, oldest first.
    async fn related_detections(
        &self,
        device_id: &str,
        time: DateTime<Utc>,
        exclude_image_id: &str,
    ) -> Result<Vec<DetectionRow>, RepositoryError>;

    async fn readings(&self, image_id: &str) -> Result<Option<Readings>, RepositoryError>;

    /// Stores the capitalized tag. `None` when no row has `image_id`.
    async fn update_category(
        &self,
        image_id: &str,
        category: CategoryTag,
    ) -> Result<Option<CategoryUpdate>, RepositoryError>;

    async fn device_history(&self, device_id: &str) -> Result<Vec<HistoryRecord>, RepositoryError>;

    /// Raw stored priority. Outer `None` when no row has `image_id`.
    async fn priority(&self, image_id: &str) -> Result<Option<Option<String>>, RepositoryError>;

    /// Returns `false` when no row has `image_id`.
    async fn set_priority(&self, image_id: &str, priority: Priority) -> Result<bool, RepositoryError>;

    /// Rows whose priority starts with 1 or 2, newest first.
    async fn tasks(&self) -> Result<Vec<DetectionRow>, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;

    async fn count(&self) -> Result<i64, RepositoryError>;
}

const DETECTION_COLUMNS: &str = "image_id, image_url, time, device_id, device_name, \
     temperature, humidity, category_tag, ai_analysis, priority";

#[derive(Clone)]
pub struct PgDetectionRepository {
    pool: DbPool,
}

impl PgDetectionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DetectionRepository for PgDetectionRepository {
    async fn detections_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DetectionRow>, RepositoryError> {
        let sql = format!(
            "SELECT {DETECTION_COLUMNS} FROM image_data \
             WHERE time >= $1 AND time < $2 \
             ORDER BY time DESC"
        );
        let rows = sqlx::query_as::<_, DetectionRow>(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn recent_detections(&self, limit: i64) -> Result<Vec<DetectionRow>, RepositoryError> {
        let sql = format!(
            "SELECT {DETECTION_COLUMNS} FROM image_data ORDER BY time DESC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, DetectionRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn detection(&self, image_id: &str) -> Result<Option<DetectionRow>, RepositoryError> {
        let sql = format!("SELECT {DETECTION_COLUMNS} FROM image_data WHERE image_id = $1");
        let row = sqlx::query_as::<_, DetectionRow>(&sql)
            .bind(image_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn related_detections(
        &self,
        device_id: &str,
        time: DateTime<Utc>,
        exclude_image_id: &str,
    ) -> Result<Vec<DetectionRow>, RepositoryError> {
        let sql = format!(
            "SELECT {DETECTION_COLUMNS} FROM image_data \
             WHERE device_id = $1 \
               AND date_trunc('minute', time) = date_trunc('minute', $2::timestamptz) \
               AND image_id <> $3 \
             ORDER BY time ASC"
        );
        let rows = sqlx::query_as::<_, DetectionRow>(&sql)
            .bind(device_id)
            .bind(time)
            .bind(exclude_image_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn readings(&self, image_id: &str) -> Result<Option<Readings>, RepositoryError> {
        let row = sqlx::query_as::<_, Readings>(
            "SELECT temperature, humidity, ai_analysis FROM image_data WHERE image_id = $1",
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn update_category(
        &self,
        image_id: &str,
        category: CategoryTag,
    ) -> Result<Option<CategoryUpdate>, RepositoryError> {
        let row = sqlx::query_as::<_, CategoryUpdate>(
            r#"
            UPDATE image_data
            SET category_tag = $2
            WHERE image_id = $1
            RETURNING image_id, category_tag, time
            "#,
        )
        .bind(image_id)
        .bind(category.stored())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn device_history(&self, device_id: &str) -> Result<Vec<HistoryRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, HistoryRecord>(
            r#"
            SELECT image_id, image_url, time, category_tag, device_id
            FROM image_data
            WHERE device_id = $1
            ORDER BY time DESC
            "#,
        )
        .bind(device_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn priority(&self, image_id: &str) -> Result<Option<Option<String>>, RepositoryError> {
        let priority = sqlx::query_scalar::<_, Option<String>>(
            "SELECT priority FROM image_data WHERE image_id = $1",
        )
        .bind(image_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(priority)
    }

    async fn set_priority(&self, image_id: &str, priority: Priority) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE image_data SET priority = $1 WHERE image_id = $2")
            .bind(priority.to_string())
            .bind(image_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn tasks(&self) -> Result<Vec<DetectionRow>, RepositoryError> {
        let sql = format!(
            "SELECT {DETECTION_COLUMNS} FROM image_data \
             WHERE priority LIKE '1%' OR priority LIKE '2%' \
             ORDER BY time DESC"
        );
        let rows = sqlx::query_as::<_, DetectionRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn count(&self) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM image_data")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
