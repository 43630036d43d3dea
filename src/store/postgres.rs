use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use super::ContentStore;
use crate::error::Result;
use crate::models::{FoodItem, MediaAnalysis, OperationStatus};

pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn food_item_from_row(r: &PgRow) -> FoodItem {
    FoodItem {
        source_url: r.get("source_url"),
        name: r.get("name"),
        description: r.get("description"),
        price: r.get("price"),
        quantity: r.get("quantity"),
    }
}

fn analysis_from_row(r: &PgRow) -> MediaAnalysis {
    MediaAnalysis {
        id: r.get("id"),
        filename: r.get("filename"),
        content_type: r.get("content_type"),
        prompt_used: r.get("prompt_used"),
        structured_result: r.get("structured_result"),
        created_at: r.get("created_at"),
    }
}

fn status_from_row(r: &PgRow) -> OperationStatus {
    OperationStatus {
        operation_type: r.get("operation_type"),
        is_done: r.get("is_done"),
        updated_at: r.get("updated_at"),
    }
}

const INSERT_FOOD_ITEM: &str = r#"
    INSERT INTO food_items (source_url, name, description, price, quantity)
    VALUES ($1, $2, $3, $4, $5)
"#;

const INSERT_ANALYSIS: &str = r#"
    INSERT INTO media_analyses (id, filename, content_type, prompt_used, structured_result, created_at)
    VALUES ($1, $2, $3, $4, $5, $6)
"#;

#[async_trait]
impl ContentStore for PgContentStore {
    async fn clear_food_items(&self) -> Result<()> {
        sqlx::query("DELETE FROM food_items")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_food_item(&self, item: &FoodItem) -> Result<()> {
        sqlx::query(INSERT_FOOD_ITEM)
            .bind(&item.source_url)
            .bind(&item.name)
            .bind(&item.description)
            .bind(&item.price)
            .bind(&item.quantity)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_food_items(&self, items: &[FoodItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM food_items")
            .execute(&mut *tx)
            .await?;
        for item in items {
            sqlx::query(INSERT_FOOD_ITEM)
                .bind(&item.source_url)
                .bind(&item.name)
                .bind(&item.description)
                .bind(&item.price)
                .bind(&item.quantity)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_food_items(&self) -> Result<Vec<FoodItem>> {
        let rows = sqlx::query(
            r#"
            SELECT source_url, name, description, price, quantity
            FROM food_items
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(food_item_from_row).collect())
    }

    async fn upsert_analysis(&self, analysis: &MediaAnalysis) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM media_analyses WHERE id = $1")
            .bind(&analysis.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(INSERT_ANALYSIS)
            .bind(&analysis.id)
            .bind(&analysis.filename)
            .bind(&analysis.content_type)
            .bind(&analysis.prompt_used)
            .bind(&analysis.structured_result)
            .bind(analysis.created_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_analysis(&self, analysis: &MediaAnalysis) -> Result<()> {
        sqlx::query(INSERT_ANALYSIS)
            .bind(&analysis.id)
            .bind(&analysis.filename)
            .bind(&analysis.content_type)
            .bind(&analysis.prompt_used)
            .bind(&analysis.structured_result)
            .bind(analysis.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn latest_analysis(&self) -> Result<Option<MediaAnalysis>> {
        let row = sqlx::query(
            r#"
            SELECT id, filename, content_type, prompt_used, structured_result, created_at
            FROM media_analyses
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(analysis_from_row))
    }

    async fn update_latest_analysis(&self, structured_result: &serde_json::Value) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE media_analyses
            SET structured_result = $1
            WHERE id = (
                SELECT id FROM media_analyses
                ORDER BY created_at DESC, seq DESC
                LIMIT 1
            )
            "#,
        )
        .bind(structured_result)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_operation_status(&self, operation_type: &str) -> Result<Option<OperationStatus>> {
        let row = sqlx::query(
            r#"
            SELECT operation_type, is_done, updated_at
            FROM operation_status
            WHERE operation_type = $1
            "#,
        )
        .bind(operation_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(status_from_row))
    }

    async fn set_operation_status(&self, operation_type: &str, is_done: bool) -> Result<OperationStatus> {
        let row = sqlx::query(
            r#"
            INSERT INTO operation_status (operation_type, is_done, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (operation_type)
            DO UPDATE SET is_done = EXCLUDED.is_done, updated_at = NOW()
            RETURNING operation_type, is_done, updated_at
            "#,
        )
        .bind(operation_type)
        .bind(is_done)
        .fetch_one(&self.pool)
        .await?;

        Ok(status_from_row(&row))
    }
}
