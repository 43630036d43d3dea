use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FoodItem, MediaAnalysis, OperationStatus};

pub mod memory;
pub mod postgres;

pub use memory::MemoryContentStore;
pub use postgres::PgContentStore;

/// Persistence for crawl results, media analyses and operation status rows.
///
/// Every method is atomic on its own; multi-statement writes run inside one
/// transaction so readers never see them half done.
#[async_trait]
pub trait ContentStore: Send + Sync {
    // Food items (replace-on-crawl)
    async fn clear_food_items(&self) -> Result<()>;
    async fn insert_food_item(&self, item: &FoodItem) -> Result<()>;
    /// Clear the collection and insert `items` as one unit.
    async fn replace_food_items(&self, items: &[FoodItem]) -> Result<()>;
    /// All items in insertion order.
    async fn list_food_items(&self) -> Result<Vec<FoodItem>>;

    // Media analyses
    /// Delete any analysis stored under `analysis.id`, then insert `analysis`.
    async fn upsert_analysis(&self, analysis: &MediaAnalysis) -> Result<()>;
    /// Insert without touching older rows.
    async fn insert_analysis(&self, analysis: &MediaAnalysis) -> Result<()>;
    /// Newest by `created_at`, ties broken by insertion order.
    async fn latest_analysis(&self) -> Result<Option<MediaAnalysis>>;
    /// Replace the structured result of the latest analysis. `false` if there is none.
    async fn update_latest_analysis(&self, structured_result: &serde_json::Value) -> Result<bool>;

    // Operation status
    async fn get_operation_status(&self, operation_type: &str) -> Result<Option<OperationStatus>>;
    async fn set_operation_status(&self, operation_type: &str, is_done: bool) -> Result<OperationStatus>;
}
