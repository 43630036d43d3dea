use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::ContentStore;
use crate::error::Result;
use crate::models::{FoodItem, MediaAnalysis, OperationStatus};

#[derive(Default)]
struct Inner {
    food_items: Vec<FoodItem>,
    // (insertion sequence, record)
    analyses: Vec<(u64, MediaAnalysis)>,
    next_seq: u64,
    statuses: HashMap<String, OperationStatus>,
}

/// Process-local store. One lock acquisition per call keeps every method atomic.
#[derive(Default)]
pub struct MemoryContentStore {
    inner: RwLock<Inner>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of analyses held, history included.
    pub async fn analysis_count(&self) -> usize {
        self.inner.read().await.analyses.len()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn clear_food_items(&self) -> Result<()> {
        self.inner.write().await.food_items.clear();
        Ok(())
    }

    async fn insert_food_item(&self, item: &FoodItem) -> Result<()> {
        self.inner.write().await.food_items.push(item.clone());
        Ok(())
    }

    async fn replace_food_items(&self, items: &[FoodItem]) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.food_items.clear();
        inner.food_items.extend_from_slice(items);
        Ok(())
    }

    async fn list_food_items(&self) -> Result<Vec<FoodItem>> {
        Ok(self.inner.read().await.food_items.clone())
    }

    async fn upsert_analysis(&self, analysis: &MediaAnalysis) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.analyses.retain(|(_, a)| a.id != analysis.id);
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.analyses.push((seq, analysis.clone()));
        Ok(())
    }

    async fn insert_analysis(&self, analysis: &MediaAnalysis) -> Result<()> {
        let mut inner = self.inner.write().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.analyses.push((seq, analysis.clone()));
        Ok(())
    }

    async fn latest_analysis(&self) -> Result<Option<MediaAnalysis>> {
        let inner = self.inner.read().await;
        Ok(inner
            .analyses
            .iter()
            .max_by_key(|(seq, a)| (a.created_at, *seq))
            .map(|(_, a)| a.clone()))
    }

    async fn update_latest_analysis(&self, structured_result: &serde_json::Value) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let latest = inner
            .analyses
            .iter_mut()
            .max_by_key(|(seq, a)| (a.created_at, *seq));
        match latest {
            Some((_, analysis)) => {
                analysis.structured_result = structured_result.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_operation_status(&self, operation_type: &str) -> Result<Option<OperationStatus>> {
        Ok(self.inner.read().await.statuses.get(operation_type).cloned())
    }

    async fn set_operation_status(&self, operation_type: &str, is_done: bool) -> Result<OperationStatus> {
        let status = OperationStatus {
            operation_type: operation_type.to_string(),
            is_done,
            updated_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .statuses
            .insert(operation_type.to_string(), status.clone());
        Ok(status)
    }
}
