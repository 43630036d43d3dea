use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{error, info};
use uuid::Uuid;

use crate::config::AnalysisKeyPolicy;
use crate::error::{AppError, Result};
use crate::extraction::{ExtractionClient, MEAL_PLAN_PROMPT};
use crate::flight::SingleFlight;
use crate::models::{MealPlan, MediaAnalysis};
use crate::status::{StatusTracker, VIDEO_ANALYSIS};
use crate::store::ContentStore;

/// An uploaded media file.
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Hex SHA-256 of the upload, used as its content address.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Video → meal plan pipeline with content-addressed persistence.
pub struct MediaAnalyzer {
    flight: SingleFlight,
    job: AnalysisJob,
    status: StatusTracker,
}

/// Everything one analysis needs, owned so it can run on its own task.
#[derive(Clone)]
struct AnalysisJob {
    extraction: ExtractionClient,
    store: Arc<dyn ContentStore>,
    key_policy: AnalysisKeyPolicy,
}

impl MediaAnalyzer {
    pub fn new(
        extraction: ExtractionClient,
        store: Arc<dyn ContentStore>,
        key_policy: AnalysisKeyPolicy,
    ) -> Self {
        Self {
            flight: SingleFlight::new(),
            status: StatusTracker::new(Arc::clone(&store)),
            job: AnalysisJob {
                extraction,
                store,
                key_policy,
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_busy()
    }

    /// Analyze `upload` and store the result as the latest analysis.
    ///
    /// The `video_analysis` status is `pending` while this runs and `done`
    /// afterwards, panics included. The work runs on a spawned task that owns
    /// the gate, so it still finishes and reports `done` if the caller stops
    /// waiting.
    pub async fn analyze(&self, upload: MediaUpload) -> Result<MealPlan> {
        if !self.job.extraction.is_configured() {
            return Err(AppError::MissingCredential);
        }
        if !upload.content_type.starts_with("video/") {
            return Err(AppError::InvalidMediaType(format!(
                "expected a video/* upload, got '{}'",
                upload.content_type
            )));
        }

        let guard = self
            .flight
            .try_acquire()
            .ok_or_else(|| AppError::AlreadyRunning(VIDEO_ANALYSIS.to_string()))?;

        let job = self.job.clone();
        let status = self.status.clone();
        let handle = tokio::spawn(async move {
            status.mark_pending(VIDEO_ANALYSIS).await?;

            let result = match tokio::spawn(job.run(upload)).await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "media analysis task failed");
                    Err(AppError::from(e))
                }
            };

            let finished = status.mark_done(VIDEO_ANALYSIS).await;
            drop(guard);

            match (result, finished) {
                (Ok(plan), Ok(())) => Ok(plan),
                (Ok(_), Err(e)) => Err(e),
                (Err(e), finished) => {
                    if let Err(status_err) = finished {
                        error!(error = %status_err, "failed to record analysis completion");
                    }
                    Err(e)
                }
            }
        });

        handle.await?
    }

    /// The most recent analysis as a meal plan.
    pub async fn latest(&self) -> Result<MealPlan> {
        let analysis = self
            .job
            .store
            .latest_analysis()
            .await?
            .ok_or_else(|| AppError::NotFound("No analysis found".to_string()))?;

        serde_json::from_value(analysis.structured_result)
            .map_err(|e| AppError::ParseError(format!("Stored meal plan is malformed: {}", e)))
    }

    /// Overwrite the meal plan of the most recent analysis.
    pub async fn update_latest(&self, plan: &MealPlan) -> Result<()> {
        let value = serde_json::to_value(plan)?;
        if self.job.store.update_latest_analysis(&value).await? {
            info!("latest meal plan updated");
            Ok(())
        } else {
            Err(AppError::NotFound("No meal plan found to update".to_string()))
        }
    }
}

impl AnalysisJob {
    async fn run(self, upload: MediaUpload) -> Result<MealPlan> {
        let hash = content_hash(&upload.data);
        info!(
            filename = %upload.filename,
            content_type = %upload.content_type,
            bytes = upload.data.len(),
            hash = %hash,
            "analyzing media"
        );

        let plan = self
            .extraction
            .analyze_media(upload.data, &upload.content_type)
            .await?;

        let id = match self.key_policy {
            AnalysisKeyPolicy::ContentHash => hash,
            AnalysisKeyPolicy::Surrogate => Uuid::new_v4().to_string(),
        };
        let record = MediaAnalysis {
            id,
            filename: upload.filename,
            content_type: upload.content_type,
            prompt_used: MEAL_PLAN_PROMPT.to_string(),
            structured_result: serde_json::to_value(&plan)?,
            created_at: Utc::now(),
        };

        match self.key_policy {
            AnalysisKeyPolicy::ContentHash => self.store.upsert_analysis(&record).await?,
            AnalysisKeyPolicy::Surrogate => self.store.insert_analysis(&record).await?,
        }
        info!(id = %record.id, recipes = plan.recipes.len(), "analysis stored");

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Extractor, GenerationRequest};
    use crate::store::MemoryContentStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::Notify;

    fn plan_json(dish: &str) -> Value {
        json!({
            "shopping_list": {"items": [{"name": "onion", "quantity": 2.0, "unit": "pieces"}]},
            "recipes": [{"name": dish, "ingredients": [], "instructions": ["Cook"]}],
            "days": [{"day": "Monday", "meal": dish, "recipe_refs": [dish]}]
        })
    }

    /// Names the dish after the first byte of the media so different uploads differ.
    struct ByteChef;

    #[async_trait]
    impl Extractor for ByteChef {
        async fn generate(&self, request: &GenerationRequest) -> Result<Value> {
            let first = request.media.as_ref().and_then(|m| m.data.first().copied()).unwrap_or(0);
            Ok(plan_json(&format!("dish-{first}")))
        }
    }

    struct BrokenChef;

    #[async_trait]
    impl Extractor for BrokenChef {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Value> {
            Err(AppError::LlmError("500 from vendor".into()))
        }
    }

    /// Blocks inside the vendor call until released.
    struct SlowChef {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Extractor for SlowChef {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Value> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(plan_json("slow"))
        }
    }

    struct PanicChef;

    #[async_trait]
    impl Extractor for PanicChef {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Value> {
            panic!("vendor client bug");
        }
    }

    async fn wait_until_idle(analyzer: &MediaAnalyzer) {
        for _ in 0..200 {
            if !analyzer.is_running() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("analysis never finished");
    }

    fn upload(data: &[u8]) -> MediaUpload {
        MediaUpload {
            filename: "fridge.mp4".to_string(),
            content_type: "video/mp4".to_string(),
            data: data.to_vec(),
        }
    }

    fn analyzer(
        extractor: Option<Arc<dyn Extractor>>,
        store: Arc<MemoryContentStore>,
        policy: AnalysisKeyPolicy,
    ) -> MediaAnalyzer {
        MediaAnalyzer::new(ExtractionClient::new(extractor), store, policy)
    }

    #[test]
    fn content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn same_bytes_keep_a_single_record() {
        let store = Arc::new(MemoryContentStore::new());
        let analyzer = analyzer(Some(Arc::new(ByteChef)), store.clone(), AnalysisKeyPolicy::ContentHash);

        analyzer.analyze(upload(&[1, 2, 3])).await.unwrap();
        analyzer.analyze(upload(&[1, 2, 3])).await.unwrap();

        assert_eq!(store.analysis_count().await, 1);
        let latest = store.latest_analysis().await.unwrap().unwrap();
        assert_eq!(latest.id, content_hash(&[1, 2, 3]));
        assert_eq!(latest.prompt_used, MEAL_PLAN_PROMPT);
    }

    #[tokio::test]
    async fn different_bytes_get_their_own_hash() {
        let store = Arc::new(MemoryContentStore::new());
        let analyzer = analyzer(Some(Arc::new(ByteChef)), store.clone(), AnalysisKeyPolicy::ContentHash);

        analyzer.analyze(upload(&[1])).await.unwrap();
        analyzer.analyze(upload(&[2])).await.unwrap();

        assert_eq!(store.analysis_count().await, 2);
        let latest = analyzer.latest().await.unwrap();
        assert_eq!(latest.recipes[0].name, "dish-2");
    }

    #[tokio::test]
    async fn surrogate_policy_keeps_history() {
        let store = Arc::new(MemoryContentStore::new());
        let analyzer = analyzer(Some(Arc::new(ByteChef)), store.clone(), AnalysisKeyPolicy::Surrogate);

        analyzer.analyze(upload(&[7])).await.unwrap();
        analyzer.analyze(upload(&[7])).await.unwrap();

        assert_eq!(store.analysis_count().await, 2);
    }

    #[tokio::test]
    async fn missing_credential_and_bad_media_are_rejected() {
        let store = Arc::new(MemoryContentStore::new());

        let err = analyzer(None, store.clone(), AnalysisKeyPolicy::ContentHash)
            .analyze(upload(&[1]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingCredential));

        let mut image = upload(&[1]);
        image.content_type = "image/png".to_string();
        let err = analyzer(Some(Arc::new(ByteChef)), store, AnalysisKeyPolicy::ContentHash)
            .analyze(image)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidMediaType(_)));
    }

    #[tokio::test]
    async fn vendor_failure_still_marks_done() {
        let store = Arc::new(MemoryContentStore::new());
        let tracker = StatusTracker::new(store.clone());
        let analyzer = analyzer(Some(Arc::new(BrokenChef)), store.clone(), AnalysisKeyPolicy::ContentHash);

        let err = analyzer.analyze(upload(&[1])).await.unwrap_err();

        assert!(matches!(err, AppError::LlmError(_)));
        assert!(tracker.is_done(VIDEO_ANALYSIS).await.unwrap());
        assert!(!analyzer.is_running());
        assert_eq!(store.analysis_count().await, 0);
    }

    #[tokio::test]
    async fn status_is_pending_while_running_and_second_upload_is_rejected() {
        let store = Arc::new(MemoryContentStore::new());
        let tracker = StatusTracker::new(store.clone());
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let chef = SlowChef { entered: entered.clone(), release: release.clone() };
        let analyzer = Arc::new(analyzer(Some(Arc::new(chef)), store, AnalysisKeyPolicy::ContentHash));

        let running = tokio::spawn({
            let analyzer = Arc::clone(&analyzer);
            async move { analyzer.analyze(upload(&[1])).await }
        });
        entered.notified().await;

        assert!(!tracker.is_done(VIDEO_ANALYSIS).await.unwrap());
        let err = analyzer.analyze(upload(&[2])).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyRunning(_)));

        release.notify_one();
        running.await.unwrap().unwrap();
        assert!(tracker.is_done(VIDEO_ANALYSIS).await.unwrap());
    }

    #[tokio::test]
    async fn latest_and_update_need_history() {
        let store = Arc::new(MemoryContentStore::new());
        let analyzer = analyzer(Some(Arc::new(ByteChef)), store, AnalysisKeyPolicy::ContentHash);

        assert!(matches!(analyzer.latest().await.unwrap_err(), AppError::NotFound(_)));

        let plan: MealPlan = serde_json::from_value(plan_json("soup")).unwrap();
        assert!(matches!(analyzer.update_latest(&plan).await.unwrap_err(), AppError::NotFound(_)));

        analyzer.analyze(upload(&[3])).await.unwrap();
        analyzer.update_latest(&plan).await.unwrap();
        assert_eq!(analyzer.latest().await.unwrap(), plan);
    }

    #[tokio::test]
    async fn abandoned_caller_still_sees_analysis_finish() {
        let store = Arc::new(MemoryContentStore::new());
        let tracker = StatusTracker::new(store.clone());
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let chef = SlowChef { entered: entered.clone(), release: release.clone() };
        let analyzer = Arc::new(analyzer(Some(Arc::new(chef)), store.clone(), AnalysisKeyPolicy::ContentHash));

        let caller = tokio::spawn({
            let analyzer = Arc::clone(&analyzer);
            async move { analyzer.analyze(upload(&[4])).await }
        });
        entered.notified().await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        assert!(analyzer.is_running());
        assert!(!tracker.is_done(VIDEO_ANALYSIS).await.unwrap());

        release.notify_one();
        wait_until_idle(&analyzer).await;

        assert!(tracker.is_done(VIDEO_ANALYSIS).await.unwrap());
        assert_eq!(store.analysis_count().await, 1);
    }

    #[tokio::test]
    async fn panicking_vendor_reports_failure_and_marks_done() {
        let store = Arc::new(MemoryContentStore::new());
        let tracker = StatusTracker::new(store.clone());
        let analyzer = analyzer(Some(Arc::new(PanicChef)), store, AnalysisKeyPolicy::ContentHash);

        let err = analyzer.analyze(upload(&[5])).await.unwrap_err();

        assert!(matches!(err, AppError::TaskFailed(_)));
        assert!(tracker.is_done(VIDEO_ANALYSIS).await.unwrap());
        assert!(!analyzer.is_running());
    }
}
