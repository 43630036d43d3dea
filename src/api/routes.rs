use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::analysis::MediaUpload;
use crate::api::models::{
    CrawlResultsResponse, CrawlStatusResponse, MessageResponse, OperationStatusResponse,
    UpdateMealPlanRequest,
};
use crate::api::response;
use crate::crawler::CrawlStart;
use crate::error::{AppError, Result};
use crate::status::{OperationState, VIDEO_ANALYSIS};
use crate::AppState;

pub fn create_router(app_state: AppState) -> Router {
    let upload_limit = app_state.config.max_upload_bytes;

    let crawler = Router::new()
        .route("/scrape", get(start_crawl_handler).post(start_crawl_handler))
        .route("/status", get(crawl_status_handler))
        .route("/results", get(crawl_results_handler));

    let api = Router::new()
        .route(
            "/analyze-video",
            post(analyze_video_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/analysis", get(latest_analysis_handler))
        .route("/update-meal-plan", post(update_meal_plan_handler))
        .route("/is-done", get(video_status_handler))
        .route("/set-status/:status", post(set_video_status_handler))
        .route("/operations/:operation_type", get(operation_status_handler))
        .route("/operations/:operation_type/:status", put(set_operation_status_handler));

    Router::new()
        .nest("/crawler", crawler)
        .nest("/api", api)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(app_state)
}

async fn start_crawl_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let message = match state.crawler.start_crawl().await? {
        // The handle is dropped; the run continues in the background.
        CrawlStart::Started(_) => "started",
        CrawlStart::AlreadyRunning => "already running",
    };
    Ok(response::success(MessageResponse {
        message: message.to_string(),
    }))
}

async fn crawl_status_handler(State(state): State<AppState>) -> impl IntoResponse {
    response::success(CrawlStatusResponse {
        is_running: state.crawler.is_running(),
    })
}

async fn crawl_results_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let items = state.store.list_food_items().await?;
    Ok(response::success(CrawlResultsResponse { items }))
}

async fn analyze_video_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        if field.name() != Some("video") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;

        upload = Some(MediaUpload {
            filename,
            content_type,
            data: data.to_vec(),
        });
        break;
    }

    let upload = upload.ok_or_else(|| AppError::BadRequest("Missing 'video' field".to_string()))?;
    info!(filename = %upload.filename, "received media upload");

    let plan = state.analyzer.analyze(upload).await?;
    Ok(response::success(plan))
}

async fn latest_analysis_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let plan = state.analyzer.latest().await?;
    Ok(response::success(plan))
}

async fn update_meal_plan_handler(
    State(state): State<AppState>,
    Json(req): Json<UpdateMealPlanRequest>,
) -> Result<impl IntoResponse> {
    state.analyzer.update_latest(&req.meal_plan).await?;
    Ok(response::success(MessageResponse {
        message: "Meal plan updated successfully".to_string(),
    }))
}

async fn video_status_handler(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let status = operation_status(&state, VIDEO_ANALYSIS).await?;
    Ok(response::success(status))
}

async fn operation_status_handler(
    State(state): State<AppState>,
    Path(operation_type): Path<String>,
) -> Result<impl IntoResponse> {
    let status = operation_status(&state, &operation_type).await?;
    Ok(response::success(status))
}

async fn set_video_status_handler(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> Result<impl IntoResponse> {
    let status = set_operation_status(&state, VIDEO_ANALYSIS, &status).await?;
    Ok(response::success(status))
}

async fn set_operation_status_handler(
    State(state): State<AppState>,
    Path((operation_type, status)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let status = set_operation_status(&state, &operation_type, &status).await?;
    Ok(response::success(status))
}

async fn operation_status(state: &AppState, operation_type: &str) -> Result<OperationStatusResponse> {
    let is_done = state.status.is_done(operation_type).await?;
    Ok(OperationStatusResponse {
        operation_type: operation_type.to_string(),
        is_done,
    })
}

async fn set_operation_status(
    state: &AppState,
    operation_type: &str,
    status: &str,
) -> Result<OperationStatusResponse> {
    let state_value = match status {
        "true" => OperationState::Done,
        "false" => OperationState::Pending,
        _ => {
            return Err(AppError::BadRequest(
                "Status must be 'true' or 'false'".to_string(),
            ));
        }
    };

    info!(operation = operation_type, status = %state_value, "operation status overridden");
    state.status.set(operation_type, state_value).await?;
    Ok(OperationStatusResponse {
        operation_type: operation_type.to_string(),
        is_done: state_value.is_done(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalysisKeyPolicy, Config, FetchConfig, GeminiConfig, StoreConfig};
    use crate::llm::{Extractor, GenerationRequest};
    use crate::scraper::PageFetcher;
    use crate::store::MemoryContentStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::Semaphore;
    use tower::ServiceExt;

    struct GatedSite {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl PageFetcher for GatedSite {
        async fn fetch(&self, _url: &str) -> Result<String> {
            self.gate.acquire().await.unwrap().forget();
            Ok("<body></body>".to_string())
        }
    }

    struct FixedPlan;

    #[async_trait]
    impl Extractor for FixedPlan {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Value> {
            Ok(json!({
                "shopping_list": {"items": []},
                "recipes": [{"name": "Omelette", "ingredients": [], "instructions": ["Whisk eggs"]}],
                "days": [{"day": "Monday", "meal": "Omelette", "recipe_refs": ["Omelette"]}]
            }))
        }
    }

    fn test_config() -> Config {
        Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            gemini: GeminiConfig::default(),
            store: StoreConfig::Memory,
            fetch: FetchConfig {
                delay: std::time::Duration::ZERO,
                ..FetchConfig::default()
            },
            sites: vec!["https://a.example/".to_string()],
            key_policy: AnalysisKeyPolicy::ContentHash,
            max_upload_bytes: 1024 * 1024,
        }
    }

    fn test_app(extractor: Option<Arc<dyn Extractor>>) -> (Router, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let state = AppState::new(
            test_config(),
            Arc::new(MemoryContentStore::new()),
            Arc::new(GatedSite { gate: gate.clone() }),
            extractor,
        );
        (create_router(state), gate)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str) -> Request<Body> {
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
    }

    fn video_upload(content_type: &str, bytes: &str) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"fridge.mp4\"\r\n\
             Content-Type: {content_type}\r\n\r\n{bytes}\r\n--{boundary}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/api/analyze-video")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn defaults_before_anything_ran() {
        let (app, _gate) = test_app(None);

        let (status, json) = send(&app, get_req("/api/is-done")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["is_done"], false);

        let (_, json) = send(&app, get_req("/crawler/status")).await;
        assert_eq!(json["data"]["is_running"], false);

        let (_, json) = send(&app, get_req("/crawler/results")).await;
        assert_eq!(json["data"]["items"], json!([]));

        let (status, json) = send(&app, get_req("/api/analysis")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["meta"]["code"], "not_found");
    }

    #[tokio::test]
    async fn set_status_override_round_trips() {
        let (app, _gate) = test_app(None);

        let (status, _) = send(&app, post_req("/api/set-status/true")).await;
        assert_eq!(status, StatusCode::OK);
        let (_, json) = send(&app, get_req("/api/is-done")).await;
        assert_eq!(json["data"]["is_done"], true);

        let (status, json) = send(&app, post_req("/api/set-status/maybe")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["meta"]["code"], "bad_request");

        let request = Request::builder()
            .method("PUT")
            .uri("/api/operations/food_crawl/true")
            .body(Body::empty())
            .unwrap();
        send(&app, request).await;
        let (_, json) = send(&app, get_req("/api/operations/food_crawl")).await;
        assert_eq!(json["data"]["is_done"], true);
    }

    #[tokio::test]
    async fn second_scrape_request_reports_already_running() {
        let (app, gate) = test_app(None);

        let (_, first) = send(&app, get_req("/crawler/scrape")).await;
        let (_, second) = send(&app, post_req("/crawler/scrape")).await;
        assert_eq!(first["data"]["message"], "started");
        assert_eq!(second["data"]["message"], "already running");

        let (_, json) = send(&app, get_req("/crawler/status")).await;
        assert_eq!(json["data"]["is_running"], true);
        gate.add_permits(1);
    }

    #[tokio::test]
    async fn analyze_without_credential_is_reported() {
        let (app, _gate) = test_app(None);

        let (status, json) = send(&app, video_upload("video/mp4", "fake-bytes")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["meta"]["code"], "missing_credential");
    }

    #[tokio::test]
    async fn analyze_rejects_non_video_uploads() {
        let (app, _gate) = test_app(Some(Arc::new(FixedPlan)));

        let (status, json) = send(&app, video_upload("image/png", "fake-bytes")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["meta"]["code"], "invalid_media_type");
    }

    #[tokio::test]
    async fn analyze_then_fetch_latest_and_update() {
        let (app, _gate) = test_app(Some(Arc::new(FixedPlan)));

        let (status, json) = send(&app, video_upload("video/mp4", "fake-bytes")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["recipes"][0]["name"], "Omelette");

        let (_, json) = send(&app, get_req("/api/is-done")).await;
        assert_eq!(json["data"]["is_done"], true);

        let update = json!({"meal_plan": {
            "shopping_list": {"items": []},
            "recipes": [{"name": "Pancakes", "ingredients": [], "instructions": ["Fry"]}],
            "days": []
        }});
        let request = Request::builder()
            .method("POST")
            .uri("/api/update-meal-plan")
            .header("content-type", "application/json")
            .body(Body::from(update.to_string()))
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        let (_, json) = send(&app, get_req("/api/analysis")).await;
        assert_eq!(json["data"]["recipes"][0]["name"], "Pancakes");
    }
}
