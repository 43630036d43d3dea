use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

/// `{data, meta}` envelope shared by every endpoint.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub meta: ResponseMeta,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    pub status: String,
    pub status_code: u16,
    pub timestamp: String,
    pub message: Option<String>,
    /// Stable error code, `None` on success.
    pub code: Option<String>,
}

impl ResponseMeta {
    fn ok() -> Self {
        Self::new("success", StatusCode::OK, None, None)
    }

    fn failure(status: StatusCode, code: &str, message: String) -> Self {
        Self::new("error", status, Some(message), Some(code.to_string()))
    }

    fn new(label: &str, status: StatusCode, message: Option<String>, code: Option<String>) -> Self {
        Self {
            status: label.to_string(),
            status_code: status.as_u16(),
            timestamp: Utc::now().to_rfc3339(),
            message,
            code,
        }
    }
}

pub type Envelope<T> = (StatusCode, Json<ApiResponse<T>>);

pub fn success<T: Serialize>(data: T) -> Envelope<T> {
    (
        StatusCode::OK,
        Json(ApiResponse {
            data: Some(data),
            meta: ResponseMeta::ok(),
        }),
    )
}

pub fn error<T>(status: StatusCode, code: &str, message: String) -> Envelope<T> {
    (
        status,
        Json(ApiResponse {
            data: None,
            meta: ResponseMeta::failure(status, code, message),
        }),
    )
}
