use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::browser::PageScanner;
use crate::extract::{self, ExtractionError};
use crate::models::{ErrorResponse, ExtractRequest, ExtractResponse, HealthResponse};

#[derive(Clone)]
pub struct AppState {
    pub scanner: Arc<dyn PageScanner>,
    pub static_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/extract-images", post(extract_images_endpoint))
        .with_state(state)
}

async fn index(State(state): State<AppState>) -> Response {
    let path = state.static_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(body) => Html(body).into_response(),
        Err(e) => {
            tracing::warn!("cannot serve {}: {}", path.display(), e);
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        browser: state.scanner.is_running(),
    })
}

async fn extract_images_endpoint(
    State(state): State<AppState>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Invalid request body",
                rejection.body_text(),
            )
        }
    };

    let Some(url) = req.target_url() else {
        return into_error_response(ExtractionError::MissingUrl);
    };

    tracing::info!("extracting images from {}", url);
    match extract::extract_images(state.scanner.as_ref(), url).await {
        Ok(images) => {
            tracing::info!("found {} images on {}", images.len(), url);
            let response = ExtractResponse {
                success: true,
                count: images.len(),
                images,
                url: url.to_string(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => {
            tracing::warn!("extraction failed for {}: {}", url, e);
            into_error_response(e)
        }
    }
}

fn into_error_response(e: ExtractionError) -> Response {
    let (status, error) = match &e {
        ExtractionError::MissingUrl => (StatusCode::BAD_REQUEST, "URL is required"),
        ExtractionError::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "Invalid URL"),
        ExtractionError::Launch(_)
        | ExtractionError::Browser(_)
        | ExtractionError::Navigation(_)
        | ExtractionError::Timeout(_)
        | ExtractionError::Script(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to extract images")
        }
    };
    error_response(status, error, e.to_string())
}

fn error_response(status: StatusCode, error: &'static str, message: String) -> Response {
    (status, Json(ErrorResponse { error, message })).into_response()
}
