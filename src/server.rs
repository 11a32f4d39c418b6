//! HTTP search server.
//!
//! Exposes hybrid retrieval as a small JSON API for dashboards and scripts.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Multimodal search (`text`, `image_base64`, `limit`) |
//! | `GET`  | `/health` | Health check (version, record count) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query needs text or an image" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser dashboard
//! can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use trove_core::retrieval::{Retriever, SearchQuery, SearchResponse};
use trove_core::store::VectorStore;

use crate::config::Config;
use crate::ingest::IngestPorts;
use crate::search::build_retriever;

#[derive(Clone)]
struct AppState {
    retriever: Arc<Retriever>,
    store: Arc<dyn VectorStore>,
    default_limit: usize,
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ports = IngestPorts::from_config(config).await?;
    let app = router(config, &ports);
    let bind_addr = config.server.bind.clone();

    println!("search server listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(config: &Config, ports: &IngestPorts) -> Router {
    let state = AppState {
        retriever: Arc::new(build_retriever(config, ports)),
        store: ports.store.clone(),
        default_limit: config.retrieval.final_limit,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    records: usize,
}

async fn handle_health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let records = state
        .store
        .count()
        .await
        .map_err(|e| internal(e.to_string()))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        records,
    }))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    #[serde(default)]
    text: Option<String>,
    /// Raw image bytes, base64 (standard alphabet).
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let text = req.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());

    // The temp file must outlive the search.
    let image_file = match req.image_base64.as_deref().filter(|b| !b.trim().is_empty()) {
        Some(encoded) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| bad_request(format!("image_base64 is not valid base64: {}", e)))?;
            Some(write_temp_image(&bytes).map_err(|e| internal(e.to_string()))?)
        }
        None => None,
    };

    if text.is_none() && image_file.is_none() {
        return Err(bad_request("query needs text or an image"));
    }

    let query = SearchQuery {
        image: image_file.as_ref().map(|f| f.path().to_path_buf()),
        text,
    };
    let limit = req.limit.unwrap_or(state.default_limit).clamp(1, 100);
    let response = state
        .retriever
        .search(&query, limit)
        .await
        .map_err(|e| internal(format!("search failed: {:#}", e)))?;
    Ok(Json(response))
}

fn write_temp_image(bytes: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("trove-query-")
        .suffix(image_suffix(bytes))
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}

/// File extension from the image's magic bytes; decoders pick the format
/// from it.
fn image_suffix(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        ".png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        ".jpg"
    } else if bytes.starts_with(b"GIF8") {
        ".gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ".webp"
    } else if bytes.starts_with(b"BM") {
        ".bmp"
    } else {
        ".img"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_suffix_from_magic() {
        assert_eq!(image_suffix(b"\x89PNG\r\n\x1a\n...."), ".png");
        assert_eq!(image_suffix(&[0xFF, 0xD8, 0xFF, 0xE0]), ".jpg");
        assert_eq!(image_suffix(b"RIFF\0\0\0\0WEBPVP8 "), ".webp");
        assert_eq!(image_suffix(b"hello"), ".img");
    }

    #[test]
    fn test_temp_image_keeps_bytes() {
        let file = write_temp_image(&[0xFF, 0xD8, 1, 2, 3]).unwrap();
        assert!(file.path().to_string_lossy().ends_with(".jpg"));
        assert_eq!(std::fs::read(file.path()).unwrap(), vec![0xFF, 0xD8, 1, 2, 3]);
    }

    #[test]
    fn test_error_body_shape() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: "bad_request".into(),
                message: "query needs text or an image".into(),
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["code"], "bad_request");
    }
}
