//! HTTP API layer for memorybot.
//!
//! Every route is JSON over plain request/response; chat replies are
//! collected server-side before they are returned.

mod admin;
mod chat;
mod gallery;
mod search;
mod upload;
#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use memorybot_core::config::Config;
use memorybot_core::context::SessionStore;
use memorybot_core::embedding::Embedder;
use memorybot_core::fusion::QueryFuser;
use memorybot_core::ingest::{Ingestor, sanitize_file_name};
use memorybot_core::provider::Provider;
use memorybot_core::retrieval::{Aggregator, PathRewrite};
use memorybot_core::store::VectorStore;
use memorybot_core::throttle::Throttle;
use memorybot_core::vision::{ImageDescriber, MetadataAnalyzer};
use memorybot_core::warning::{SharedWarnings, new_shared_warnings};

pub use admin::{ingest_handler, reset_collection};
pub use chat::{chat_handler, get_session, reset_session};
pub use gallery::{get_image, list_gallery};
pub use search::search_handler;
pub use upload::upload_handler;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Structured API error response.
#[derive(Serialize, Deserialize, Debug)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Shared application state.
pub struct AppState<P> {
    pub provider: P,
    pub config: Config,
    pub embedder: Arc<dyn Embedder>,
    pub store: Arc<dyn VectorStore>,
    pub aggregator: Aggregator,
    pub fuser: QueryFuser,
    pub ingestor: Ingestor,
    pub sessions: SessionStore,
    pub warnings: SharedWarnings,
}

impl<P: Provider> AppState<P> {
    pub fn new(
        config: Config,
        provider: P,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        describer: Arc<dyn ImageDescriber>,
        analyzer: Arc<dyn MetadataAnalyzer>,
    ) -> Self {
        let rewrite = PathRewrite::new(
            config.paths.storage_root.clone(),
            config.paths.serving_root.clone(),
        );
        let throttle = Arc::new(Throttle::new(Duration::from_millis(
            config.ingest.min_interval_ms,
        )));
        Self {
            aggregator: Aggregator::new(store.clone(), rewrite),
            fuser: QueryFuser::new(embedder.clone(), store.clone())
                .with_candidate_multiplier(config.search.candidate_multiplier),
            ingestor: Ingestor::new(
                store.clone(),
                embedder.clone(),
                describer,
                analyzer,
                throttle,
                &config.ingest,
            ),
            sessions: SessionStore::new(),
            warnings: new_shared_warnings(),
            provider,
            config,
            embedder,
            store,
        }
    }

    /// Resolve an image name from a request to a file under `images_dir`.
    pub(crate) fn resolve_image(
        &self,
        name: &str,
    ) -> Result<PathBuf, (StatusCode, Json<ApiError>)> {
        let file_name = sanitize_file_name(name)
            .ok_or_else(|| bad_request_error(format!("invalid image name '{name}'")))?;
        let path = PathBuf::from(&self.config.paths.images_dir).join(file_name);
        if !path.is_file() {
            return Err(not_found_error(format!("image '{name}' not found")));
        }
        Ok(path)
    }
}

/// Build the API router. Static files are added by the caller.
pub fn router<P: Provider + 'static>(state: Arc<AppState<P>>) -> Router {
    Router::new()
        .route("/api/gallery", get(list_gallery::<P>))
        .route("/api/images", get(get_image::<P>))
        .route(
            "/api/upload",
            post(upload_handler::<P>).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/api/search", post(search_handler::<P>))
        .route("/api/chat", post(chat_handler::<P>))
        .route(
            "/api/chat/{id}",
            get(get_session::<P>).delete(reset_session::<P>),
        )
        .route("/api/ingest", post(ingest_handler::<P>))
        .route("/api/collection", delete(reset_collection::<P>))
        .route("/api/warnings", get(get_warnings::<P>))
        .route("/api/health", get(get_health::<P>))
        .with_state(state)
}

// ── Error helpers ───────────────────────────────────────────────────────

pub(crate) fn internal_error(message: String) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiError {
            code: "internal_error".into(),
            message,
        }),
    )
}

pub(crate) fn not_found_error(message: String) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            code: "not_found".into(),
            message,
        }),
    )
}

pub(crate) fn bad_request_error(message: String) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiError {
            code: "bad_request".into(),
            message,
        }),
    )
}

pub(crate) fn external_service_error(message: String) -> (StatusCode, Json<ApiError>) {
    (
        StatusCode::BAD_GATEWAY,
        Json(ApiError {
            code: "external_service_error".into(),
            message,
        }),
    )
}

// ── Warnings endpoint ───────────────────────────────────────────────────

/// `GET /api/warnings`: return current system warnings.
pub async fn get_warnings<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
) -> Json<Vec<memorybot_core::warning::Warning>> {
    let collector = state.warnings.read().unwrap();
    Json(collector.list().to_vec())
}

// ── Health endpoint ─────────────────────────────────────────────────────

/// Response body for `GET /api/health`.
#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub provider_type: String,
    pub model_name: String,
    pub dimensions: usize,
    pub collection: String,
    pub records: usize,
}

/// `GET /api/health`: embedder identity and collection size.
pub async fn get_health<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<ApiError>)> {
    let records = state
        .store
        .count()
        .map_err(|e| internal_error(format!("failed to count records: {e}")))?;
    Ok(Json(HealthResponse {
        provider_type: state.embedder.provider_type().to_string(),
        model_name: state.embedder.model_name().to_string(),
        dimensions: state.embedder.dimensions(),
        collection: state.store.collection().to_string(),
        records,
    }))
}
