use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use memorybot_core::ingest::{IngestFailure, IngestReport, has_image_extension, sanitize_file_name};
use memorybot_core::provider::Provider;

use super::{ApiError, AppState, bad_request_error, internal_error};

#[derive(Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub saved: Vec<String>,
    pub ingested: IngestReport,
}

/// `POST /api/upload`: save multipart `files` into `images_dir`.
///
/// Saved files are ingested right away when `ingest.on_upload` is set.
/// Fields with an unsupported extension or unusable name are rejected.
pub async fn upload_handler<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, Json<ApiError>)> {
    let images_dir = PathBuf::from(&state.config.paths.images_dir);
    tokio::fs::create_dir_all(&images_dir)
        .await
        .map_err(|e| internal_error(format!("failed to create '{}': {e}", images_dir.display())))?;

    let mut saved: Vec<PathBuf> = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request_error(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("files") {
            continue;
        }
        let original = field.file_name().unwrap_or_default().to_string();
        let name = sanitize_file_name(&original)
            .ok_or_else(|| bad_request_error(format!("invalid file name '{original}'")))?;
        let path = images_dir.join(&name);
        if !has_image_extension(&path, state.ingestor.extensions()) {
            return Err(bad_request_error(format!(
                "'{original}' is not a supported image type"
            )));
        }

        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request_error(format!("failed to read upload '{original}': {e}")))?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| internal_error(format!("failed to save '{name}': {e}")))?;
        log::info!("saved upload {}", path.display());
        saved.push(path);
    }

    if saved.is_empty() {
        return Err(bad_request_error("no files uploaded".into()));
    }

    let mut ingested = IngestReport::default();
    if state.config.ingest.on_upload {
        for path in &saved {
            match state.ingestor.ingest_image(path).await {
                Ok(_) => ingested.succeeded.push(path.display().to_string()),
                Err(e) => {
                    log::warn!("failed to ingest upload {}: {e}", path.display());
                    ingested.failed.push(IngestFailure {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    Ok(Json(UploadResponse {
        message: format!("Uploaded {} file(s)", saved.len()),
        saved: saved.iter().map(|p| p.display().to_string()).collect(),
        ingested,
    }))
}
