//! Chat endpoint and session management.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use memorybot_core::chat::{MultimodalChat, ReplyStatus};
use memorybot_core::provider::Provider;
use memorybot_core::retrieval::{RankedEntry, normalize_hits};
use memorybot_core::types::ConversationTurn;

use super::search::request_weights;
use super::{ApiError, AppState, external_service_error, not_found_error};

/// Incoming chat request.
#[derive(Serialize, Deserialize, Default)]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// File name of an image under `images_dir`.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub text_weight: Option<f32>,
    #[serde(default)]
    pub image_weight: Option<f32>,
}

#[derive(Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    pub retrieved_context: String,
    pub results: Vec<RankedEntry>,
    pub status: ReplyStatus,
}

#[derive(Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub history: Vec<ConversationTurn>,
}

/// `POST /api/chat`: answer one message within a session.
///
/// A missing `session_id` starts a new session; its id is returned.
pub async fn chat_handler<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ApiError>)> {
    let image = match req.image.as_deref().filter(|s| !s.is_empty()) {
        Some(name) => Some(state.resolve_image(name)?),
        None => None,
    };
    let weights = request_weights(state.config.search.weights(), req.text_weight, req.image_weight);

    let (session_id, session) = state.sessions.get_or_create(req.session_id.as_deref());
    let mut session = session.lock().await;

    let chat = MultimodalChat {
        fuser: &state.fuser,
        provider: &state.provider,
        chat: &state.config.chat,
        search: &state.config.search,
    };
    let reply = chat
        .process_message(&mut session, req.text.as_deref(), image.as_deref(), weights)
        .await
        .map_err(|e| {
            log::error!("chat failed for session {session_id}: {e}");
            external_service_error(e.to_string())
        })?;

    Ok(Json(ChatResponse {
        session_id,
        response: reply.response,
        retrieved_context: reply.retrieved_context,
        results: normalize_hits(&reply.results, state.aggregator.rewrite()),
        status: reply.status,
    }))
}

/// `GET /api/chat/{id}`: the session's conversation history.
pub async fn get_session<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Path(id): Path<String>,
) -> Result<Json<SessionResponse>, (StatusCode, Json<ApiError>)> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| not_found_error(format!("session '{id}' not found")))?;
    let history = session.lock().await.history().to_vec();
    Ok(Json(SessionResponse {
        session_id: id,
        history,
    }))
}

/// `DELETE /api/chat/{id}`: end the session and clear its history. Idempotent.
///
/// A later message with the same id starts over with an empty history.
pub async fn reset_session<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Path(id): Path<String>,
) -> StatusCode {
    if let Some(session) = state.sessions.remove(&id) {
        session.lock().await.reset();
    }
    StatusCode::NO_CONTENT
}
