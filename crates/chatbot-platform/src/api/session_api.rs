//! Session lifecycle and chat endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tracing::info;
use validator::{Validate, ValidationError};

use super::{authorize, ApiError, ApiState, UserId};
use crate::memory_db::{SessionRecord, SessionUpdate, StoredMessage};
use crate::config::MAX_TITLE_LENGTH;
use crate::messages::{is_error_reply, ErrorMessages};
use crate::providers::openai::validate_message;
use crate::session_manager::CreateSessionParams;

/// Final SSE event of a chat stream.
pub const STREAM_DONE_EVENT: &str = "[DONE]";

fn validate_chat_message(value: &str) -> Result<(), ValidationError> {
    validate_message(value).map_err(|_| ValidationError::new("message"))
}

fn validate_title(value: &str) -> Result<(), ValidationError> {
    if value.chars().count() > MAX_TITLE_LENGTH {
        return Err(ValidationError::new("title_too_long"));
    }
    Ok(())
}

/// Fragments travel JSON-encoded so line breaks in model output stay inside
/// one SSE data field.
fn fragment_event(fragment: &str) -> Event {
    let payload = json!({
        "content": fragment,
        "is_error": is_error_reply(fragment),
    });
    Event::default().data(payload.to_string())
}

fn default_enable_db() -> bool {
    true
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 200))]
    pub project_id: String,
    #[validate(length(min = 1, max = 200))]
    pub session_id: Option<String>,
    #[serde(default)]
    pub chat_model: Option<String>,
    #[serde(default)]
    pub summary_model: Option<String>,
    #[serde(default = "default_enable_db")]
    pub enable_db: bool,
    #[validate(custom = "validate_title")]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub project_id: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateSessionRequest {
    #[validate(length(min = 1), custom = "validate_title")]
    pub title: Option<String>,
    #[validate(length(min = 1))]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(custom = "validate_chat_message")]
    pub message: String,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub user_id: String,
    pub project_id: String,
    pub model: String,
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub reply: String,
    pub is_error: bool,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<StoredMessage>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
}

/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<ApiState>,
    user: UserId,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    req.validate()?;

    let (session_id, engine) = state
        .sessions
        .create_session(CreateSessionParams {
            user_id: user.0.clone(),
            project_id: req.project_id,
            session_id: req.session_id,
            chat_model: req.chat_model.unwrap_or_default(),
            summary_model: req.summary_model.unwrap_or_default(),
            enable_db: req.enable_db,
            title: req.title,
        })
        .await;

    if engine.user_id() != user.0 {
        return Err(ApiError::Forbidden);
    }

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id,
            user_id: engine.user_id().to_string(),
            project_id: engine.project_id().to_string(),
            model: engine.chat_model().to_string(),
            provider: engine.get_provider_name(),
        }),
    ))
}

/// GET /api/v1/sessions?project_id=
pub async fn list_sessions(
    State(state): State<ApiState>,
    user: UserId,
    Query(query): Query<ListSessionsQuery>,
) -> Json<Vec<SessionRecord>> {
    let project_id = query.project_id.as_deref().filter(|p| !p.is_empty());
    Json(state.sessions.get_user_sessions(&user.0, project_id).await)
}

/// PATCH /api/v1/sessions/:id
pub async fn update_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    user: UserId,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<SessionRecord>, ApiError> {
    req.validate()?;
    authorize(&state.sessions, &session_id, &user).await?;

    let update = SessionUpdate { title: req.title, model: req.model };
    state
        .sessions
        .update_session(&session_id, update)
        .await
        .map(Json)
        .ok_or(ApiError::NotFound)
}

/// DELETE /api/v1/sessions/:id
pub async fn delete_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    user: UserId,
) -> Result<StatusCode, ApiError> {
    authorize(&state.sessions, &session_id, &user).await?;

    if state.sessions.end_session(&session_id).await {
        info!("Session {} deleted by {}", session_id, user.0);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::Internal(ErrorMessages::SESSION_DELETE_FAILED.to_string()))
    }
}

/// POST /api/v1/sessions/:id/chat
pub async fn chat(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    user: UserId,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    req.validate()?;
    let engine = authorize(&state.sessions, &session_id, &user).await?;

    let reply = engine.chat(&req.message, req.system_prompt.as_deref()).await;
    Ok(Json(ChatResponse {
        session_id,
        is_error: is_error_reply(&reply),
        reply,
    }))
}

/// POST /api/v1/sessions/:id/chat/stream
pub async fn chat_stream(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    user: UserId,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    req.validate()?;
    let engine = authorize(&state.sessions, &session_id, &user).await?;

    let fragments = engine.chat_stream(&req.message, req.system_prompt.as_deref()).await;
    let events = fragments
        .map(|fragment| Ok::<_, Infallible>(fragment_event(&fragment)))
        .chain(stream::once(async { Ok(Event::default().data(STREAM_DONE_EVENT)) }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// GET /api/v1/sessions/:id/history
pub async fn get_history(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
    user: UserId,
) -> Result<Json<HistoryResponse>, ApiError> {
    authorize(&state.sessions, &session_id, &user).await?;

    let messages = state.sessions.get_session_history(&session_id).await;
    Ok(Json(HistoryResponse { session_id, messages }))
}

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.sessions.get_session_count(),
    })
}
