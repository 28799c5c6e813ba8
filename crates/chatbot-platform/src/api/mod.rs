//! HTTP surface over the session manager

pub mod session_api;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::messages::ErrorMessages;
use crate::providers::ChatEngine;
use crate::session_manager::SessionManager;

pub use session_api::{
    chat, chat_stream, create_session, delete_session, get_history, health, list_sessions,
    update_session,
};

/// Header the fronting layer uses to pass the authenticated user.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ApiState {
    pub sessions: Arc<SessionManager>,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                format!("Missing {} header", USER_ID_HEADER),
            ),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, ErrorMessages::SESSION_UNAUTHORIZED.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, ErrorMessages::SESSION_NOT_FOUND.to_string()),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::BadRequest(errors.to_string())
    }
}

/// Caller identity taken from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct UserId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| UserId(value.to_string()))
            .ok_or(ApiError::Unauthorized)
    }
}

/// Resolves a session and checks it belongs to the caller.
pub(crate) async fn authorize(
    sessions: &SessionManager,
    session_id: &str,
    user: &UserId,
) -> Result<Arc<dyn ChatEngine>, ApiError> {
    let engine = sessions.get_session(session_id).await.ok_or(ApiError::NotFound)?;
    if engine.user_id() != user.0 {
        warn!("User {} tried to access session {} owned by someone else", user.0, session_id);
        return Err(ApiError::Forbidden);
    }
    Ok(engine)
}
