use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::lobby::types::{GameCode, LobbyError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("game {0} not found")]
    GameNotFound(GameCode),

    /// A concurrent writer got there first: either a create raced on the
    /// same code, or the roster version moved under a compare-and-swap.
    /// Retryable.
    #[error("write conflict on game {0}")]
    Conflict(GameCode),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no free room code found after {0} attempts")]
    CodesExhausted(u32),

    #[error("lobby rule violation: {0}")]
    Lobby(#[from] LobbyError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::GameNotFound(code) => {
                (StatusCode::NOT_FOUND, format!("Game {} not found", code))
            }
            AppError::Conflict(code) => {
                tracing::warn!(code = %code, "write conflict surfaced to caller");
                (
                    StatusCode::CONFLICT,
                    format!("Another update to game {} won the race, please retry", code),
                )
            }
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::CodesExhausted(attempts) => {
                tracing::error!(attempts, "room code allocation exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Could not allocate a room code, please retry".to_string(),
                )
            }
            AppError::Lobby(e) => {
                tracing::warn!("lobby rule violation: {}", e);
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Redis(e) => {
                tracing::error!("redis error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal database error occurred".to_string(),
                )
            }
            AppError::Serde(e) => {
                tracing::error!("serialization error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal serialization error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
