use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    // ── Configuration ───────────────────────────────────────────────────
    #[error("Missing or invalid configuration: {0}")]
    Config(String),

    // ── OAuth flow ──────────────────────────────────────────────────────
    #[error("Token exchange failed: {0}")]
    Exchange(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    // ── Upstream APIs ───────────────────────────────────────────────────
    #[error("Upstream API error: {0}")]
    Upstream(String),

    // ── Request handling ────────────────────────────────────────────────
    #[error("Authentication required")]
    Unauthorized,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for BotError {
    fn from(e: anyhow::Error) -> Self {
        BotError::Internal(e.to_string())
    }
}

impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        // Upstream error bodies can carry provider secrets or raw token
        // payloads. They go to the log; the client gets a fixed message.
        let (status, code, message) = match &self {
            BotError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                self.to_string(),
            ),
            BotError::Exchange(detail) => {
                tracing::error!("Token exchange failed: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "exchange_failed",
                    "Authentication with the provider failed.".to_string(),
                )
            }
            BotError::RefreshFailed(detail) => {
                tracing::error!("Token refresh failed: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "refresh_failed",
                    "Authentication with the provider failed.".to_string(),
                )
            }
            BotError::MalformedResponse(detail) => {
                tracing::error!("Malformed provider response: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "malformed_response",
                    "Authentication with the provider failed.".to_string(),
                )
            }
            BotError::Upstream(detail) => {
                tracing::error!("Upstream API error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "upstream_error",
                    "Internal Server Error.".to_string(),
                )
            }
            BotError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            BotError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            BotError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", self.to_string()),
            BotError::InvalidSignature => {
                (StatusCode::FORBIDDEN, "invalid_signature", self.to_string())
            }
            BotError::Internal(detail) => {
                tracing::error!("Internal error: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal Server Error.".to_string(),
                )
            }
        };

        let body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_error_maps_to_500() {
        let resp =
            BotError::Exchange("upstream said: invalid_client secret=hunter2".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = BotError::NotFound("subscription".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
