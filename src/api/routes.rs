//! Route handlers for the bot's HTTP surface.
//!
//! All handlers receive `SharedState` via Axum state extraction. The OAuth
//! gates are layered on top of these routes in [`super::router`].

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};

use crate::error::BotError;
use crate::SharedState;

pub fn bot_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Player ───────────────────────────────────────────────────────
        .route("/playing", get(playing))
        // ── Counts ───────────────────────────────────────────────────────
        .route("/counts/followers", get(followers))
        .route("/counts/subscribers", get(subscribers))
        // ── Webhook callbacks ────────────────────────────────────────────
        .route(
            "/twitchwebhooks/{id}",
            get(webhook_challenge).post(webhook_notification),
        )
        // ── Static ───────────────────────────────────────────────────────
        .route_service("/", ServeFile::new("public/player.html"))
        .nest_service("/public", ServeDir::new("public"))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "spotbot",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// Player
// =============================================================================

/// GET /playing — the latest cached currently-playing body.
async fn playing(State(state): State<SharedState>) -> Response {
    match state.player.current().await {
        Some(body) => Json(body).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

// =============================================================================
// Counts
// =============================================================================

async fn followers(State(state): State<SharedState>) -> Result<String, BotError> {
    let count = state
        .counts
        .followers(&state.config.twitch_channel)
        .await?;
    Ok(count.to_string())
}

async fn subscribers(State(state): State<SharedState>) -> Result<String, BotError> {
    let count = state
        .counts
        .subscribers(&state.config.twitch_channel)
        .await?;
    Ok(count.to_string())
}

// =============================================================================
// Webhook callbacks
// =============================================================================

/// GET /twitchwebhooks/:id — the hub verifies a pending (un)subscription by
/// asking us to echo its challenge.
async fn webhook_challenge(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, BotError> {
    if !state.webhooks.has_subscription(&id) {
        return Err(BotError::NotFound("subscription".into()));
    }

    match params.get("hub.challenge") {
        Some(challenge) => Ok(challenge.clone().into_response()),
        None => Ok(StatusCode::OK.into_response()),
    }
}

/// POST /twitchwebhooks/:id — a hub notification. Verified against the
/// signature header before being forwarded.
async fn webhook_notification(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, BotError> {
    let signature = headers
        .get("x-hub-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(BotError::InvalidSignature)?;
    state.webhooks.verify_signature(&body, signature)?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| BotError::BadRequest(format!("invalid notification payload: {e}")))?;
    state.webhooks.dispatch(&id, payload)?;

    Ok(StatusCode::OK)
}
