//! HTTP surface of the bot.
//!
//! Two OAuth gates wrap every route: while a provider session has no
//! credentials, its gate diverts requests into that provider's login flow.
//! The Spotify gate runs first, then the Twitch gate, then the routes.

pub mod routes;

use crate::oauth::AuthSession;
use crate::SharedState;
use axum::{middleware, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::bot_router(state.clone())
        .layer(middleware::from_fn_with_state(
            state.twitch.clone(),
            AuthSession::gate,
        ))
        .layer(middleware::from_fn_with_state(
            state.spotify.clone(),
            AuthSession::gate,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
