pub mod api;
pub mod chat;
pub mod config;
pub mod counts;
pub mod error;
pub mod oauth;
pub mod player;
pub mod webhooks;

pub use config::Config;
pub use error::BotError;

use std::sync::Arc;

/// Shared application state passed to all route handlers.
pub struct AppState {
    pub config: Config,
    pub spotify: Arc<oauth::AuthSession>,
    pub twitch: Arc<oauth::AuthSession>,
    pub player: Arc<player::PlayerPoller>,
    pub counts: Arc<counts::CountsClient>,
    pub webhooks: Arc<webhooks::WebhookClient>,
}

pub type SharedState = Arc<AppState>;
