use anyhow::{Context, Result};

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used to build the OAuth redirect URIs
    /// and the webhook callback URLs registered with the hub.
    pub base_url: String,

    // ── Spotify ─────────────────────────────────────────────────────────
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_scope: String,

    // ── Twitch ──────────────────────────────────────────────────────────
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    /// Channel whose chat is joined and whose counts are reported.
    pub twitch_channel: String,
    pub twitch_bot_name: String,
    /// Chat password for the bot account. Chat announcements are disabled
    /// when unset.
    pub twitch_bot_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "7562".into())
            .parse()
            .context("Invalid PORT")?;

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{port}")),
            port,

            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID")
                .context("SPOTIFY_CLIENT_ID is required")?,
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET")
                .context("SPOTIFY_CLIENT_SECRET is required")?,
            spotify_scope: std::env::var("SPOTIFY_SCOPE").unwrap_or_else(|_| {
                "user-read-currently-playing user-read-playback-state".into()
            }),

            twitch_client_id: std::env::var("TWITCH_CLIENT_ID")
                .context("TWITCH_CLIENT_ID is required")?,
            twitch_client_secret: std::env::var("TWITCH_CLIENT_SECRET")
                .context("TWITCH_CLIENT_SECRET is required")?,
            twitch_channel: std::env::var("TWITCH_CHANNEL")
                .context("TWITCH_CHANNEL is required")?,
            twitch_bot_name: std::env::var("TWITCH_BOT_NAME")
                .unwrap_or_else(|_| "TehSpotBot".into()),
            twitch_bot_token: std::env::var("TWITCH_BOT_TOKEN").ok(),
        })
    }

    /// OAuth redirect URI for the Spotify login flow.
    pub fn spotify_redirect_uri(&self) -> String {
        format!("{}/spotifyauthcallback", self.base_url)
    }

    /// OAuth redirect URI for the Twitch login flow.
    pub fn twitch_redirect_uri(&self) -> String {
        format!("{}/twitchauthcallback", self.base_url)
    }

    /// Base URL the webhook hub delivers notifications to.
    pub fn webhook_server_href(&self) -> String {
        format!("{}/twitchwebhooks", self.base_url)
    }
}
