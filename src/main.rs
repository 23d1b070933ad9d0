use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use spotbot::chat::{Announcer, ChatClient};
use spotbot::config::Config;
use spotbot::counts::CountsClient;
use spotbot::oauth::{AuthSession, ProviderConfig, SpotifyProvider, TwitchProvider};
use spotbot::player::PlayerPoller;
use spotbot::webhooks::WebhookClient;
use spotbot::{api, AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotbot=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("spotbot v{}", env!("CARGO_PKG_VERSION"));

    // Provider sessions
    let spotify_provider = SpotifyProvider::new(ProviderConfig::new(
        &config.spotify_client_id,
        &config.spotify_client_secret,
        config.spotify_redirect_uri(),
        Some(config.spotify_scope.clone()),
    )?);
    let twitch_provider = TwitchProvider::new(ProviderConfig::new(
        &config.twitch_client_id,
        &config.twitch_client_secret,
        config.twitch_redirect_uri(),
        None,
    )?);
    let spotify = Arc::new(AuthSession::new(Arc::new(spotify_provider))?);
    let twitch = Arc::new(AuthSession::new(Arc::new(twitch_provider))?);

    // Chat client (optional: announcements are skipped without a bot token)
    let chat = match &config.twitch_bot_token {
        Some(token) => Some(Arc::new(ChatClient::connect(
            &config.twitch_bot_name,
            token,
            &config.twitch_channel,
        )?)),
        None => {
            warn!("TWITCH_BOT_TOKEN not set; chat announcements disabled");
            None
        }
    };

    let announcer = chat.clone().map(|c| c as Arc<dyn Announcer>);
    let player = Arc::new(PlayerPoller::new(announcer));
    let counts = Arc::new(CountsClient::new(config.twitch_client_id.clone()));
    let webhooks = Arc::new(WebhookClient::new(
        config.twitch_client_id.clone(),
        config.webhook_server_href(),
    ));

    // Spotify credentials drive the now-playing poller.
    let (_spotify_sub, mut spotify_rx) = spotify.subscribe();
    {
        let player = player.clone();
        tokio::spawn(async move {
            while let Some(credentials) = spotify_rx.recv().await {
                info!("Setting Spotify client token");
                player.clone().set_credentials(credentials.access_token).await;
            }
        });
    }

    // Twitch credentials feed the counts and webhook clients; the first set
    // also registers the follower notification subscription.
    let (_twitch_sub, mut twitch_rx) = twitch.subscribe();
    {
        let counts = counts.clone();
        let webhooks = webhooks.clone();
        let channel = config.twitch_channel.clone();
        tokio::spawn(async move {
            let mut follows_subscribed = false;
            while let Some(credentials) = twitch_rx.recv().await {
                info!("Setting Twitch client tokens");
                counts.set_access_token(credentials.access_token.clone()).await;
                webhooks.set_access_token(credentials.access_token).await;

                if follows_subscribed {
                    continue;
                }
                let user_id = match counts.user_id_for(&channel).await {
                    Ok(id) => id,
                    Err(e) => {
                        error!("Failed to get channel id for {channel}: {e}");
                        continue;
                    }
                };
                match webhooks
                    .subscribe("users/follows", &[("first", "1"), ("to_id", &user_id)])
                    .await
                {
                    Ok((id, mut events)) => {
                        follows_subscribed = true;
                        tokio::spawn(async move {
                            while let Some(event) = events.recv().await {
                                info!("Follow notification: {event}");
                                info!("NEW FOLLOWER ALERT!!!");
                            }
                        });
                    }
                    Err(e) => error!("Failed to subscribe to follow notifications: {e}"),
                }
            }
        });
    }

    // Build shared state
    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        spotify,
        twitch,
        player,
        counts,
        webhooks,
    });

    // Build router
    let app = api::router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("spotbot running on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}
