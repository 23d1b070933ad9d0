//! Twitch chat client used for now-playing announcements.

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use twitch_irc::login::StaticLoginCredentials;
use twitch_irc::{ClientConfig, SecureTCPTransport, TwitchIRCClient};

use crate::error::BotError;

/// Anything that can drop a message into the channel. The poller and the
/// follower relay talk to this instead of the IRC client directly.
#[async_trait]
pub trait Announcer: Send + Sync {
    async fn announce(&self, message: &str);
}

type IrcClient = TwitchIRCClient<SecureTCPTransport, StaticLoginCredentials>;

pub struct ChatClient {
    client: IrcClient,
    channel: String,
    reader: JoinHandle<()>,
}

impl ChatClient {
    /// Connect with the bot account's chat credentials and join the channel.
    pub fn connect(bot_name: &str, bot_token: &str, channel: &str) -> Result<Self, BotError> {
        let channel = channel.to_lowercase();
        let token = bot_token.strip_prefix("oauth:").unwrap_or(bot_token);
        let credentials =
            StaticLoginCredentials::new(bot_name.to_string(), Some(token.to_string()));

        let (mut incoming, client) = IrcClient::new(ClientConfig::new_simple(credentials));

        // The incoming stream has to be drained or the connection stalls.
        let reader = tokio::spawn(async move {
            while let Some(message) = incoming.recv().await {
                debug!("Chat: {message:?}");
            }
        });

        client
            .join(channel.clone())
            .map_err(|e| BotError::Config(format!("cannot join channel {channel}: {e}")))?;
        info!("Joined #{channel} as {bot_name}");

        Ok(Self {
            client,
            channel,
            reader,
        })
    }

    pub async fn say(&self, message: String) -> Result<(), BotError> {
        self.client
            .say(self.channel.clone(), message)
            .await
            .map_err(|e| BotError::Upstream(format!("chat send failed: {e}")))
    }

    pub fn shutdown(&self) {
        self.reader.abort();
    }
}

#[async_trait]
impl Announcer for ChatClient {
    async fn announce(&self, message: &str) {
        info!("Sending chat message: `{message}`");
        if let Err(e) = self.say(message.to_string()).await {
            error!("Failed to send chat message: {e}");
        }
    }
}
