//! Webhook hub client and inbound notification dispatch.
//!
//! Subscriptions are registered with the hub under a random 64-hex-char id;
//! the hub calls back on `{server_href}/{id}`. Inbound notifications are
//! verified against the `X-Hub-Signature` header (HMAC-SHA256 of the raw
//! body with the subscription secret) before being forwarded to the
//! subscription's consumer.

use std::collections::HashMap;
use std::sync::Mutex;

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::error::BotError;

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.twitch.tv";
const HUB_TOPIC_BASE: &str = "https://api.twitch.tv/helix";
const DEFAULT_LEASE_SECONDS: u64 = 864_000;

/// Topics the hub accepts.
pub const TOPICS: [&str; 8] = [
    "users/follows",
    "streams",
    "users",
    "extensions/transactions",
    "moderation/moderators/events",
    "moderation/banned/events",
    "subscriptions/events",
    "hypetrain/events",
];

struct Subscription {
    topic: String,
    topic_url: String,
    callback: String,
    sender: mpsc::UnboundedSender<Value>,
}

pub struct WebhookClient {
    http: reqwest::Client,
    api_base: String,
    hub_topic_base: String,
    client_id: String,
    server_href: String,
    lease_seconds: u64,
    secret: String,
    access_token: RwLock<Option<String>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl WebhookClient {
    pub fn new(client_id: String, server_href: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: API_BASE.into(),
            hub_topic_base: HUB_TOPIC_BASE.into(),
            client_id,
            server_href,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            secret: random_hex(32),
            access_token: RwLock::new(None),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.into();
        self
    }

    #[cfg(test)]
    fn with_secret(mut self, secret: &str) -> Self {
        self.secret = secret.into();
        self
    }

    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
    }

    /// Register a subscription with the hub. Returns the subscription id and
    /// the receiver notifications are forwarded on.
    pub async fn subscribe(
        &self,
        topic: &str,
        params: &[(&str, &str)],
    ) -> Result<(String, mpsc::UnboundedReceiver<Value>), BotError> {
        if !TOPICS.contains(&topic) {
            return Err(BotError::BadRequest(format!(
                "invalid topic {topic:?}; valid topics are {}",
                TOPICS.join(", ")
            )));
        }

        let id = self.fresh_subscription_id();
        let callback = format!("{}/{}", self.server_href, id);
        let topic_url = topic_url(&self.hub_topic_base, topic, params);

        self.post_hub("subscribe", &callback, &topic_url).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().expect("subscriptions lock poisoned").insert(
            id.clone(),
            Subscription {
                topic: topic.to_string(),
                topic_url,
                callback,
                sender: tx,
            },
        );
        info!("Subscribed to {topic} notifications ({id})");

        Ok((id, rx))
    }

    /// Tell the hub to stop delivering and drop the subscription.
    pub async fn unsubscribe(&self, id: &str) -> Result<(), BotError> {
        let (callback, topic_url) = {
            let subscriptions = self.subscriptions.lock().expect("subscriptions lock poisoned");
            let sub = subscriptions
                .get(id)
                .ok_or_else(|| BotError::NotFound("subscription".into()))?;
            (sub.callback.clone(), sub.topic_url.clone())
        };

        self.post_hub("unsubscribe", &callback, &topic_url).await?;

        if let Some(sub) = self
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .remove(id)
        {
            info!("Unsubscribed from {} notifications ({id})", sub.topic);
        }
        Ok(())
    }

    pub fn has_subscription(&self, id: &str) -> bool {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .contains_key(id)
    }

    /// Verify the `X-Hub-Signature` header against the raw body.
    pub fn verify_signature(&self, body: &[u8], header: &str) -> Result<(), BotError> {
        let hex_signature = header
            .strip_prefix("sha256=")
            .ok_or(BotError::InvalidSignature)?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| BotError::Internal("HMAC key error".into()))?;
        mac.update(body);
        let expected = hex_encode(&mac.finalize().into_bytes());

        if !constant_time_eq(expected.as_bytes(), hex_signature.as_bytes()) {
            return Err(BotError::InvalidSignature);
        }
        Ok(())
    }

    /// Forward a verified notification to its subscription's consumer.
    pub fn dispatch(&self, id: &str, payload: Value) -> Result<(), BotError> {
        let subscriptions = self.subscriptions.lock().expect("subscriptions lock poisoned");
        let sub = subscriptions
            .get(id)
            .ok_or_else(|| BotError::NotFound("subscription".into()))?;

        if sub.sender.send(payload).is_err() {
            // Consumer went away; the hub still gets its 200 and the lease
            // runs out on its own.
            warn!("Dropping {} notification for {id}: consumer gone", sub.topic);
        }
        Ok(())
    }

    async fn post_hub(&self, mode: &str, callback: &str, topic_url: &str) -> Result<(), BotError> {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or(BotError::Unauthorized)?;

        let body = json!({
            "hub.callback": callback,
            "hub.lease_seconds": self.lease_seconds,
            "hub.mode": mode,
            "hub.secret": self.secret,
            "hub.topic": topic_url,
        });

        let resp = self
            .http
            .post(format!("{}/helix/webhooks/hub", self.api_base))
            .header("Client-ID", &self.client_id)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::Upstream(format!("hub request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Upstream(format!(
                "hub {mode} failed with {status}: {body}"
            )));
        }
        Ok(())
    }

    fn fresh_subscription_id(&self) -> String {
        let subscriptions = self.subscriptions.lock().expect("subscriptions lock poisoned");
        loop {
            let id = random_hex(32);
            if !subscriptions.contains_key(&id) {
                return id;
            }
        }
    }
}

fn topic_url(base: &str, topic: &str, params: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    format!("{base}/{topic}?{}", serializer.finish())
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex_encode(&buf)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
