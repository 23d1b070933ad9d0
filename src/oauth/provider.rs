use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::BotError;

/// A set of tokens returned from an OAuth provider after code exchange or
/// refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

/// How long before the stated expiry a token is proactively refreshed.
///
/// The delay for a token with `expires_in` seconds of lifetime is
/// `max(floor, expires_in - buffer)`.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    pub buffer: Duration,
    pub floor: Duration,
}

impl RefreshPolicy {
    pub const fn new(buffer: Duration, floor: Duration) -> Self {
        Self { buffer, floor }
    }

    pub fn delay_for(&self, expires_in: u64) -> Duration {
        std::cmp::max(
            self.floor,
            Duration::from_secs(expires_in).saturating_sub(self.buffer),
        )
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            buffer: Duration::from_secs(30),
            floor: Duration::ZERO,
        }
    }
}

/// Static per-provider app registration. Immutable after construction.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
}

impl ProviderConfig {
    /// Fails when any of client id, client secret, or redirect URI is
    /// missing. A half-configured provider must not come up at all.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        scope: Option<String>,
    ) -> Result<Self, BotError> {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        let redirect_uri = redirect_uri.into();

        if client_id.is_empty() || client_secret.is_empty() || redirect_uri.is_empty() {
            return Err(BotError::Config(
                "client_id, client_secret, and redirect_uri are all required".into(),
            ));
        }

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri,
            scope,
        })
    }
}

/// Capability interface an OAuth provider has to implement to drive the
/// login flow.
///
/// Each implementation handles the provider-specific quirks: consent URL
/// format, token endpoint, request encoding, refresh timing.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Unique provider identifier (e.g., "spotify", "twitch").
    fn id(&self) -> &str;

    /// The consent URL the user is redirected to when no credentials exist.
    fn authorize_url(&self) -> String;

    /// The redirect URI registered with the provider; the lifecycle session
    /// derives its callback path from this.
    fn redirect_uri(&self) -> &str;

    /// Exchange an authorization code for an access token (and optionally a
    /// refresh token).
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, BotError>;

    /// Obtain a fresh access token using a refresh token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, BotError>;

    /// When to renew tokens relative to their stated expiry.
    fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::default()
    }
}

/// Percent-encoding for URL query parameters.
pub(crate) fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_delay_subtracts_buffer() {
        let policy = RefreshPolicy::new(Duration::from_secs(30), Duration::ZERO);
        assert_eq!(policy.delay_for(3600), Duration::from_secs(3570));
    }

    #[test]
    fn refresh_delay_respects_floor() {
        let policy = RefreshPolicy::new(Duration::from_secs(120), Duration::from_secs(30));
        assert_eq!(policy.delay_for(3600), Duration::from_secs(3480));
        // Short-lived token: the buffer would push the delay below the floor.
        assert_eq!(policy.delay_for(60), Duration::from_secs(30));
        // Buffer larger than the lifetime saturates at the floor.
        assert_eq!(policy.delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn provider_config_requires_all_parameters() {
        for (id, secret, uri) in [
            ("", "secret", "http://localhost/cb"),
            ("id", "", "http://localhost/cb"),
            ("id", "secret", ""),
        ] {
            let result = ProviderConfig::new(id, secret, uri, None);
            assert!(matches!(result, Err(BotError::Config(_))));
        }
    }

    #[test]
    fn provider_config_accepts_complete_parameters() {
        let config = ProviderConfig::new("id", "secret", "http://localhost/cb", None).unwrap();
        assert_eq!(config.client_id, "id");
        assert!(config.scope.is_none());
    }
}
