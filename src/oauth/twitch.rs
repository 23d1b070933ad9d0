use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::provider::{urlencode, OAuthProvider, ProviderConfig, RefreshPolicy, TokenSet};
use crate::error::BotError;

const ID_BASE: &str = "https://id.twitch.tv";

/// The one scope the bot needs: reading the channel's subscriber list.
const REQUIRED_SCOPE: &str = "channel:read:subscriptions";

/// Twitch OAuth 2.0 provider.
///
/// Quirks:
/// - Token endpoint takes a JSON body with the client secret inline.
/// - The consent URL always requests `channel:read:subscriptions`;
///   no other scope is configurable.
/// - Refresh responses rotate the refresh token.
pub struct TwitchProvider {
    config: ProviderConfig,
    id_base: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TwitchTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<Vec<String>>,
}

impl From<TwitchTokenResponse> for TokenSet {
    fn from(r: TwitchTokenResponse) -> Self {
        TokenSet {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            scope: r.scope.map(|s| s.join(" ")),
        }
    }
}

impl TwitchProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            id_base: ID_BASE.into(),
            http: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    fn with_id_base(mut self, base: &str) -> Self {
        self.id_base = base.into();
        self
    }

    async fn token_request(&self, body: serde_json::Value, op: &str) -> Result<TokenSet, BotError> {
        let resp = self
            .http
            .post(format!("{}/oauth2/token", self.id_base))
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::Exchange(format!("Twitch {op} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Exchange(format!(
                "Twitch {op} failed with {status}: {body}"
            )));
        }

        let token_resp: TwitchTokenResponse = resp
            .json()
            .await
            .map_err(|e| BotError::MalformedResponse(format!("Twitch {op} response: {e}")))?;

        Ok(token_resp.into())
    }
}

#[async_trait]
impl OAuthProvider for TwitchProvider {
    fn id(&self) -> &str {
        "twitch"
    }

    fn authorize_url(&self) -> String {
        format!(
            "{base}/oauth2/authorize?client_id={client_id}&redirect_uri={redirect_uri}&response_type=code&scope={scope}",
            base = self.id_base,
            client_id = urlencode(&self.config.client_id),
            redirect_uri = urlencode(&self.config.redirect_uri),
            scope = urlencode(REQUIRED_SCOPE),
        )
    }

    fn redirect_uri(&self) -> &str {
        &self.config.redirect_uri
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, BotError> {
        self.token_request(
            json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "code": code,
                "grant_type": "authorization_code",
                "redirect_uri": self.config.redirect_uri,
            }),
            "token exchange",
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, BotError> {
        self.token_request(
            json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }),
            "token refresh",
        )
        .await
    }

    fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new(Duration::from_secs(120), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> ProviderConfig {
        ProviderConfig::new(
            "twitch-id",
            "twitch-secret",
            "http://localhost:7562/twitchauthcallback",
            None,
        )
        .unwrap()
    }

    #[test]
    fn authorize_url_fixes_the_subscription_scope() {
        let provider = TwitchProvider::new(test_config());
        let url = provider.authorize_url();

        assert!(url.starts_with("https://id.twitch.tv/oauth2/authorize?"));
        assert!(url.contains("client_id=twitch-id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A7562%2Ftwitchauthcallback"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=channel%3Aread%3Asubscriptions"));
    }

    #[tokio::test]
    async fn exchange_sends_json_body_with_inline_secret() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_json(json!({
                "client_id": "twitch-id",
                "client_secret": "twitch-secret",
                "code": "abc123",
                "grant_type": "authorization_code",
                "redirect_uri": "http://localhost:7562/twitchauthcallback",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "T1",
                "refresh_token": "R1",
                "expires_in": 14400,
                "token_type": "bearer",
                "scope": ["channel:read:subscriptions"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = TwitchProvider::new(test_config()).with_id_base(&server.uri());
        let tokens = provider.exchange_code("abc123").await.unwrap();

        assert_eq!(tokens.access_token, "T1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("R1"));
        assert_eq!(tokens.scope.as_deref(), Some("channel:read:subscriptions"));
    }

    #[tokio::test]
    async fn refresh_sends_refresh_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_json(json!({
                "client_id": "twitch-id",
                "client_secret": "twitch-secret",
                "grant_type": "refresh_token",
                "refresh_token": "R1",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "T2",
                "refresh_token": "R2",
                "expires_in": 14400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = TwitchProvider::new(test_config()).with_id_base(&server.uri());
        let tokens = provider.refresh_token("R1").await.unwrap();

        assert_eq!(tokens.access_token, "T2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_exchange_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(403).set_body_string(r#"{"message":"invalid client"}"#),
            )
            .mount(&server)
            .await;

        let provider = TwitchProvider::new(test_config()).with_id_base(&server.uri());
        let result = provider.exchange_code("abc123").await;

        assert!(matches!(result, Err(BotError::Exchange(_))));
    }
}
