use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::provider::{urlencode, OAuthProvider, ProviderConfig, RefreshPolicy, TokenSet};
use crate::error::BotError;

const ACCOUNTS_BASE: &str = "https://accounts.spotify.com";

/// Spotify OAuth 2.0 provider.
///
/// Quirks:
/// - Token endpoint takes a form-urlencoded body with HTTP Basic auth
///   (`base64(client_id:client_secret)`); the secret never appears in the
///   body.
/// - Access tokens live one hour; refresh responses usually omit the
///   refresh token, which stays valid.
pub struct SpotifyProvider {
    config: ProviderConfig,
    accounts_base: String,
    http: reqwest::Client,
}

// Raw token response from the accounts service.
#[derive(Debug, Deserialize)]
struct SpotifyTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

impl From<SpotifyTokenResponse> for TokenSet {
    fn from(r: SpotifyTokenResponse) -> Self {
        TokenSet {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            scope: r.scope,
        }
    }
}

impl SpotifyProvider {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            accounts_base: ACCOUNTS_BASE.into(),
            http: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    fn with_accounts_base(mut self, base: &str) -> Self {
        self.accounts_base = base.into();
        self
    }

    async fn token_request(&self, form: &[(&str, &str)], op: &str) -> Result<TokenSet, BotError> {
        let resp = self
            .http
            .post(format!("{}/api/token", self.accounts_base))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| BotError::Exchange(format!("Spotify {op} request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Exchange(format!(
                "Spotify {op} failed with {status}: {body}"
            )));
        }

        let token_resp: SpotifyTokenResponse = resp
            .json()
            .await
            .map_err(|e| BotError::MalformedResponse(format!("Spotify {op} response: {e}")))?;

        Ok(token_resp.into())
    }
}

#[async_trait]
impl OAuthProvider for SpotifyProvider {
    fn id(&self) -> &str {
        "spotify"
    }

    fn authorize_url(&self) -> String {
        let scope_part = self
            .config
            .scope
            .as_deref()
            .map(|s| format!("&scope={}", urlencode(s)))
            .unwrap_or_default();

        format!(
            "{base}/authorize?response_type=code&client_id={client_id}{scope_part}&redirect_uri={redirect_uri}",
            base = self.accounts_base,
            client_id = urlencode(&self.config.client_id),
            redirect_uri = urlencode(&self.config.redirect_uri),
        )
    }

    fn redirect_uri(&self) -> &str {
        &self.config.redirect_uri
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, BotError> {
        self.token_request(
            &[
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", &self.config.redirect_uri),
            ],
            "token exchange",
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, BotError> {
        self.token_request(
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
            "token refresh",
        )
        .await
    }

    fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::new(Duration::from_secs(30), Duration::ZERO)
    }
}
