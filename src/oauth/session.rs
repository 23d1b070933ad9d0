use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::notify::{CredentialNotifier, Credentials, SubscriptionId};
use super::provider::{OAuthProvider, TokenSet};
use crate::error::BotError;

/// Assumed token lifetime when the provider response omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

const MAX_REFRESH_ATTEMPTS: u32 = 5;
const REFRESH_BACKOFF_START: Duration = Duration::from_secs(5);
const REFRESH_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// The single credential a session holds for its provider. Never persisted;
/// gone on process exit.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub authorization_code: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unauthenticated,
    Exchanging,
    Authenticated,
}

struct SessionInner {
    phase: Phase,
    credential: Credential,
    refresh_task: Option<JoinHandle<()>>,
}

/// Per-provider OAuth lifecycle session.
///
/// Intercepts every inbound request: while no credentials exist, requests
/// to the callback path drive the authorization-code exchange and all other
/// requests are redirected to the provider's consent screen. Once a token
/// is held, requests pass through and a background task renews the token
/// ahead of expiry.
///
/// All credential state sits behind one async mutex, which also serializes
/// concurrent callback hits: the second caller waits for the first exchange
/// to finish and then observes the captured state instead of racing it.
pub struct AuthSession {
    provider: Arc<dyn OAuthProvider>,
    callback_path: String,
    notifier: CredentialNotifier,
    inner: Mutex<SessionInner>,
}

impl AuthSession {
    pub fn new(provider: Arc<dyn OAuthProvider>) -> Result<Self, BotError> {
        let redirect = url::Url::parse(provider.redirect_uri()).map_err(|e| {
            BotError::Config(format!(
                "invalid redirect_uri {:?}: {e}",
                provider.redirect_uri()
            ))
        })?;

        Ok(Self {
            callback_path: redirect.path().to_string(),
            provider,
            notifier: CredentialNotifier::new(),
            inner: Mutex::new(SessionInner {
                phase: Phase::Unauthenticated,
                credential: Credential::default(),
                refresh_task: None,
            }),
        })
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    pub fn subscribe(&self) -> (SubscriptionId, tokio::sync::mpsc::UnboundedReceiver<Credentials>) {
        self.notifier.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.notifier.unsubscribe(id)
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.lock().await.credential.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.inner.lock().await.credential.refresh_token.clone()
    }

    pub async fn credential(&self) -> Credential {
        self.inner.lock().await.credential.clone()
    }

    /// Cancel the proactive refresh task. The credential itself stays in
    /// memory until the process exits.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.refresh_task.take() {
            task.abort();
            debug!("Cancelled {} refresh task", self.provider.id());
        }
    }

    /// Middleware entry point; mount with
    /// `axum::middleware::from_fn_with_state(session, AuthSession::gate)`.
    pub async fn gate(
        State(session): State<Arc<AuthSession>>,
        req: Request,
        next: Next,
    ) -> Response {
        if session.has_credentials().await {
            if req.uri().path() == session.callback_path {
                // Late or repeated callback hit; nothing left to exchange.
                return Redirect::to("/").into_response();
            }
            return next.run(req).await;
        }

        if req.uri().path() == session.callback_path {
            let code = code_param(req.uri().query());
            match Self::authenticate(&session, code.as_deref()).await {
                Ok(()) => Redirect::to("/").into_response(),
                Err(e) => e.into_response(),
            }
        } else {
            info!(
                "{} session has no credentials; redirecting to the provider consent screen",
                session.provider.id()
            );
            Redirect::temporary(&session.provider.authorize_url()).into_response()
        }
    }

    async fn has_credentials(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.credential.access_token.is_some() || inner.credential.refresh_token.is_some()
    }

    /// Capture the authorization code (first callback wins) and run the
    /// exchange. Holding the session lock across the exchange keeps a second
    /// concurrent callback from issuing a duplicate request.
    async fn authenticate(session: &Arc<Self>, code: Option<&str>) -> Result<(), BotError> {
        let mut inner = session.inner.lock().await;

        if inner.phase == Phase::Authenticated {
            return Ok(());
        }

        let code = match inner.credential.authorization_code.clone() {
            Some(captured) => captured,
            None => {
                let code = code
                    .ok_or_else(|| BotError::BadRequest("missing code query parameter".into()))?
                    .to_string();
                info!("Got {} authorization code", session.provider.id());
                inner.credential.authorization_code = Some(code.clone());
                code
            }
        };

        inner.phase = Phase::Exchanging;
        match session.provider.exchange_code(&code).await {
            Ok(tokens) => {
                inner.credential.authorization_code = None;
                let expires_in = tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
                session.store_tokens(&mut inner, &tokens);
                inner.phase = Phase::Authenticated;
                Self::arm_refresh(session, &mut inner, expires_in);
                Ok(())
            }
            Err(e) => {
                // The captured code stays; a retried callback re-attempts the
                // exchange with it.
                inner.phase = Phase::Unauthenticated;
                Err(e)
            }
        }
    }

    /// Apply an exchange result to the credential and publish it. A refresh
    /// response without a new refresh token keeps the old one.
    fn store_tokens(&self, inner: &mut SessionInner, tokens: &TokenSet) {
        let expires_in = tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        info!(
            "The {} access token expires in {expires_in} seconds",
            self.provider.id()
        );

        inner.credential.access_token = Some(tokens.access_token.clone());
        if tokens.refresh_token.is_some() {
            inner.credential.refresh_token = tokens.refresh_token.clone();
        }
        inner.credential.expires_at =
            Some(Utc::now() + chrono::Duration::seconds(expires_in as i64));

        self.notifier.publish(Credentials {
            access_token: tokens.access_token.clone(),
            refresh_token: inner.credential.refresh_token.clone(),
        });
    }

    /// Replace the refresh task with one armed at the policy delay for the
    /// given lifetime.
    fn arm_refresh(session: &Arc<Self>, inner: &mut SessionInner, expires_in: u64) {
        let delay = session.provider.refresh_policy().delay_for(expires_in);
        info!(
            "Scheduling {} token refresh in {}s",
            session.provider.id(),
            delay.as_secs()
        );

        if let Some(task) = inner.refresh_task.take() {
            task.abort();
        }

        let session = Arc::clone(session);
        inner.refresh_task = Some(tokio::spawn(async move {
            session.refresh_loop(delay).await;
        }));
    }

    async fn refresh_loop(self: Arc<Self>, mut delay: Duration) {
        loop {
            tokio::time::sleep(delay).await;
            if let Some(next_delay) = self.refresh_with_backoff().await {
                delay = next_delay;
            }
            // Retries exhausted: keep the previous cadence and try again at
            // the next tick; the refresh token is still assumed valid.
        }
    }

    /// One scheduled refresh, retried with exponential backoff. Returns the
    /// delay until the next refresh on success, `None` when every attempt
    /// failed or no refresh token is held.
    async fn refresh_with_backoff(&self) -> Option<Duration> {
        let mut backoff = REFRESH_BACKOFF_START;

        for attempt in 1..=MAX_REFRESH_ATTEMPTS {
            let refresh_token = {
                let inner = self.inner.lock().await;
                inner.credential.refresh_token.clone()
            };
            let Some(refresh_token) = refresh_token else {
                warn!(
                    "No {} refresh token held; skipping scheduled refresh",
                    self.provider.id()
                );
                return None;
            };

            info!("Attempting to refresh {} token", self.provider.id());
            match self.provider.refresh_token(&refresh_token).await {
                Ok(tokens) => {
                    let mut inner = self.inner.lock().await;
                    let expires_in = tokens.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
                    self.store_tokens(&mut inner, &tokens);
                    inner.phase = Phase::Authenticated;
                    return Some(self.provider.refresh_policy().delay_for(expires_in));
                }
                Err(e) => {
                    warn!(
                        "Could not refresh {} access token (attempt {attempt}/{MAX_REFRESH_ATTEMPTS}): {e}",
                        self.provider.id()
                    );
                    if attempt < MAX_REFRESH_ATTEMPTS {
                        tokio::time::sleep(backoff).await;
                        backoff = std::cmp::min(backoff * 2, REFRESH_BACKOFF_CAP);
                    }
                }
            }
        }

        error!(
            "Giving up on {} token refresh after {MAX_REFRESH_ATTEMPTS} attempts; will retry at the next scheduled refresh",
            self.provider.id()
        );
        None
    }
}

fn code_param(query: Option<&str>) -> Option<String> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
}
