//! Now-playing poller.
//!
//! Once Spotify credentials arrive, polls the currently-playing endpoint
//! every 10 seconds, caches the latest response for the `/playing` route,
//! and announces track changes in chat.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::chat::Announcer;
use crate::error::BotError;

const API_BASE: &str = "https://api.spotify.com";
const POLL_INTERVAL: Duration = Duration::from_secs(10);

// The fields of the currently-playing payload the bot actually looks at;
// the raw body is cached as-is for the HTTP surface.
#[derive(Debug, Deserialize)]
struct CurrentlyPlaying {
    item: Track,
}

#[derive(Debug, Deserialize)]
struct Track {
    id: String,
    name: String,
    artists: Vec<Artist>,
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct Artist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

pub struct PlayerPoller {
    http: reqwest::Client,
    api_base: String,
    announcer: Option<Arc<dyn Announcer>>,
    access_token: RwLock<Option<String>>,
    current: RwLock<Option<Value>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerPoller {
    pub fn new(announcer: Option<Arc<dyn Announcer>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: API_BASE.into(),
            announcer,
            access_token: RwLock::new(None),
            current: RwLock::new(None),
            poll_task: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.into();
        self
    }

    /// Latest cached currently-playing body, if any track has been seen.
    pub async fn current(&self) -> Option<Value> {
        self.current.read().await.clone()
    }

    /// Store a fresh access token and (re)start the poll loop. Each
    /// credentials event replaces the previous loop.
    pub async fn set_credentials(self: Arc<Self>, access_token: String) {
        *self.access_token.write().await = Some(access_token);

        let mut task = self.poll_task.lock().await;
        if let Some(old) = task.take() {
            old.abort();
        }
        let poller = Arc::clone(&self);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;
                if let Err(e) = poller.poll_once().await {
                    error!("Now-playing poll failed: {e}");
                }
            }
        }));
    }

    /// Stop polling. The cached track stays available.
    pub async fn stop(&self) {
        if let Some(task) = self.poll_task.lock().await.take() {
            task.abort();
        }
    }

    /// One poll of the currently-playing endpoint.
    pub async fn poll_once(&self) -> Result<(), BotError> {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or(BotError::Unauthorized)?;

        let resp = self
            .http
            .get(format!("{}/v1/me/player/currently-playing", self.api_base))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| BotError::Upstream(format!("currently-playing request failed: {e}")))?;

        match resp.status().as_u16() {
            200 => {
                let body: Value = resp.json().await.map_err(|e| {
                    BotError::MalformedResponse(format!("currently-playing response: {e}"))
                })?;
                self.observe(body).await
            }
            // 204 means nothing is playing.
            204 => {
                *self.current.write().await = None;
                Ok(())
            }
            status => {
                *self.current.write().await = None;
                let body = resp.text().await.unwrap_or_default();
                Err(BotError::Upstream(format!(
                    "unexpected currently-playing response {status}: {body}"
                )))
            }
        }
    }

    async fn observe(&self, body: Value) -> Result<(), BotError> {
        let playing: CurrentlyPlaying = serde_json::from_value(body.clone()).map_err(|e| {
            BotError::MalformedResponse(format!("currently-playing response: {e}"))
        })?;

        let is_new_song = {
            let current = self.current.read().await;
            match current
                .as_ref()
                .and_then(|v| v.pointer("/item/id"))
                .and_then(Value::as_str)
            {
                Some(prev_id) => prev_id != playing.item.id,
                None => true,
            }
        };

        if is_new_song {
            *self.current.write().await = Some(body);
            let message = now_playing_message(&playing.item);
            match &self.announcer {
                Some(announcer) => announcer.announce(&message).await,
                None => info!("(chat disabled) {message}"),
            }
        }

        Ok(())
    }
}

fn now_playing_message(track: &Track) -> String {
    let artists = track
        .artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let link = track.external_urls.spotify.as_deref().unwrap_or_default();
    format!(
        "🎶🎵🎼 Now playing \"{}\" by {} on Spotify. \
         Like what you hear? Take a listen on Spotify: {}",
        track.name, artists, link
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct RecordingAnnouncer {
        messages: StdMutex<Vec<String>>,
    }

    impl RecordingAnnouncer {
        fn new() -> Self {
            Self {
                messages: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Announcer for RecordingAnnouncer {
        async fn announce(&self, message: &str) {
            self.messages.lock().unwrap().push(message.to_string());
        }
    }

    fn playing_body(id: &str, name: &str) -> Value {
        json!({
            "item": {
                "id": id,
                "name": name,
                "artists": [{"name": "Artist A"}, {"name": "Artist B"}],
                "external_urls": {"spotify": format!("https://open.spotify.com/track/{id}")}
            },
            "is_playing": true
        })
    }

    async fn poller_against(
        server: &MockServer,
        announcer: Arc<RecordingAnnouncer>,
    ) -> Arc<PlayerPoller> {
        let poller =
            Arc::new(PlayerPoller::new(Some(announcer)).with_api_base(&server.uri()));
        *poller.access_token.write().await = Some("T1".into());
        poller
    }

    #[tokio::test]
    async fn announces_a_new_track_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(ResponseTemplate::new(200).set_body_json(playing_body("song1", "One")))
            .mount(&server)
            .await;

        let announcer = Arc::new(RecordingAnnouncer::new());
        let poller = poller_against(&server, announcer.clone()).await;

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();

        let messages = announcer.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("\"One\" by Artist A, Artist B"));
        assert!(messages[0].contains("https://open.spotify.com/track/song1"));
    }

    #[tokio::test]
    async fn announces_again_when_the_track_changes() {
        let server = MockServer::start().await;
        let hits = std::sync::atomic::AtomicUsize::new(0);
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(move |_req: &wiremock::Request| {
                let n = hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let body = if n == 0 {
                    playing_body("song1", "One")
                } else {
                    playing_body("song2", "Two")
                };
                ResponseTemplate::new(200).set_body_json(body)
            })
            .mount(&server)
            .await;

        let announcer = Arc::new(RecordingAnnouncer::new());
        let poller = poller_against(&server, announcer.clone()).await;

        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();

        assert_eq!(announcer.messages.lock().unwrap().len(), 2);
        let current = poller.current().await.unwrap();
        assert_eq!(current.pointer("/item/id").unwrap(), "song2");
    }

    #[tokio::test]
    async fn nothing_playing_clears_the_cache() {
        let server = MockServer::start().await;
        let hits = std::sync::atomic::AtomicUsize::new(0);
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(move |_req: &wiremock::Request| {
                if hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(200).set_body_json(playing_body("song1", "One"))
                } else {
                    ResponseTemplate::new(204)
                }
            })
            .mount(&server)
            .await;

        let announcer = Arc::new(RecordingAnnouncer::new());
        let poller = poller_against(&server, announcer.clone()).await;

        poller.poll_once().await.unwrap();
        assert!(poller.current().await.is_some());

        poller.poll_once().await.unwrap();
        assert!(poller.current().await.is_none());
    }

    #[tokio::test]
    async fn unexpected_status_clears_the_cache_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let announcer = Arc::new(RecordingAnnouncer::new());
        let poller = poller_against(&server, announcer.clone()).await;

        let result = poller.poll_once().await;
        assert!(matches!(result, Err(BotError::Upstream(_))));
        assert!(poller.current().await.is_none());
        assert!(announcer.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn polling_without_credentials_is_rejected() {
        let poller = Arc::new(PlayerPoller::new(None));
        let result = poller.poll_once().await;
        assert!(matches!(result, Err(BotError::Unauthorized)));
    }
}
