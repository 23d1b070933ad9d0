//! Follower and subscriber counts for the configured channel.
//!
//! Both counts come from cursor-paginated list endpoints; the count is the
//! sum of page lengths. The channel's user id is resolved from its login
//! once and cached.

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::BotError;
use crate::oauth::urlencode;

const API_BASE: &str = "https://api.twitch.tv";

#[derive(Debug, Deserialize)]
struct Page {
    data: Vec<Value>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    data: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
}

pub struct CountsClient {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    access_token: RwLock<Option<String>>,
    user_id: RwLock<Option<String>>,
}

impl CountsClient {
    pub fn new(client_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: API_BASE.into(),
            client_id,
            access_token: RwLock::new(None),
            user_id: RwLock::new(None),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.into();
        self
    }

    pub async fn set_access_token(&self, token: String) {
        *self.access_token.write().await = Some(token);
    }

    pub async fn followers(&self, login: &str) -> Result<u64, BotError> {
        let user_id = self.user_id_for(login).await?;
        self.count_pages(&format!("/helix/users/follows?to_id={}", urlencode(&user_id)))
            .await
    }

    pub async fn subscribers(&self, login: &str) -> Result<u64, BotError> {
        let user_id = self.user_id_for(login).await?;
        self.count_pages(&format!(
            "/helix/subscriptions?broadcaster_id={}",
            urlencode(&user_id)
        ))
        .await
    }

    /// Resolve a channel login to its user id, caching the result.
    pub async fn user_id_for(&self, login: &str) -> Result<String, BotError> {
        if let Some(id) = self.user_id.read().await.clone() {
            return Ok(id);
        }

        let body = self
            .get(&format!("/helix/users?login={}", urlencode(login)))
            .await?;
        let users: UsersResponse = serde_json::from_str(&body)
            .map_err(|e| BotError::MalformedResponse(format!("users response: {e}")))?;
        let user = users
            .data
            .into_iter()
            .next()
            .ok_or_else(|| BotError::NotFound(format!("channel {login:?}")))?;

        *self.user_id.write().await = Some(user.id.clone());
        Ok(user.id)
    }

    /// Walk a cursor-paginated list endpoint and sum the page lengths.
    async fn count_pages(&self, path_and_query: &str) -> Result<u64, BotError> {
        let mut total = 0u64;
        let mut cursor: Option<String> = None;

        loop {
            let url = match &cursor {
                Some(c) => format!("{path_and_query}&after={}", urlencode(c)),
                None => path_and_query.to_string(),
            };
            let body = self.get(&url).await?;
            let page: Page = serde_json::from_str(&body)
                .map_err(|e| BotError::MalformedResponse(format!("list response: {e}")))?;

            total += page.data.len() as u64;

            match page.pagination.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => return Ok(total),
            }
        }
    }

    async fn get(&self, path_and_query: &str) -> Result<String, BotError> {
        let token = self
            .access_token
            .read()
            .await
            .clone()
            .ok_or(BotError::Unauthorized)?;

        let resp = self
            .http
            .get(format!("{}{path_and_query}", self.api_base))
            .header("Client-ID", &self.client_id)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| BotError::Upstream(format!("request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(BotError::Upstream(format!(
                "request failed with {status}: {body}"
            )));
        }

        resp.text()
            .await
            .map_err(|e| BotError::Upstream(format!("reading response failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_against(server: &MockServer) -> CountsClient {
        let client = CountsClient::new("client-id".into()).with_api_base(&server.uri());
        client.set_access_token("T1".into()).await;
        client
    }

    async fn mount_user_lookup(server: &MockServer, expected_hits: u64) {
        Mock::given(method("GET"))
            .and(path("/helix/users"))
            .and(query_param("login", "somechannel"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"id": "42", "login": "somechannel"}]})),
            )
            .expect(expected_hits)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn follower_count_sums_all_pages() {
        let server = MockServer::start().await;
        mount_user_lookup(&server, 1).await;

        // Second page, matched by its cursor.
        Mock::given(method("GET"))
            .and(path("/helix/users/follows"))
            .and(query_param("to_id", "42"))
            .and(query_param("after", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{}, {}],
                "pagination": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        // First page.
        Mock::given(method("GET"))
            .and(path("/helix/users/follows"))
            .and(query_param("to_id", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{}, {}, {}],
                "pagination": {"cursor": "c1"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let count = client.followers("somechannel").await.unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    async fn subscriber_count_reads_the_subscriptions_endpoint() {
        let server = MockServer::start().await;
        mount_user_lookup(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/helix/subscriptions"))
            .and(query_param("broadcaster_id", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{}, {}],
                "pagination": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let count = client.subscribers("somechannel").await.unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn user_id_is_resolved_once() {
        let server = MockServer::start().await;
        mount_user_lookup(&server, 1).await;

        Mock::given(method("GET"))
            .and(path("/helix/users/follows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [],
                "pagination": {}
            })))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        client.followers("somechannel").await.unwrap();
        client.followers("somechannel").await.unwrap();
    }

    #[tokio::test]
    async fn counting_without_credentials_is_rejected() {
        let client = CountsClient::new("client-id".into());
        let result = client.followers("somechannel").await;
        assert!(matches!(result, Err(BotError::Unauthorized)));
    }

    #[tokio::test]
    async fn upstream_failure_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/helix/users"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"Unauthorized"}"#))
            .mount(&server)
            .await;

        let client = client_against(&server).await;
        let result = client.followers("somechannel").await;
        assert!(matches!(result, Err(BotError::Upstream(_))));
    }
}
