use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

use crate::application::identity::{IdentityError, IdentityProvider};
use crate::domain::entities::IdentityRecord;
use crate::infra::error::InfraError;

/// Upper bound on ids per `users` lookup.
const USERS_PAGE_LIMIT: usize = 100;

/// Identity provider reached over its REST API with a bearer secret.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: Client,
    base: Url,
    secret_key: String,
}

impl HttpIdentityProvider {
    pub fn new(base: Url, secret_key: String, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chirp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| InfraError::identity(err.to_string()))?;
        Ok(Self {
            client,
            base: normalize_base(base),
            secret_key,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, IdentityError> {
        self.base
            .join(path)
            .map_err(|err| IdentityError::Transport(format!("invalid identity url: {err}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.secret_key)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, IdentityError> {
        let response = builder
            .send()
            .await
            .map_err(|err| IdentityError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IdentityError::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|err| IdentityError::Decode(err.to_string()))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<IdentityRecord>, IdentityError> {
        let mut users = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(USERS_PAGE_LIMIT) {
            let mut url = self.endpoint("users")?;
            {
                let mut query = url.query_pairs_mut();
                for id in chunk {
                    query.append_pair("user_id", id);
                }
                query.append_pair("limit", &chunk.len().to_string());
            }
            let page: Vec<WireUser> = self.send_json(self.request(Method::GET, url)).await?;
            debug!(
                target = "chirp::identity::http",
                requested = chunk.len(),
                returned = page.len(),
                "fetched users by id"
            );
            users.extend(page.into_iter().map(IdentityRecord::from));
        }
        Ok(users)
    }

    async fn user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<IdentityRecord>, IdentityError> {
        let mut url = self.endpoint("users")?;
        url.query_pairs_mut()
            .append_pair("username", username)
            .append_pair("limit", "1");
        let page: Vec<WireUser> = self.send_json(self.request(Method::GET, url)).await?;
        Ok(page.into_iter().next().map(IdentityRecord::from))
    }

    async fn verify_session(&self, token: &str) -> Result<Option<String>, IdentityError> {
        let url = self.endpoint("sessions/verify")?;
        let builder = self
            .request(Method::POST, url)
            .json(&VerifySessionRequest { token });
        match self.send_json::<VerifiedSession>(builder).await {
            Ok(session) => Ok(Some(session.user_id)),
            Err(IdentityError::Upstream { status, .. })
                if status == StatusCode::UNAUTHORIZED.as_u16()
                    || status == StatusCode::NOT_FOUND.as_u16() =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[derive(Serialize)]
struct VerifySessionRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct VerifiedSession {
    user_id: String,
}

#[derive(Deserialize)]
struct WireEmail {
    email_address: String,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email_addresses: Vec<WireEmail>,
    #[serde(default)]
    profile_image_url: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    created_at: Option<i64>,
}

impl From<WireUser> for IdentityRecord {
    fn from(user: WireUser) -> Self {
        let created_at = user.created_at.and_then(|millis| {
            OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
        });
        Self {
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            email_addresses: user
                .email_addresses
                .into_iter()
                .map(|email| email.email_address)
                .collect(),
            profile_image_url: user
                .profile_image_url
                .or(user.image_url)
                .unwrap_or_default(),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn provider(server: &MockServer) -> HttpIdentityProvider {
        let base = Url::parse(&server.url("/v1")).expect("base url");
        HttpIdentityProvider::new(base, "sk_test".to_string(), Duration::from_secs(5))
            .expect("provider")
    }

    #[tokio::test]
    async fn users_by_ids_sends_bearer_and_maps_fields() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/users")
                    .query_param("user_id", "u1")
                    .header("authorization", "Bearer sk_test");
                then.status(200).json_body(json!([{
                    "id": "u1",
                    "username": "u1name",
                    "first_name": "Ada",
                    "email_addresses": [{ "email_address": "ada@example.com" }],
                    "profile_image_url": "https://img.example.com/u1.png",
                    "created_at": 1_700_000_000_000i64,
                    "unused": true
                }]));
            })
            .await;

        let users = provider(&server)
            .users_by_ids(&["u1".to_string()])
            .await
            .expect("users");
        mock.assert_async().await;

        assert_eq!(users.len(), 1);
        let user = &users[0];
        assert_eq!(user.username.as_deref(), Some("u1name"));
        assert_eq!(user.email_addresses, vec!["ada@example.com".to_string()]);
        assert_eq!(user.profile_image_url, "https://img.example.com/u1.png");
        assert_eq!(
            user.created_at.map(|at| at.unix_timestamp()),
            Some(1_700_000_000)
        );
    }

    #[tokio::test]
    async fn user_by_username_returns_none_for_empty_page() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/users")
                    .query_param("username", "ghost");
                then.status(200).json_body(json!([]));
            })
            .await;

        let found = provider(&server)
            .user_by_username("ghost")
            .await
            .expect("lookup");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn rejected_session_token_is_not_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/sessions/verify")
                    .json_body(json!({ "token": "good" }));
                then.status(200).json_body(json!({ "user_id": "u1" }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/sessions/verify")
                    .json_body(json!({ "token": "bad" }));
                then.status(401).body("invalid session");
            })
            .await;

        let provider = provider(&server);
        assert_eq!(
            provider.verify_session("good").await.expect("verify"),
            Some("u1".to_string())
        );
        assert_eq!(provider.verify_session("bad").await.expect("verify"), None);
    }

    #[tokio::test]
    async fn upstream_failure_surfaces_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/users");
                then.status(503).body("maintenance");
            })
            .await;

        let err = provider(&server)
            .users_by_ids(&["u1".to_string()])
            .await
            .expect_err("upstream failure");
        match err {
            IdentityError::Upstream { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let base = normalize_base(Url::parse("https://api.example.com/v1").expect("url"));
        assert_eq!(
            base.join("users").expect("join").as_str(),
            "https://api.example.com/v1/users"
        );
    }
}
