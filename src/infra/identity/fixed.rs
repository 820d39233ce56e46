use async_trait::async_trait;

use crate::application::identity::{IdentityError, IdentityProvider};
use crate::config::StaticUser;
use crate::domain::entities::IdentityRecord;

/// Identity provider backed by a fixed user list, for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentityProvider {
    users: Vec<IdentityRecord>,
    sessions: Vec<(String, String)>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(users: &[StaticUser]) -> Self {
        users.iter().fold(Self::new(), |provider, user| {
            let record = IdentityRecord {
                id: user.id.clone(),
                username: user.username.clone(),
                first_name: user.first_name.clone(),
                last_name: user.last_name.clone(),
                email_addresses: user.email.iter().cloned().collect(),
                profile_image_url: user.profile_image_url.clone(),
                created_at: None,
            };
            let provider = provider.with_user(record);
            match &user.session_token {
                Some(token) => provider.with_session(token.clone(), user.id.clone()),
                None => provider,
            }
        })
    }

    pub fn with_user(mut self, user: IdentityRecord) -> Self {
        self.users.retain(|existing| existing.id != user.id);
        self.users.push(user);
        self
    }

    pub fn with_session(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.sessions.push((token.into(), user_id.into()));
        self
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<IdentityRecord>, IdentityError> {
        Ok(self
            .users
            .iter()
            .filter(|user| ids.contains(&user.id))
            .cloned()
            .collect())
    }

    async fn user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<IdentityRecord>, IdentityError> {
        Ok(self
            .users
            .iter()
            .find(|user| user.username.as_deref() == Some(username))
            .cloned())
    }

    async fn verify_session(&self, token: &str) -> Result<Option<String>, IdentityError> {
        Ok(self
            .sessions
            .iter()
            .find(|(candidate, _)| candidate == token)
            .map(|(_, user_id)| user_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, username: Option<&str>, token: Option<&str>) -> StaticUser {
        StaticUser {
            id: id.to_string(),
            username: username.map(str::to_string),
            first_name: None,
            last_name: None,
            email: Some(format!("{id}@example.com")),
            profile_image_url: format!("https://img.example.com/{id}.png"),
            session_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn resolves_users_and_sessions_from_settings() {
        let provider = StaticIdentityProvider::from_settings(&[
            user("u1", Some("u1name"), Some("tok-u1")),
            user("u2", None, None),
        ]);

        let found = provider
            .users_by_ids(&["u2".to_string(), "missing".to_string()])
            .await
            .expect("lookup");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "u2");
        assert_eq!(found[0].email_addresses, vec!["u2@example.com".to_string()]);

        let by_name = provider.user_by_username("u1name").await.expect("lookup");
        assert_eq!(by_name.map(|user| user.id), Some("u1".to_string()));
        assert!(provider.user_by_username("nobody").await.expect("lookup").is_none());

        assert_eq!(
            provider.verify_session("tok-u1").await.expect("verify"),
            Some("u1".to_string())
        );
        assert_eq!(provider.verify_session("forged").await.expect("verify"), None);
    }
}
