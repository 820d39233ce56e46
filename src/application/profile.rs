use std::sync::Arc;

use chirp_api_types::Author;
use thiserror::Error;

use crate::application::identity::{IdentityError, IdentityProvider, project_author};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[derive(Clone)]
pub struct ProfileService {
    identity: Arc<dyn IdentityProvider>,
}

impl ProfileService {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    pub async fn by_username(&self, username: &str) -> Result<Author, ProfileError> {
        let username = username.trim().trim_start_matches('@');
        if username.is_empty() {
            return Err(ProfileError::NotFound);
        }

        self.identity
            .user_by_username(username)
            .await?
            .as_ref()
            .map(project_author)
            .ok_or(ProfileError::NotFound)
    }

    pub async fn by_id(&self, user_id: &str) -> Result<Option<Author>, ProfileError> {
        let users = self.identity.users_by_ids(&[user_id.to_string()]).await?;
        Ok(users
            .iter()
            .find(|user| user.id == user_id)
            .map(project_author))
    }

    pub async fn verify_session(&self, token: &str) -> Result<Option<String>, ProfileError> {
        Ok(self.identity.verify_session(token).await?)
    }
}
