//! Identity provider seam and the public profile projection.

use async_trait::async_trait;
use chirp_api_types::Author;
use thiserror::Error;

use crate::domain::entities::IdentityRecord;

#[derive(Debug, Clone, Error)]
pub enum IdentityError {
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("identity provider responded with status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("identity provider payload could not be decoded: {0}")]
    Decode(String),
}

/// Caller identity established from a verified session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up users by id. Unknown ids are omitted from the result.
    async fn users_by_ids(&self, ids: &[String]) -> Result<Vec<IdentityRecord>, IdentityError>;

    async fn user_by_username(
        &self,
        username: &str,
    ) -> Result<Option<IdentityRecord>, IdentityError>;

    /// Resolve a session token to the signed-in user id, `None` when the token is not valid.
    async fn verify_session(&self, token: &str) -> Result<Option<String>, IdentityError>;
}

/// Reduce an identity record to the fields that are safe to show other users.
pub fn project_author(record: &IdentityRecord) -> Author {
    Author {
        id: record.id.clone(),
        username: record
            .username
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| record.id.clone()),
        profile_image_url: record.profile_image_url.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: Option<&str>) -> IdentityRecord {
        IdentityRecord {
            id: "user_1".to_string(),
            username: username.map(str::to_string),
            first_name: Some("Ada".to_string()),
            last_name: Some("Lovelace".to_string()),
            email_addresses: vec!["ada@example.com".to_string()],
            profile_image_url: "https://img.example.com/ada.png".to_string(),
            created_at: None,
        }
    }

    #[test]
    fn projection_drops_private_fields() {
        let author = project_author(&record(Some("ada")));
        assert_eq!(
            author,
            Author {
                id: "user_1".to_string(),
                username: "ada".to_string(),
                profile_image_url: "https://img.example.com/ada.png".to_string(),
            }
        );
        let json = serde_json::to_string(&author).expect("serialize");
        assert!(!json.contains("ada@example.com"));
        assert!(!json.contains("Lovelace"));
    }

    #[test]
    fn projection_falls_back_to_id_without_username() {
        assert_eq!(project_author(&record(None)).username, "user_1");
        assert_eq!(project_author(&record(Some(""))).username, "user_1");
    }
}
