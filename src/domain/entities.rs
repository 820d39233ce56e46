//! Domain entities mirrored from persistent storage and the identity provider.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub author_id: String,
    pub content: String,
    pub created_at: OffsetDateTime,
}

/// A user as reported by the external identity provider.
///
/// Only a subset of these fields is ever shown to other users; see
/// [`crate::application::identity::project_author`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityRecord {
    pub id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_addresses: Vec<String>,
    pub profile_image_url: String,
    pub created_at: Option<OffsetDateTime>,
}
