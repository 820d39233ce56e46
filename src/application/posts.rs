use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chirp_api_types::{Author, Post, PostWithAuthor};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::identity::{IdentityError, IdentityProvider, project_author};
use crate::application::rate_limit::RateLimiter;
use crate::application::repos::{CreatePostParams, PostsRepo, PostsWriteRepo, RepoError};
use crate::domain::entities::PostRecord;
use crate::domain::error::DomainError;
use crate::domain::posts::{DEFAULT_FEED_LIMIT, DEFAULT_MAX_CONTENT_CHARS, PostContent};

const SOURCE: &str = "application::posts::PostService";

#[derive(Debug, Error)]
pub enum PostServiceError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("post not found")]
    NotFound,
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

#[derive(Debug, Clone, Copy)]
pub struct PostPolicy {
    pub max_content_chars: usize,
    pub feed_limit: usize,
}

impl Default for PostPolicy {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            feed_limit: DEFAULT_FEED_LIMIT,
        }
    }
}

#[derive(Clone)]
pub struct PostService {
    reader: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    identity: Arc<dyn IdentityProvider>,
    limiter: RateLimiter,
    policy: PostPolicy,
}

impl PostService {
    pub fn new(
        reader: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        identity: Arc<dyn IdentityProvider>,
        limiter: RateLimiter,
        policy: PostPolicy,
    ) -> Self {
        Self {
            reader,
            writer,
            identity,
            limiter,
            policy,
        }
    }

    pub fn policy(&self) -> PostPolicy {
        self.policy
    }

    /// Newest posts across all authors.
    pub async fn feed(&self) -> Result<Vec<PostWithAuthor>, PostServiceError> {
        let records = self.reader.list_recent(self.policy.feed_limit).await?;
        self.attach_authors(records).await
    }

    pub async fn by_author(&self, user_id: &str) -> Result<Vec<PostWithAuthor>, PostServiceError> {
        let records = self
            .reader
            .list_by_author(user_id, self.policy.feed_limit)
            .await?;
        self.attach_authors(records).await
    }

    /// A post whose id is malformed, missing, or whose author no longer resolves is not found.
    pub async fn by_id(&self, id: &str) -> Result<PostWithAuthor, PostServiceError> {
        let Ok(id) = Uuid::parse_str(id.trim()) else {
            return Err(PostServiceError::NotFound);
        };

        let record = self
            .reader
            .find_by_id(id)
            .await?
            .ok_or(PostServiceError::NotFound)?;

        self.attach_authors(vec![record])
            .await?
            .pop()
            .ok_or(PostServiceError::NotFound)
    }

    /// Validate, rate-limit and persist a post for `author_id`.
    ///
    /// Only posts that are actually stored consume rate-limit quota.
    pub async fn create(
        &self,
        author_id: &str,
        raw_content: &str,
    ) -> Result<PostRecord, PostServiceError> {
        let content = PostContent::parse(raw_content, self.policy.max_content_chars)?;

        let decision = self.limiter.check(author_id);
        if !decision.allowed {
            metrics::counter!("chirp_rate_limited_total").increment(1);
            return Err(PostServiceError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            });
        }

        let record = match self
            .writer
            .create_post(CreatePostParams {
                author_id: author_id.to_string(),
                content,
            })
            .await
        {
            Ok(record) => record,
            Err(err) => {
                self.limiter.release(author_id, &decision);
                return Err(err.into());
            }
        };

        metrics::counter!("chirp_posts_created_total").increment(1);
        info!(
            target = SOURCE,
            post_id = %record.id,
            author_id = %record.author_id,
            remaining = decision.remaining,
            "post created"
        );
        Ok(record)
    }

    async fn attach_authors(
        &self,
        records: Vec<PostRecord>,
    ) -> Result<Vec<PostWithAuthor>, PostServiceError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = records
            .iter()
            .map(|record| record.author_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let authors: HashMap<String, Author> = self
            .identity
            .users_by_ids(&ids)
            .await?
            .iter()
            .map(|user| (user.id.clone(), project_author(user)))
            .collect();

        let mut joined = Vec::with_capacity(records.len());
        for record in records {
            match authors.get(&record.author_id) {
                Some(author) => joined.push(PostWithAuthor {
                    post: post_from_record(record),
                    author: author.clone(),
                }),
                None => warn!(
                    target = SOURCE,
                    post_id = %record.id,
                    author_id = %record.author_id,
                    "skipping post whose author is unknown to the identity provider"
                ),
            }
        }
        Ok(joined)
    }
}

pub fn post_from_record(record: PostRecord) -> Post {
    Post {
        id: record.id,
        author_id: record.author_id,
        content: record.content,
        created_at: record.created_at,
    }
}
