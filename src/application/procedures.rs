//! Typed procedure router shared by the HTTP transport, page prefetching and tests.

use std::sync::Arc;
use std::time::Instant;

use chirp_api_types::{
    CreatePostInput, ErrorCode, GetPostByIdInput, GetPostsByUserIdInput, GetUserByUsernameInput,
    RpcErrorShape, ValidationIssues, procedures,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::application::identity::SessionUser;
use crate::application::posts::{PostPolicy, PostService, PostServiceError, post_from_record};
use crate::application::profile::{ProfileError, ProfileService};
use crate::application::repos::RepoError;
use crate::cache::{CachedQuery, QueryCache, QueryKey};
use crate::domain::error::DomainError;
use crate::domain::posts::CONTENT_FIELD;

const SOURCE: &str = "application::procedures";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    PostsGetAll,
    PostsGetById,
    PostsGetByUserId,
    PostsCreate,
    ProfileGetUserByUsername,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
    Query,
    Mutation,
}

impl Procedure {
    pub const ALL: [Procedure; 5] = [
        Procedure::PostsGetAll,
        Procedure::PostsGetById,
        Procedure::PostsGetByUserId,
        Procedure::PostsCreate,
        Procedure::ProfileGetUserByUsername,
    ];

    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|procedure| procedure.path() == path)
    }

    pub fn path(self) -> &'static str {
        match self {
            Procedure::PostsGetAll => procedures::POSTS_GET_ALL,
            Procedure::PostsGetById => procedures::POSTS_GET_BY_ID,
            Procedure::PostsGetByUserId => procedures::POSTS_GET_BY_USER_ID,
            Procedure::PostsCreate => procedures::POSTS_CREATE,
            Procedure::ProfileGetUserByUsername => procedures::PROFILE_GET_USER_BY_USERNAME,
        }
    }

    pub fn kind(self) -> ProcedureKind {
        match self {
            Procedure::PostsCreate => ProcedureKind::Mutation,
            _ => ProcedureKind::Query,
        }
    }

    /// Cached queries whose results a successful call of `self` makes stale.
    pub fn invalidates(self) -> &'static [Procedure] {
        match self {
            Procedure::PostsCreate => &[Procedure::PostsGetAll, Procedure::PostsGetByUserId],
            _ => &[],
        }
    }
}

/// Per-call caller context resolved by the transport.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    pub session: Option<SessionUser>,
}

impl CallContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            session: Some(SessionUser {
                user_id: user_id.into(),
            }),
        }
    }
}

/// Failure of a single procedure call, ready to be rendered as an RPC error envelope.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ProcedureError {
    pub code: ErrorCode,
    pub message: String,
    pub validation: Option<ValidationIssues>,
    pub retry_after_secs: Option<u64>,
    /// Internal diagnostic; logged, never sent to callers.
    pub detail: Option<String>,
}

impl ProcedureError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            validation: None,
            retry_after_secs: None,
            detail: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>, issues: ValidationIssues) -> Self {
        Self {
            validation: Some(issues),
            ..Self::new(ErrorCode::BadRequest, message)
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "You must be signed in to do that")
    }

    pub fn method_not_supported(procedure: Procedure) -> Self {
        let expected = match procedure.kind() {
            ProcedureKind::Query => "GET",
            ProcedureKind::Mutation => "POST",
        };
        Self::new(
            ErrorCode::MethodNotSupported,
            format!("Unsupported method for `{}`, use {expected}", procedure.path()),
        )
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self {
            retry_after_secs: Some(retry_after_secs),
            ..Self::new(ErrorCode::TooManyRequests, "You are posting too fast, slow down")
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Self::new(ErrorCode::InternalServerError, "Internal server error")
        }
    }

    pub fn to_shape(&self, path: Option<&str>) -> RpcErrorShape {
        let shape = RpcErrorShape::new(self.code, self.message.clone(), path.map(str::to_string));
        match &self.validation {
            Some(issues) => shape.with_validation(issues.clone()),
            None => shape,
        }
    }
}

impl From<PostServiceError> for ProcedureError {
    fn from(error: PostServiceError) -> Self {
        match error {
            PostServiceError::Validation(DomainError::Validation { field, message }) => {
                ProcedureError::bad_request(message.clone(), ValidationIssues::field(field, message))
            }
            PostServiceError::Validation(DomainError::NotFound { .. })
            | PostServiceError::NotFound => ProcedureError::not_found("Post not found"),
            PostServiceError::RateLimited { retry_after_secs } => {
                ProcedureError::rate_limited(retry_after_secs)
            }
            PostServiceError::Repo(RepoError::InvalidInput { .. }) => {
                let message = "Post was rejected by the store";
                ProcedureError::bad_request(message, ValidationIssues::field(CONTENT_FIELD, message))
            }
            PostServiceError::Repo(err) => ProcedureError::internal(err.to_string()),
            PostServiceError::Identity(err) => ProcedureError::internal(err.to_string()),
        }
    }
}

impl From<ProfileError> for ProcedureError {
    fn from(error: ProfileError) -> Self {
        match error {
            ProfileError::NotFound => ProcedureError::not_found("User not found"),
            ProfileError::Identity(err) => ProcedureError::internal(err.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct ProcedureRouter {
    posts: PostService,
    profiles: ProfileService,
    queries: Arc<QueryCache<ProcedureError>>,
}

impl ProcedureRouter {
    pub fn new(
        posts: PostService,
        profiles: ProfileService,
        queries: Arc<QueryCache<ProcedureError>>,
    ) -> Self {
        Self {
            posts,
            profiles,
            queries,
        }
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    pub fn post_policy(&self) -> PostPolicy {
        self.posts.policy()
    }

    /// Dispatch one call, returning the JSON payload for the success envelope.
    pub async fn call(
        &self,
        procedure: Procedure,
        ctx: &CallContext,
        input: Value,
    ) -> Result<Value, ProcedureError> {
        let started = Instant::now();
        let result = match procedure.kind() {
            ProcedureKind::Query => self.query(procedure, input).await.map(|hit| hit.data),
            ProcedureKind::Mutation => self.mutate(procedure, ctx, input).await,
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.code.as_str(),
        };
        metrics::counter!(
            "chirp_rpc_requests_total",
            "procedure" => procedure.path(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("chirp_rpc_duration_ms", "procedure" => procedure.path())
            .record(started.elapsed().as_secs_f64() * 1000.0);

        if let Err(err) = &result {
            if err.code == ErrorCode::InternalServerError {
                error!(
                    target = SOURCE,
                    procedure = procedure.path(),
                    detail = err.detail.as_deref().unwrap_or_default(),
                    "procedure failed"
                );
            } else {
                debug!(
                    target = SOURCE,
                    procedure = procedure.path(),
                    code = err.code.as_str(),
                    "procedure rejected"
                );
            }
        }
        result
    }

    /// Run a query through the shared query cache.
    ///
    /// Mutations are rejected; use [`ProcedureRouter::call`] for those.
    pub async fn query(
        &self,
        procedure: Procedure,
        input: Value,
    ) -> Result<CachedQuery, ProcedureError> {
        if procedure.kind() != ProcedureKind::Query {
            return Err(ProcedureError::method_not_supported(procedure));
        }

        let key = QueryKey::new(procedure.path(), &input);
        let posts = self.posts.clone();
        let profiles = self.profiles.clone();
        self.queries
            .fetch(key, move || run_query(posts, profiles, procedure, input))
            .await
    }

    async fn mutate(
        &self,
        procedure: Procedure,
        ctx: &CallContext,
        input: Value,
    ) -> Result<Value, ProcedureError> {
        let Some(session) = ctx.session.as_ref() else {
            return Err(ProcedureError::unauthorized());
        };

        let output = match procedure {
            Procedure::PostsCreate => {
                let input: CreatePostInput = parse_input(procedure, input)?;
                let record = self.posts.create(&session.user_id, &input.content).await?;
                to_output(post_from_record(record))?
            }
            other => return Err(ProcedureError::method_not_supported(other)),
        };

        for stale in procedure.invalidates() {
            self.queries.invalidate(stale.path());
        }
        Ok(output)
    }
}

async fn run_query(
    posts: PostService,
    profiles: ProfileService,
    procedure: Procedure,
    input: Value,
) -> Result<Value, ProcedureError> {
    match procedure {
        Procedure::PostsGetAll => to_output(posts.feed().await?),
        Procedure::PostsGetById => {
            let input: GetPostByIdInput = parse_input(procedure, input)?;
            to_output(posts.by_id(&input.id).await?)
        }
        Procedure::PostsGetByUserId => {
            let input: GetPostsByUserIdInput = parse_input(procedure, input)?;
            to_output(posts.by_author(&input.user_id).await?)
        }
        Procedure::ProfileGetUserByUsername => {
            let input: GetUserByUsernameInput = parse_input(procedure, input)?;
            to_output(profiles.by_username(&input.username).await?)
        }
        Procedure::PostsCreate => Err(ProcedureError::method_not_supported(procedure)),
    }
}

/// Decode a procedure input, reporting schema mismatches as `BAD_REQUEST`.
pub fn parse_input<T: DeserializeOwned>(
    procedure: Procedure,
    input: Value,
) -> Result<T, ProcedureError> {
    serde_json::from_value(input).map_err(|err| {
        ProcedureError::bad_request(
            format!("Invalid input for `{}`", procedure.path()),
            ValidationIssues::form(err.to_string()),
        )
    })
}

fn to_output<T: Serialize>(value: T) -> Result<Value, ProcedureError> {
    serde_json::to_value(value).map_err(|err| ProcedureError::internal(err.to_string()))
}
