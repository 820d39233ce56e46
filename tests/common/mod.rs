#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use chirp::application::{
    posts::{PostPolicy, PostService},
    procedures::{ProcedureError, ProcedureRouter},
    profile::ProfileService,
    rate_limit::RateLimiter,
    repos::{CreatePostParams, HealthRepo, PostsRepo, PostsWriteRepo, RepoError},
};
use chirp::cache::{QueryCache, StaticPageCache};
use chirp::domain::entities::{IdentityRecord, PostRecord};
use chirp::infra::http::{self, HttpState, RouterState, RpcState};
use chirp::infra::identity::StaticIdentityProvider;
use serde_json::Value;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

/// In-memory post store that counts how often it is read.
#[derive(Default)]
pub struct MemoryStore {
    posts: Mutex<Vec<PostRecord>>,
    reads: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Make every following insert fail with a timeout until switched back.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.posts.lock().expect("store lock").len()
    }

    pub fn seed(&self, author_id: &str, content: &str, created_at: OffsetDateTime) -> Uuid {
        let id = Uuid::new_v4();
        self.posts.lock().expect("store lock").push(PostRecord {
            id,
            author_id: author_id.to_string(),
            content: content.to_string(),
            created_at,
        });
        id
    }

    fn sorted(&self, filter: impl Fn(&PostRecord) -> bool, limit: usize) -> Vec<PostRecord> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut posts: Vec<PostRecord> = self
            .posts
            .lock()
            .expect("store lock")
            .iter()
            .filter(|post| filter(post))
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        posts.truncate(limit);
        posts
    }
}

#[async_trait]
impl PostsRepo for MemoryStore {
    async fn list_recent(&self, limit: usize) -> Result<Vec<PostRecord>, RepoError> {
        Ok(self.sorted(|_| true, limit))
    }

    async fn list_by_author(
        &self,
        author_id: &str,
        limit: usize,
    ) -> Result<Vec<PostRecord>, RepoError> {
        Ok(self.sorted(|post| post.author_id == author_id, limit))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PostRecord>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .posts
            .lock()
            .expect("store lock")
            .iter()
            .find(|post| post.id == id)
            .cloned())
    }
}

#[async_trait]
impl PostsWriteRepo for MemoryStore {
    async fn create_post(&self, params: CreatePostParams) -> Result<PostRecord, RepoError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepoError::Timeout);
        }
        let record = PostRecord {
            id: Uuid::new_v4(),
            author_id: params.author_id,
            content: params.content.into_inner(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.posts
            .lock()
            .expect("store lock")
            .push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl HealthRepo for MemoryStore {
    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }
}

pub fn user(id: &str, username: &str) -> IdentityRecord {
    IdentityRecord {
        id: id.to_string(),
        username: Some(username.to_string()),
        first_name: Some("Private".to_string()),
        last_name: Some("Person".to_string()),
        email_addresses: vec![format!("{id}@example.com")],
        profile_image_url: format!("https://img.example.com/{id}.png"),
        created_at: None,
    }
}

/// Users `u1` (`u1name`, token `tok-u1`) and `u2` (`u2name`, token `tok-u2`).
pub fn identity() -> StaticIdentityProvider {
    StaticIdentityProvider::new()
        .with_user(user("u1", "u1name"))
        .with_user(user("u2", "u2name"))
        .with_session("tok-u1", "u1")
        .with_session("tok-u2", "u2")
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub pages: Arc<StaticPageCache>,
}

pub struct TestOptions {
    pub query_cache: bool,
    pub query_limit: usize,
    pub max_requests: u32,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            query_cache: true,
            query_limit: 64,
            max_requests: 3,
        }
    }
}

pub fn app() -> TestApp {
    app_with(TestOptions::default())
}

pub fn app_with(options: TestOptions) -> TestApp {
    let store = Arc::new(MemoryStore::default());
    let identity = Arc::new(identity());

    let posts = PostService::new(
        store.clone(),
        store.clone(),
        identity.clone(),
        RateLimiter::new(Duration::from_secs(60), options.max_requests),
        PostPolicy::default(),
    );
    let profiles = ProfileService::new(identity);
    let queries = Arc::new(if options.query_cache {
        QueryCache::<ProcedureError>::new(
            true,
            Duration::from_secs(30),
            NonZeroUsize::new(options.query_limit).expect("non-zero"),
        )
    } else {
        QueryCache::<ProcedureError>::disabled()
    });
    let router = ProcedureRouter::new(posts, profiles, queries);
    let pages = Arc::new(StaticPageCache::new(
        NonZeroUsize::new(16).expect("non-zero"),
    ));

    let state = RouterState {
        http: HttpState {
            router: router.clone(),
            pages: pages.clone(),
            health: store.clone(),
            sign_in_url: Some("https://accounts.example.com/sign-in".to_string()),
        },
        rpc: RpcState { router },
    };

    TestApp {
        router: http::build_router(state),
        store,
        pages,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    pub async fn query(&self, path: &str, input: Option<Value>) -> (u16, Value) {
        let uri = match input {
            Some(input) => format!(
                "/api/rpc/{path}?input={}",
                url::form_urlencoded::byte_serialize(input.to_string().as_bytes())
                    .collect::<String>()
            ),
            None => format!("/api/rpc/{path}"),
        };
        let request = Request::get(uri).body(Body::empty()).expect("request");
        json_response(self.send(request).await).await
    }

    pub async fn mutate(&self, path: &str, token: Option<&str>, input: Value) -> (u16, Value) {
        let mut builder = Request::post(format!("/api/rpc/{path}"))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(Body::from(input.to_string()))
            .expect("request");
        json_response(self.send(request).await).await
    }

    pub async fn page(&self, uri: &str) -> (u16, String) {
        let request = Request::get(uri).body(Body::empty()).expect("request");
        let response = self.send(request).await;
        let status = response.status().as_u16();
        (status, body_text(response).await)
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub async fn json_response(response: Response<Body>) -> (u16, Value) {
    let status = response.status().as_u16();
    let text = body_text(response).await;
    let value = serde_json::from_str(&text).expect("json body");
    (status, value)
}
