use std::sync::Arc;

use axum::{
    Extension, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chirp_api_types::{Author, ErrorCode, PostWithAuthor};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::{
    application::{
        error::HttpError,
        prefetch::PrefetchHelper,
        procedures::{CallContext, Procedure, ProcedureError, ProcedureRouter},
        repos::HealthRepo,
    },
    cache::{CachedPage, StaticPageCache},
    presentation::views::{
        ComposerView, ErrorPageView, FeedPartial, FeedView, IndexTemplate, IndexView,
        LayoutChrome, LayoutContext, PageMetaView, PostCard, PostTemplate, ProfileTemplate,
        ProfileView, ViewerView, render_error_page, render_not_found_response, render_template,
        render_template_response,
    },
};

use super::{RouterState, db_health_response};

#[derive(Clone)]
pub struct HttpState {
    pub router: ProcedureRouter,
    pub pages: Arc<StaticPageCache>,
    pub health: Arc<dyn HealthRepo>,
    pub sign_in_url: Option<String>,
}

impl HttpState {
    /// Shell chrome for the caller; the viewer is looked up from the session, if any.
    async fn chrome(&self, ctx: &CallContext) -> LayoutChrome {
        LayoutChrome::new(self.viewer(ctx).await, self.sign_in_url.clone())
    }

    /// Shell chrome shared by every visitor, used for pages kept in the static cache.
    fn anonymous_chrome(&self) -> LayoutChrome {
        LayoutChrome::new(None, self.sign_in_url.clone())
    }

    async fn viewer(&self, ctx: &CallContext) -> Option<ViewerView> {
        let session = ctx.session.as_ref()?;
        match self.router.profiles().by_id(&session.user_id).await {
            Ok(author) => author.map(ViewerView::from),
            Err(err) => {
                warn!(
                    target = "chirp::http::public",
                    user_id = %session.user_id,
                    error = %err,
                    "failed to load viewer profile"
                );
                None
            }
        }
    }
}

pub fn build_public_router() -> Router<RouterState> {
    Router::new()
        .route("/", get(index))
        .route("/ui/feed", get(feed_partial))
        .route("/post/{id}", get(post_detail))
        .route("/_health/db", get(public_health))
        .route("/static/{*path}", get(crate::infra::assets::serve))
        .fallback(fallback_router)
}

async fn index(
    State(state): State<HttpState>,
    Extension(ctx): Extension<CallContext>,
) -> Response {
    let chrome = state.chrome(&ctx).await;
    let mut prefetch = PrefetchHelper::new(state.router.clone());

    let posts: Vec<PostWithAuthor> = match prefetch.fetch(Procedure::PostsGetAll, Value::Null).await
    {
        Ok(posts) => posts,
        Err(err) => return procedure_error_page(chrome, err),
    };

    let composer = chrome.viewer.as_ref().map(|viewer| ComposerView {
        profile_image_url: viewer.profile_image_url.clone(),
        max_chars: state.router.post_policy().max_content_chars,
    });
    let content = IndexView {
        composer,
        feed: FeedView::build(&posts),
    };
    let view = LayoutContext::new(chrome.with_state(&prefetch.dehydrate()), content);
    render_template_response(IndexTemplate { view }, StatusCode::OK)
}

async fn feed_partial(State(state): State<HttpState>) -> Response {
    let posts = match state.router.query(Procedure::PostsGetAll, Value::Null).await {
        Ok(cached) => serde_json::from_value::<Vec<PostWithAuthor>>(cached.data)
            .map_err(|err| ProcedureError::internal(err.to_string())),
        Err(err) => Err(err),
    };

    match posts {
        Ok(posts) => render_template_response(
            FeedPartial {
                feed: FeedView::build(&posts),
            },
            StatusCode::OK,
        ),
        Err(err) => HttpError::from(err).into_response(),
    }
}

/// Single post page, rendered once and then served from the static page cache.
async fn post_detail(State(state): State<HttpState>, Path(id): Path<String>) -> Response {
    if let Some(page) = state.pages.get(&id) {
        debug!(target = "chirp::http::public", post_id = %id, "serving cached post page");
        return Html(page.html.to_string()).into_response();
    }

    let chrome = state.anonymous_chrome();
    let mut prefetch = PrefetchHelper::new(state.router.clone());
    let entry: PostWithAuthor = match prefetch
        .fetch(Procedure::PostsGetById, json!({ "id": id }))
        .await
    {
        Ok(entry) => entry,
        Err(err) => return procedure_error_page(chrome, err),
    };

    let title = format!("{} - @{}", entry.post.content, entry.author.username);
    let chrome = chrome
        .with_meta(PageMetaView::default().with_title(title))
        .with_state(&prefetch.dehydrate());
    let template = PostTemplate {
        view: LayoutContext::new(chrome, ()),
        post: PostCard::build_static(&entry),
    };

    match render_template(template) {
        Ok(Html(html)) => {
            let page = CachedPage::new(html.clone());
            state.pages.insert(id, page);
            Html(html).into_response()
        }
        Err(err) => err.into_response(),
    }
}

/// Profile page for `/@{username}` paths; everything else is a 404 page.
async fn fallback_router(
    State(state): State<HttpState>,
    Extension(ctx): Extension<CallContext>,
    request: Request<Body>,
) -> Response {
    let path = request.uri().path().to_string();
    let chrome = state.chrome(&ctx).await;

    let Some(username) = profile_username(&path) else {
        return render_not_found_response(chrome);
    };

    let mut prefetch = PrefetchHelper::new(state.router.clone());
    let author: Author = match prefetch
        .fetch(
            Procedure::ProfileGetUserByUsername,
            json!({ "username": username }),
        )
        .await
    {
        Ok(author) => author,
        Err(err) => return procedure_error_page(chrome, err),
    };
    let posts: Vec<PostWithAuthor> = match prefetch
        .fetch(Procedure::PostsGetByUserId, json!({ "userId": author.id }))
        .await
    {
        Ok(posts) => posts,
        Err(err) => return procedure_error_page(chrome, err),
    };

    let chrome = chrome
        .with_meta(PageMetaView::default().with_title(format!("@{}", author.username)))
        .with_state(&prefetch.dehydrate());
    let content = ProfileView {
        username: author.username,
        profile_image_url: author.profile_image_url,
        feed: FeedView::build(&posts),
    };
    render_template_response(
        ProfileTemplate {
            view: LayoutContext::new(chrome, content),
        },
        StatusCode::OK,
    )
}

async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.health.health_check().await)
}

fn profile_username(path: &str) -> Option<String> {
    let segment = path.strip_prefix("/@")?;
    let segment = segment.strip_suffix('/').unwrap_or(segment);
    if segment.is_empty() || segment.contains('/') {
        return None;
    }
    let decoded = percent_decode(segment)?;
    (!decoded.trim().is_empty()).then_some(decoded)
}

fn percent_decode(segment: &str) -> Option<String> {
    url::form_urlencoded::parse(format!("u={segment}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
}

fn procedure_error_page(chrome: LayoutChrome, err: ProcedureError) -> Response {
    match err.code {
        ErrorCode::NotFound => render_not_found_response(chrome),
        _ => {
            let status = StatusCode::from_u16(err.code.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                warn!(
                    target = "chirp::http::public",
                    code = err.code.as_str(),
                    detail = err.detail.as_deref().unwrap_or(&err.message),
                    "page prefetch failed"
                );
            }
            render_error_page(chrome, ErrorPageView::unavailable(), status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_paths_yield_usernames() {
        assert_eq!(profile_username("/@u1name").as_deref(), Some("u1name"));
        assert_eq!(profile_username("/@u1name/").as_deref(), Some("u1name"));
        assert_eq!(profile_username("/@caf%C3%A9").as_deref(), Some("café"));
        assert_eq!(profile_username("/@"), None);
        assert_eq!(profile_username("/@a/b"), None);
        assert_eq!(profile_username("/about"), None);
    }
}
