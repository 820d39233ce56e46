use crate::application::error::{ErrorReport, HttpError};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use chirp_api_types::{Author, PostWithAuthor};
use thiserror::Error;
use time::{
    OffsetDateTime, format_description::BorrowedFormatItem, format_description::well_known::Rfc3339,
    macros::format_description,
};

use crate::application::prefetch::DehydratedState;

pub const SITE_TITLE: &str = "Chirp";
pub const SITE_DESCRIPTION: &str = "emoji twitter alternative";

const ABSOLUTE_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[month repr:short] [day padding:none], [year] [hour]:[minute] UTC");

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(chrome: LayoutChrome) -> Response {
    render_error_page(chrome, ErrorPageView::not_found(), StatusCode::NOT_FOUND)
}

/// Full-page error with the layout chrome; the report feeds the response logger.
pub fn render_error_page(chrome: LayoutChrome, page: ErrorPageView, status: StatusCode) -> Response {
    let detail = page.title.clone();
    let view = LayoutContext::new(chrome, page);
    let mut response = render_template_response(ErrorTemplate { view }, status);
    ErrorReport::from_message("presentation::views::render_error_page", status, detail)
        .attach(&mut response);
    response
}

/// The signed-in user as shown in the shell and the composer.
#[derive(Clone)]
pub struct ViewerView {
    pub username: String,
    pub profile_image_url: String,
}

impl From<Author> for ViewerView {
    fn from(author: Author) -> Self {
        Self {
            username: author.username,
            profile_image_url: author.profile_image_url,
        }
    }
}

#[derive(Clone)]
pub struct PageMetaView {
    pub title: String,
    pub description: String,
}

impl Default for PageMetaView {
    fn default() -> Self {
        Self {
            title: SITE_TITLE.to_string(),
            description: SITE_DESCRIPTION.to_string(),
        }
    }
}

impl PageMetaView {
    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..self
        }
    }
}

/// Everything the app shell needs besides the page body.
#[derive(Clone, Default)]
pub struct LayoutChrome {
    pub meta: PageMetaView,
    pub viewer: Option<ViewerView>,
    pub sign_in_url: Option<String>,
    /// Dehydrated query state, already escaped for an inline script element.
    pub state_json: String,
}

impl LayoutChrome {
    pub fn new(viewer: Option<ViewerView>, sign_in_url: Option<String>) -> Self {
        Self {
            meta: PageMetaView::default(),
            viewer,
            sign_in_url,
            state_json: DehydratedState::default().to_script_json(),
        }
    }

    pub fn with_meta(self, meta: PageMetaView) -> Self {
        Self { meta, ..self }
    }

    pub fn with_state(self, state: &DehydratedState) -> Self {
        Self {
            state_json: state.to_script_json(),
            ..self
        }
    }
}

pub struct LayoutContext<T> {
    pub meta: PageMetaView,
    pub viewer: Option<ViewerView>,
    pub sign_in_url: Option<String>,
    pub state_json: String,
    pub content: T,
}

impl<T> LayoutContext<T> {
    pub fn new(chrome: LayoutChrome, content: T) -> Self {
        Self {
            meta: chrome.meta,
            viewer: chrome.viewer,
            sign_in_url: chrome.sign_in_url,
            state_json: chrome.state_json,
            content,
        }
    }
}

#[derive(Clone)]
pub struct PostCard {
    pub id: String,
    pub href: String,
    pub content: String,
    pub author_username: String,
    pub author_href: String,
    pub author_image_url: String,
    pub iso_date: String,
    /// Text inside the `<time>` element; the browser script replaces it with a live age.
    pub display_time: String,
}

impl PostCard {
    pub fn build(entry: &PostWithAuthor, now: OffsetDateTime) -> Self {
        let PostWithAuthor { post, author } = entry;
        Self {
            id: post.id.to_string(),
            href: format!("/post/{}", post.id),
            content: post.content.clone(),
            author_username: author.username.clone(),
            author_href: format!("/@{}", author.username),
            author_image_url: author.profile_image_url.clone(),
            iso_date: post.created_at.format(&Rfc3339).unwrap_or_default(),
            display_time: relative_time(post.created_at, now),
        }
    }

    /// Card for pages kept in the static cache, showing the absolute UTC date instead of
    /// an age that would go stale.
    pub fn build_static(entry: &PostWithAuthor) -> Self {
        let created_at = entry.post.created_at.to_offset(time::UtcOffset::UTC);
        Self {
            display_time: created_at.format(ABSOLUTE_DATE).unwrap_or_default(),
            ..Self::build(entry, created_at)
        }
    }
}

pub struct FeedView {
    pub posts: Vec<PostCard>,
}

impl FeedView {
    pub fn build(entries: &[PostWithAuthor]) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            posts: entries
                .iter()
                .map(|entry| PostCard::build(entry, now))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}

pub struct ComposerView {
    pub profile_image_url: String,
    pub max_chars: usize,
}

pub struct IndexView {
    pub composer: Option<ComposerView>,
    pub feed: FeedView,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub view: LayoutContext<IndexView>,
}

#[derive(Template)]
#[template(path = "partials/feed.html")]
pub struct FeedPartial {
    pub feed: FeedView,
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub view: LayoutContext<()>,
    pub post: PostCard,
}

pub struct ProfileView {
    pub username: String,
    pub profile_image_url: String,
    pub feed: FeedView,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub view: LayoutContext<ProfileView>,
}

pub struct ErrorPageView {
    pub title: String,
    pub message: String,
    pub primary_action: Option<ErrorAction>,
}

impl ErrorPageView {
    pub fn not_found() -> Self {
        Self {
            title: "Page Not Found".to_string(),
            message: "Nothing chirped here. Head back to the feed to keep scrolling.".to_string(),
            primary_action: Some(ErrorAction::home()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            title: "Something went wrong".to_string(),
            message: "The feed could not be loaded right now. Please try again later.".to_string(),
            primary_action: Some(ErrorAction::home()),
        }
    }
}

pub struct ErrorAction {
    pub href: String,
    pub label: String,
}

impl ErrorAction {
    pub fn home() -> Self {
        Self {
            href: "/".to_string(),
            label: "Back to the feed".to_string(),
        }
    }
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub view: LayoutContext<ErrorPageView>,
}

/// Humanized age of a post, e.g. `"a few seconds ago"` or `"3 hours ago"`.
pub fn relative_time(then: OffsetDateTime, now: OffsetDateTime) -> String {
    const MINUTE: f64 = 60.0;
    const HOUR: f64 = 60.0 * MINUTE;
    const DAY: f64 = 24.0 * HOUR;

    let seconds = (now - then).as_seconds_f64();
    let (future, seconds) = if seconds < 0.0 {
        (true, -seconds)
    } else {
        (false, seconds)
    };

    let phrase = if seconds < 45.0 {
        "a few seconds".to_string()
    } else if seconds < 90.0 {
        "a minute".to_string()
    } else if seconds < 45.0 * MINUTE {
        format!("{} minutes", (seconds / MINUTE).round() as i64)
    } else if seconds < 90.0 * MINUTE {
        "an hour".to_string()
    } else if seconds < 22.0 * HOUR {
        format!("{} hours", (seconds / HOUR).round() as i64)
    } else if seconds < 36.0 * HOUR {
        "a day".to_string()
    } else if seconds < 26.0 * DAY {
        format!("{} days", (seconds / DAY).round() as i64)
    } else if seconds < 46.0 * DAY {
        "a month".to_string()
    } else if seconds < 320.0 * DAY {
        format!("{} months", (seconds / (30.0 * DAY)).round() as i64)
    } else if seconds < 548.0 * DAY {
        "a year".to_string()
    } else {
        format!("{} years", (seconds / (365.0 * DAY)).round() as i64)
    };

    if future {
        format!("in {phrase}")
    } else {
        format!("{phrase} ago")
    }
}
