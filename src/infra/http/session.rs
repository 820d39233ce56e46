use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{debug, warn};

use crate::application::{procedures::CallContext, profile::ProfileService};

pub const SESSION_COOKIE: &str = "__session";

/// Resolve the caller's session into a [`CallContext`].
///
/// Missing, rejected or unverifiable tokens leave the request anonymous; mutations then
/// fail with `UNAUTHORIZED` in the procedure router.
pub async fn resolve_session(
    State(profiles): State<ProfileService>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = bearer_token(request.headers())
        .or_else(|| jar.get(SESSION_COOKIE).map(|cookie| cookie.value().to_string()));

    let ctx = match token {
        None => CallContext::anonymous(),
        Some(token) => match profiles.verify_session(&token).await {
            Ok(Some(user_id)) => CallContext::signed_in(user_id),
            Ok(None) => {
                debug!(target = "chirp::http::session", "session token rejected");
                CallContext::anonymous()
            }
            Err(err) => {
                warn!(
                    target = "chirp::http::session",
                    error = %err,
                    "session verification failed, continuing anonymously"
                );
                CallContext::anonymous()
            }
        },
    };

    request.extensions_mut().insert(ctx.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-u1"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-u1"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }
}
