use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chirp_api_types::RpcEnvelope;
use serde_json::Value;

use crate::application::{error::ErrorReport, procedures::ProcedureError};

const SOURCE: &str = "infra::http::rpc";

/// A failed call rendered as an RPC error envelope.
#[derive(Debug)]
pub struct RpcError {
    path: Option<String>,
    error: ProcedureError,
}

impl RpcError {
    pub fn new(path: Option<String>, error: ProcedureError) -> Self {
        Self { path, error }
    }

    pub fn status(&self) -> StatusCode {
        status_for(&self.error)
    }

    pub fn envelope(&self) -> RpcEnvelope<Value> {
        RpcEnvelope::err(self.error.to_shape(self.path.as_deref()))
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        self.error.retry_after_secs
    }

    fn report(&self) -> ErrorReport {
        let detail = self.error.detail.as_deref().unwrap_or(&self.error.message);
        ErrorReport::from_message(
            SOURCE,
            self.status(),
            format!(
                "{} {}: {detail}",
                self.error.code.as_str(),
                self.path.as_deref().unwrap_or("-")
            ),
        )
    }
}

pub(super) fn status_for(error: &ProcedureError) -> StatusCode {
    StatusCode::from_u16(error.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

pub(super) fn set_retry_after(response: &mut Response, retry_after_secs: u64) {
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(RETRY_AFTER, value);
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.envelope())).into_response();
        if let Some(secs) = self.retry_after_secs() {
            set_retry_after(&mut response, secs);
        }
        self.report().attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_response_carries_retry_after_and_report() {
        let response = RpcError::new(
            Some("posts.create".to_string()),
            ProcedureError::rate_limited(42),
        )
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok()),
            Some("42")
        );
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .expect("error report attached");
        assert_eq!(report.source, SOURCE);
    }
}
