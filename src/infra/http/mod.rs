mod middleware;
mod public;
pub mod rpc;
mod session;

pub use public::HttpState;
pub use rpc::RpcState;
pub use session::SESSION_COOKIE;

use axum::Router;
use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::middleware as axum_middleware;
use axum::response::{IntoResponse, Response};

use crate::application::error::ErrorReport;
use crate::application::profile::ProfileService;
use crate::application::repos::RepoError;

use middleware::{log_responses, set_request_context};
use session::resolve_session;

fn db_health_response(result: Result<(), RepoError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

#[derive(Clone)]
pub struct RouterState {
    pub http: HttpState,
    pub rpc: RpcState,
}

impl FromRef<RouterState> for HttpState {
    fn from_ref(state: &RouterState) -> Self {
        state.http.clone()
    }
}

impl FromRef<RouterState> for RpcState {
    fn from_ref(state: &RouterState) -> Self {
        state.rpc.clone()
    }
}

impl FromRef<RouterState> for ProfileService {
    fn from_ref(state: &RouterState) -> Self {
        state.rpc.router.profiles().clone()
    }
}

/// Assemble the page routes and the RPC transport behind the shared middleware stack.
pub fn build_router(state: RouterState) -> Router {
    let profiles = ProfileService::from_ref(&state);

    public::build_public_router()
        .merge(rpc::build_rpc_router())
        .with_state(state)
        .layer(axum_middleware::from_fn_with_state(profiles, resolve_session))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
