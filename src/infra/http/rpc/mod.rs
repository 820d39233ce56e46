//! JSON-RPC style transport for the procedure router.
//!
//! Queries are served by `GET /api/rpc/{path}?input=<json>`, mutations by
//! `POST /api/rpc/{path}` with a JSON body. `?batch=1` accepts a comma separated
//! list of paths and an input object keyed by call position.

mod error;
mod handlers;
mod input;

pub use error::RpcError;
pub use input::{RpcCall, RpcMethod};

use axum::{Router, routing::get};

use crate::application::procedures::ProcedureRouter;
use crate::infra::http::RouterState;

#[derive(Clone)]
pub struct RpcState {
    pub router: ProcedureRouter,
}

pub fn build_rpc_router() -> Router<RouterState> {
    Router::new().route(
        "/api/rpc/{path}",
        get(handlers::rpc_get)
            .post(handlers::rpc_post)
            .fallback(handlers::rpc_unsupported_method),
    )
}
