use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chirp_api_types::{ErrorCode, RpcEnvelope};
use serde_json::Value;

use crate::application::error::ErrorReport;
use crate::application::procedures::{CallContext, Procedure, ProcedureError, ProcedureKind};

use super::RpcState;
use super::error::{RpcError, set_retry_after, status_for};
use super::input::{RpcCall, RpcMethod, RpcQuery, decode_raw_input, split_calls};

pub async fn rpc_get(
    State(state): State<RpcState>,
    Extension(ctx): Extension<CallContext>,
    Path(path): Path<String>,
    Query(query): Query<RpcQuery>,
) -> Response {
    let input = decode_raw_input(query.input.as_deref());
    dispatch(&state, &ctx, RpcMethod::Get, &path, query.is_batch(), input).await
}

pub async fn rpc_post(
    State(state): State<RpcState>,
    Extension(ctx): Extension<CallContext>,
    Path(path): Path<String>,
    Query(query): Query<RpcQuery>,
    body: Bytes,
) -> Response {
    let input = std::str::from_utf8(&body)
        .map_err(|_| ProcedureError::parse("Request body is not valid UTF-8"))
        .and_then(|text| decode_raw_input(Some(text)));
    dispatch(&state, &ctx, RpcMethod::Post, &path, query.is_batch(), input).await
}

pub async fn rpc_unsupported_method(Path(path): Path<String>) -> Response {
    RpcError::new(
        Some(path),
        ProcedureError::new(
            ErrorCode::MethodNotSupported,
            "Only GET and POST are supported",
        ),
    )
    .into_response()
}

async fn dispatch(
    state: &RpcState,
    ctx: &CallContext,
    method: RpcMethod,
    paths: &str,
    batch: bool,
    input: Result<Value, ProcedureError>,
) -> Response {
    let calls = match input.and_then(|input| split_calls(paths, batch, input)) {
        Ok(calls) => calls,
        Err(err) => return RpcError::new(None, err).into_response(),
    };

    if !batch {
        let Some(call) = calls.into_iter().next() else {
            return RpcError::new(None, ProcedureError::parse("Empty request")).into_response();
        };
        let path = call.path.clone();
        return match invoke(state, ctx, method, call).await {
            Ok(data) => Json(RpcEnvelope::ok(data)).into_response(),
            Err(err) => RpcError::new(Some(path), err).into_response(),
        };
    }

    let mut envelopes = Vec::with_capacity(calls.len());
    let mut failures = Vec::new();
    let mut retry_after = None;
    for call in calls {
        let path = call.path.clone();
        match invoke(state, ctx, method, call).await {
            Ok(data) => envelopes.push(RpcEnvelope::ok(data)),
            Err(err) => {
                if let Some(secs) = err.retry_after_secs {
                    retry_after = Some(retry_after.map_or(secs, |prev: u64| prev.max(secs)));
                }
                failures.push(format!("{} {}: {}", err.code.as_str(), path, err.message));
                let error = RpcError::new(Some(path), err);
                envelopes.push(error.envelope());
            }
        }
    }

    let status = if failures.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    let mut response = (status, Json(envelopes)).into_response();
    if let Some(secs) = retry_after {
        set_retry_after(&mut response, secs);
    }
    if !failures.is_empty() {
        ErrorReport {
            source: "infra::http::rpc::batch",
            status,
            messages: failures,
        }
        .attach(&mut response);
    }
    response
}

async fn invoke(
    state: &RpcState,
    ctx: &CallContext,
    method: RpcMethod,
    call: RpcCall,
) -> Result<Value, ProcedureError> {
    let procedure = Procedure::from_path(&call.path).ok_or_else(|| {
        ProcedureError::not_found(format!("No procedure found on path `{}`", call.path))
    })?;

    let allowed = matches!(
        (procedure.kind(), method),
        (ProcedureKind::Query, RpcMethod::Get) | (ProcedureKind::Mutation, RpcMethod::Post)
    );
    if !allowed {
        return Err(ProcedureError::method_not_supported(procedure));
    }

    state.router.call(procedure, ctx, call.input).await
}
