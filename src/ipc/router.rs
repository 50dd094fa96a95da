use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    tracing::debug!(id = %req.id, method = %req.method, "request");
    let resp = dispatch(state, &req);
    if let Some(code) = resp
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
    {
        tracing::info!(id = %req.id, method = %req.method, code, "request failed");
    }
    resp
}

fn dispatch(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::gpa::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::schedule::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::auth::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::users::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::records::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::calendar::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::store::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::feeds::try_handle(state, req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
