use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_error, get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Feeds are only readable with a session, so their timer ends with it.
fn stop_feeds(state: &mut AppState) {
    if let Some(t) = state.feed_ticker.take() {
        t.cancel();
    }
}

fn handle_sign_up(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match get_required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let specialty = match get_required_str(req, "specialty") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Passwords are taken verbatim; surrounding spaces count.
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    match state
        .auth
        .sign_up(conn, &state.config, &email, password, &specialty)
    {
        Ok((session, profile)) => ok(&req.id, json!({ "session": session, "profile": profile })),
        Err(e) => auth_error(req, &e),
    }
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let email = match get_required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing password", None);
    };

    let session = match state.auth.sign_in(conn, &state.config, &email, password) {
        Ok(s) => s,
        Err(e) => return auth_error(req, &e),
    };
    let profile = state.auth.current_profile(conn).ok();
    ok(&req.id, json!({ "session": session, "profile": profile }))
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    stop_feeds(state);
    let was = state.auth.sign_out();
    ok(&req.id, json!({ "signedOut": was }))
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "session": state.auth.session() }))
}

fn handle_update_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing password", None);
    };
    if let Err(e) = state.auth.update_password(conn, &state.config, password) {
        return auth_error(req, &e);
    }
    stop_feeds(state);
    ok(&req.id, json!({ "updated": true, "signedOut": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signUp" => Some(handle_sign_up(state, req)),
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        "auth.updatePassword" => Some(handle_update_password(state, req)),
        _ => None,
    }
}
