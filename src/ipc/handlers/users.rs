use crate::auth::{self, AuthError, ROLE_ADMIN, ROLE_USER};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_error, get_required_str, get_str, require_db, store_error};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Collection, Order, Record};
use serde_json::json;

fn handle_profile_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match state.auth.current_profile(conn) {
        Ok(p) => ok(&req.id, json!({ "profile": p })),
        Err(e) => auth_error(req, &e),
    }
}

/// A student may change only their own specialty; the class key follows it.
fn handle_profile_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let specialty = match get_required_str(req, "specialty") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let profile = match state.auth.current_profile(conn) {
        Ok(p) => p,
        Err(e) => return auth_error(req, &e),
    };
    let class = match auth::class_key(&state.config, profile.grade, &specialty) {
        Ok(c) => c,
        Err(e) => return auth_error(req, &e),
    };

    let mut values = Record::new();
    values.insert("specialty".into(), specialty.into());
    values.insert("class".into(), class.into());
    if let Err(e) = store::update(
        conn,
        Collection::UserSpecialties,
        &store::eq("nv_number", profile.nv_number.as_str()),
        &values,
    ) {
        return store_error(req, &e);
    }
    match state.auth.current_profile(conn) {
        Ok(p) => {
            tracing::info!(nv_number = %p.nv_number, specialty = %p.specialty, "profile updated");
            ok(&req.id, json!({ "profile": p }))
        }
        Err(e) => auth_error(req, &e),
    }
}

fn handle_users_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    match store::select(
        conn,
        Collection::UserSpecialties,
        &Record::new(),
        Some(&Order::asc("nv_number")),
    ) {
        Ok(users) => ok(&req.id, json!({ "users": users })),
        Err(e) => store_error(req, &e),
    }
}

/// Admin edit of another user's specialty and/or role.
fn handle_users_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    let nv_number = match get_required_str(req, "nvNumber") {
        Ok(v) => v.to_lowercase(),
        Err(e) => return e,
    };
    let target = match auth::fetch_profile(conn, &nv_number) {
        Ok(Some(p)) => p,
        Ok(None) => return auth_error(req, &AuthError::MissingProfile(nv_number)),
        Err(e) => return auth_error(req, &e),
    };

    let mut values = Record::new();
    if let Some(specialty) = get_str(req, "specialty").filter(|s| !s.is_empty()) {
        let class = match auth::class_key(&state.config, target.grade, &specialty) {
            Ok(c) => c,
            Err(e) => return auth_error(req, &e),
        };
        values.insert("specialty".into(), specialty.into());
        values.insert("class".into(), class.into());
    }
    if let Some(role) = get_str(req, "role").filter(|s| !s.is_empty()) {
        if role != ROLE_ADMIN && role != ROLE_USER {
            return err(
                &req.id,
                "bad_params",
                format!("role must be {ROLE_ADMIN} or {ROLE_USER}"),
                Some(json!({ "role": role })),
            );
        }
        values.insert("role".into(), role.into());
    }
    if values.is_empty() {
        return err(&req.id, "bad_params", "nothing to update: pass specialty or role", None);
    }

    if let Err(e) = store::update(
        conn,
        Collection::UserSpecialties,
        &store::eq("nv_number", nv_number.as_str()),
        &values,
    ) {
        return store_error(req, &e);
    }
    match auth::fetch_profile(conn, &nv_number) {
        Ok(p) => {
            tracing::info!(%nv_number, "user updated by admin");
            ok(&req.id, json!({ "user": p }))
        }
        Err(e) => auth_error(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profile.get" => Some(handle_profile_get(state, req)),
        "profile.update" => Some(handle_profile_update(state, req)),
        "users.list" => Some(handle_users_list(state, req)),
        "users.update" => Some(handle_users_update(state, req)),
        _ => None,
    }
}
