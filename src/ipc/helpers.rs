use crate::auth::AuthError;
use crate::clock::ClockError;
use crate::estimator::EstimateError;
use crate::ipc::error::err;
use crate::ipc::types::Request;
use crate::store::{Record, StoreError};
use rusqlite::Connection;
use serde_json::json;

pub type HandlerResult<T> = Result<T, serde_json::Value>;

pub fn get_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

pub fn get_required_str(req: &Request, key: &str) -> HandlerResult<String> {
    match get_str(req, key) {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(err(&req.id, "bad_params", format!("{key} must not be empty"), None)),
        None => Err(err(&req.id, "bad_params", format!("missing {key}"), None)),
    }
}

pub fn get_u64(req: &Request, key: &str) -> HandlerResult<Option<u64>> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| err(&req.id, "bad_params", format!("{key} must be a non-negative integer"), None)),
    }
}

/// Object-valued parameter; absent means empty.
pub fn get_record(req: &Request, key: &str) -> HandlerResult<Record> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(Record::new()),
        Some(serde_json::Value::Object(m)) => Ok(m.clone()),
        Some(_) => Err(err(&req.id, "bad_params", format!("{key} must be an object"), None)),
    }
}

/// Takes the field rather than the whole state so `state.auth` stays free
/// for a mutable borrow.
pub fn require_db<'a>(db: &'a Option<Connection>, req: &Request) -> HandlerResult<&'a Connection> {
    db.as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn auth_error(req: &Request, e: &AuthError) -> serde_json::Value {
    let code = match e {
        AuthError::BadEmailDomain(_)
        | AuthError::UnknownCohort(_)
        | AuthError::UnknownSpecialty(_)
        | AuthError::WeakPassword(_) => "bad_params",
        AuthError::InvalidCredentials | AuthError::AccountExists(_) => "auth_failed",
        AuthError::NotSignedIn => "not_signed_in",
        AuthError::Forbidden => "forbidden",
        AuthError::MissingProfile(_) => "not_found",
        AuthError::Store(inner) => return store_error(req, inner),
        AuthError::Db(_) => "db_query_failed",
    };
    if code.starts_with("db_") {
        tracing::error!(method = %req.method, error = %e, "auth store failure");
    }
    err(&req.id, code, e.to_string(), None)
}

pub fn store_error(req: &Request, e: &StoreError) -> serde_json::Value {
    match e {
        StoreError::UnknownCollection(name) => err(
            &req.id,
            "bad_params",
            e.to_string(),
            Some(json!({ "collection": name })),
        ),
        StoreError::UnknownColumn { collection, column } => err(
            &req.id,
            "bad_params",
            e.to_string(),
            Some(json!({ "collection": collection, "column": column })),
        ),
        StoreError::UnsupportedValue { .. }
        | StoreError::UnfilteredWrite { .. }
        | StoreError::EmptyRecord => err(&req.id, "bad_params", e.to_string(), None),
        StoreError::Db(inner) => {
            tracing::error!(method = %req.method, error = %inner, "store query failed");
            let code = if req.method.ends_with(".insert") || req.method.ends_with(".create") {
                "db_insert_failed"
            } else {
                "db_query_failed"
            };
            err(&req.id, code, inner.to_string(), None)
        }
    }
}

pub fn clock_error(req: &Request, e: &ClockError) -> serde_json::Value {
    err(&req.id, "malformed_time", e.to_string(), None)
}

pub fn estimate_error(req: &Request, e: &EstimateError) -> serde_json::Value {
    match e {
        EstimateError::InvertedRange { min, max } | EstimateError::RangeTooWide { min, max } => err(
            &req.id,
            "invalid_range",
            e.to_string(),
            Some(json!({ "min": min, "max": max })),
        ),
    }
}
