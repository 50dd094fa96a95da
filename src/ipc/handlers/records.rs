//! Typed views over the two deadline collections.
//!
//! Assignments and quizzes share one shape: a name, a due instant and a
//! grouping column (a major for assignments, a class code for quizzes).
//! Dates are normalized to UTC on the way in.

use crate::config::{AppConfig, DeadlineSettings};
use crate::deadlines::{self, DeadlineStatus};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_error, get_required_str, get_str, require_db, store_error};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Collection, Order, Record};
use chrono::Utc;
use serde_json::json;

struct Kind {
    collection: Collection,
    noun: &'static str,
    /// (wire param, column)
    date: (&'static str, &'static str),
    group: (&'static str, &'static str),
    /// Whether the group may be `global` (visible to every major).
    allows_global: bool,
}

const ASSIGNMENTS: Kind = Kind {
    collection: Collection::Assignments,
    noun: "assignment",
    date: ("dueDate", "due_date"),
    group: ("major", "major"),
    allows_global: true,
};

const QUIZZES: Kind = Kind {
    collection: Collection::Quizzes,
    noun: "quiz",
    date: ("date", "date"),
    group: ("class", "class"),
    allows_global: false,
};

fn with_status(settings: &DeadlineSettings, kind: &Kind, mut rec: Record) -> Record {
    let status = rec
        .get(kind.date.1)
        .and_then(|v| v.as_str())
        .and_then(deadlines::parse_instant)
        .map(|at| deadlines::status_at(at, Utc::now(), settings));
    rec.insert(
        "status".into(),
        status.map(|s| json!(s)).unwrap_or(serde_json::Value::Null),
    );
    rec
}

fn handle_list(kind: &Kind, state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_session() {
        return auth_error(req, &e);
    }

    let mut filters = Record::new();
    if let Some(g) = get_str(req, kind.group.0).filter(|s| !s.is_empty()) {
        filters.insert(kind.group.1.into(), g.into());
    }
    if let Some(g) = get_str(req, "grade").filter(|s| !s.is_empty() && s != "all") {
        filters.insert("grade".into(), g.into());
    }
    let status = match get_str(req, "status").filter(|s| !s.is_empty() && s != "all") {
        Some(label) => match DeadlineStatus::parse(&label) {
            Some(s) => Some(s),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown status {label}"),
                    Some(json!({ "status": label })),
                )
            }
        },
        None => None,
    };

    let rows = match store::select(conn, kind.collection, &filters, Some(&Order::asc(kind.date.1))) {
        Ok(r) => r,
        Err(e) => return store_error(req, &e),
    };
    let rows: Vec<Record> = rows
        .into_iter()
        .map(|r| with_status(&state.config.deadlines, kind, r))
        .filter(|r| match status {
            Some(s) => r.get("status") == Some(&json!(s)),
            None => true,
        })
        .collect();
    ok(&req.id, json!({ (kind.collection.table()): rows }))
}

/// Reads the writable fields from params. `partial` allows omissions.
fn fields(kind: &Kind, cfg: &AppConfig, req: &Request, partial: bool) -> Result<Record, serde_json::Value> {
    let mut rec = Record::new();
    let mut take = |param: &str, column: &str| -> Result<(), serde_json::Value> {
        match get_str(req, param).filter(|s| !s.is_empty()) {
            Some(v) => {
                rec.insert(column.to_string(), v.into());
                Ok(())
            }
            None if partial => Ok(()),
            None => Err(err(&req.id, "bad_params", format!("missing {param}"), None)),
        }
    };
    take("name", "name")?;
    take(kind.date.0, kind.date.1)?;
    take(kind.group.0, kind.group.1)?;

    if let Some(code) = rec.get(kind.group.1).and_then(|v| v.as_str()) {
        let global = kind.allows_global && code == deadlines::GLOBAL_MAJOR;
        if !global && cfg.specialty_by_code(code).is_none() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("unknown {} {code}", kind.group.0),
                Some(json!({ (kind.group.0): code })),
            ));
        }
    }

    if let Some(raw) = rec.get(kind.date.1).and_then(|v| v.as_str()).map(|s| s.to_string()) {
        match deadlines::normalize_instant(&raw) {
            Some(n) => {
                rec.insert(kind.date.1.into(), n.into());
            }
            None => {
                return Err(err(
                    &req.id,
                    "malformed_time",
                    format!("cannot read {} {raw:?}", kind.date.0),
                    None,
                ))
            }
        }
    }
    match req.params.get("grade") {
        Some(serde_json::Value::String(g)) if !g.trim().is_empty() => {
            rec.insert("grade".into(), g.trim().into());
        }
        Some(serde_json::Value::Null) if partial => {
            rec.insert("grade".into(), serde_json::Value::Null);
        }
        _ => {}
    }
    Ok(rec)
}

fn handle_create(kind: &Kind, state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    let rec = match fields(kind, &state.config, req, false) {
        Ok(r) => r,
        Err(e) => return e,
    };
    match store::insert(conn, kind.collection, &rec) {
        Ok(stored) => {
            tracing::info!(collection = kind.collection.table(), id = ?stored.get("id"), "record created");
            ok(&req.id, json!({ (kind.noun): with_status(&state.config.deadlines, kind, stored) }))
        }
        Err(e) => store_error(req, &e),
    }
}

fn handle_update(kind: &Kind, state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    let id = match get_required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let values = match fields(kind, &state.config, req, true) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let filter = store::eq("id", id.as_str());
    match store::update(conn, kind.collection, &filter, &values) {
        Ok(0) => err(&req.id, "not_found", format!("{} not found", kind.noun), Some(json!({ "id": id }))),
        Ok(_) => match store::select_one(conn, kind.collection, &filter) {
            Ok(Some(r)) => ok(&req.id, json!({ (kind.noun): with_status(&state.config.deadlines, kind, r) })),
            Ok(None) => err(&req.id, "not_found", format!("{} not found", kind.noun), Some(json!({ "id": id }))),
            Err(e) => store_error(req, &e),
        },
        Err(e) => store_error(req, &e),
    }
}

fn handle_delete(kind: &Kind, state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    let id = match get_required_str(req, "id") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match store::delete(conn, kind.collection, &store::eq("id", id.as_str())) {
        Ok(0) => err(&req.id, "not_found", format!("{} not found", kind.noun), Some(json!({ "id": id }))),
        Ok(_) => {
            tracing::info!(collection = kind.collection.table(), %id, "record deleted");
            ok(&req.id, json!({ "deleted": id }))
        }
        Err(e) => store_error(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (kind, op) = match req.method.split_once('.') {
        Some(("assignments", op)) => (&ASSIGNMENTS, op),
        Some(("quizzes", op)) => (&QUIZZES, op),
        _ => return None,
    };
    match op {
        "list" => Some(handle_list(kind, state, req)),
        "create" => Some(handle_create(kind, state, req)),
        "update" => Some(handle_update(kind, state, req)),
        "delete" => Some(handle_delete(kind, state, req)),
        _ => None,
    }
}
