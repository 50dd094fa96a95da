use crate::deadlines::{self, DeadlineStatus, EventFilter};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_error, get_str, require_db, store_error, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Collection, Record};
use chrono::Utc;
use serde_json::json;

fn parse_filter(req: &Request) -> HandlerResult<EventFilter> {
    let majors = match req.params.get("majors") {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(_) => return Err(err(&req.id, "bad_params", "majors must be an array", None)),
    };
    let grade = get_str(req, "grade").filter(|g| !g.is_empty() && g != "all");
    let status = match get_str(req, "status").filter(|s| !s.is_empty() && s != "all") {
        Some(label) => Some(DeadlineStatus::parse(&label).ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("unknown status {label}"),
                Some(json!({ "status": label })),
            )
        })?),
        None => None,
    };
    Ok(EventFilter {
        majors,
        grade,
        status,
    })
}

/// Assignments and quizzes merged into one date-ordered list.
fn handle_events(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_session() {
        return auth_error(req, &e);
    }
    let filter = match parse_filter(req) {
        Ok(f) => f,
        Err(e) => return e,
    };
    let now = match get_str(req, "now") {
        Some(raw) => match deadlines::parse_instant(&raw) {
            Some(t) => t,
            None => return err(&req.id, "malformed_time", format!("cannot read now {raw:?}"), None),
        },
        None => Utc::now(),
    };

    let all = Record::new();
    let assignments = match store::select(conn, Collection::Assignments, &all, None) {
        Ok(r) => r,
        Err(e) => return store_error(req, &e),
    };
    let quizzes = match store::select(conn, Collection::Quizzes, &all, None) {
        Ok(r) => r,
        Err(e) => return store_error(req, &e),
    };
    let events = deadlines::merged_events(&assignments, &quizzes, now, &state.config.deadlines, &filter);
    ok(&req.id, json!({ "events": events }))
}

/// Filters a student starts with: their own major and grade, any status.
fn handle_defaults(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let profile = match state.auth.current_profile(conn) {
        Ok(p) => p,
        Err(e) => return auth_error(req, &e),
    };
    let majors: Vec<String> = state
        .config
        .specialty_by_name(&profile.specialty)
        .map(|s| vec![s.code.clone()])
        .unwrap_or_default();
    ok(
        &req.id,
        json!({
            "majors": majors,
            "grade": format!("grade{}", profile.grade),
            "status": "all",
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.events" => Some(handle_events(state, req)),
        "calendar.defaults" => Some(handle_defaults(state, req)),
        _ => None,
    }
}
