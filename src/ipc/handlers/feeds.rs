use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_error, get_u64, require_db, store_error};
use crate::ipc::types::{AppState, Request};
use crate::poll::Ticker;
use crate::store::{self, Collection, Order, Record, StoreError};
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;
use serde_json::json;
use std::time::Duration;

/// Full replacement snapshot of both deadline collections.
fn snapshot(conn: &Connection) -> Result<serde_json::Value, StoreError> {
    let all = Record::new();
    let assignments = store::select(conn, Collection::Assignments, &all, Some(&Order::asc("due_date")))?;
    let quizzes = store::select(conn, Collection::Quizzes, &all, Some(&Order::asc("date")))?;
    Ok(json!({
        "assignments": assignments,
        "quizzes": quizzes,
        "fetchedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

/// One fetch now, unless the timer's fetch is still running.
fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_session() {
        return auth_error(req, &e);
    }
    let Some(_permit) = state.feed_gate.try_enter() else {
        tracing::debug!("feed refresh skipped, fetch in flight");
        return ok(&req.id, json!({ "skipped": true }));
    };
    match snapshot(conn) {
        Ok(mut v) => {
            v["skipped"] = json!(false);
            ok(&req.id, v)
        }
        Err(e) => store_error(req, &e),
    }
}

fn handle_subscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(e) = state.auth.require_session() {
        return auth_error(req, &e);
    }
    let interval_ms = match get_u64(req, "intervalMs") {
        Ok(v) => v.unwrap_or(state.config.feeds.poll_interval_ms).max(1),
        Err(e) => return e,
    };
    if let Some(old) = state.feed_ticker.take() {
        old.cancel();
    }

    let outbox = state.outbox.clone();
    let mut conn: Option<Connection> = None;
    let job = move || {
        if conn.is_none() {
            match db::open_db(&workspace) {
                Ok(c) => conn = Some(c),
                Err(e) => {
                    tracing::warn!(error = %e, "feed poller cannot open workspace");
                    outbox.push_event("feeds.error", json!({ "code": "io_failed", "message": format!("{e:#}") }));
                    return;
                }
            }
        }
        let Some(c) = conn.as_ref() else {
            return;
        };
        match snapshot(c) {
            Ok(v) => outbox.push_event("feeds.updated", v),
            Err(e) => {
                tracing::warn!(error = %e, "feed poll failed");
                outbox.push_event(
                    "feeds.error",
                    json!({ "code": "db_query_failed", "message": e.to_string() }),
                );
            }
        }
    };

    match Ticker::spawn(
        "feeds",
        Duration::from_millis(interval_ms),
        state.feed_gate.clone(),
        job,
    ) {
        Ok(handle) => {
            state.feed_ticker = Some(handle);
            tracing::info!(interval_ms, "feeds subscribed");
            ok(&req.id, json!({ "subscribed": true, "intervalMs": interval_ms }))
        }
        Err(e) => err(&req.id, "io_failed", e.to_string(), None),
    }
}

fn handle_unsubscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was = match state.feed_ticker.take() {
        Some(t) => {
            tracing::info!(skipped = t.skipped(), "feeds unsubscribed");
            t.cancel();
            true
        }
        None => false,
    };
    ok(&req.id, json!({ "unsubscribed": was, "skipped": state.feed_gate.skipped() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feeds.refresh" => Some(handle_refresh(state, req)),
        "feeds.subscribe" => Some(handle_subscribe(state, req)),
        "feeds.unsubscribe" => Some(handle_unsubscribe(state, req)),
        _ => None,
    }
}
