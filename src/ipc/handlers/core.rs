use crate::clock::CursorMemo;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

pub const DAY_CURSOR_KEY: &str = "schedule.dayCursor";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "signedIn": state.auth.session().is_some(),
            "scheduleSubscribed": state.schedule_ticker.is_some(),
            "feedsSubscribed": state.feed_ticker.is_some(),
        }),
    )
}

/// Opens (or creates) the workspace database and restores the remembered
/// schedule day. Any session and timers bound to the previous workspace end.
fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match get_required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    let conn = match db::open_db(&path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "workspace open failed");
            return err(
                &req.id,
                "io_failed",
                format!("{e:#}"),
                Some(json!({ "path": path.to_string_lossy() })),
            );
        }
    };

    state.stop_tickers();
    state.auth.sign_out();

    // Best-effort: a missing or unreadable memo just means "no rollover yet".
    let memo = db::settings_get_json(&conn, DAY_CURSOR_KEY)
        .ok()
        .flatten()
        .and_then(|v| CursorMemo::from_json(&v));
    let cursor = crate::clock::DayCursor::new(
        state.config.schedule.rollover_policy,
        state.config.schedule.weekend_policy,
        memo,
    );
    match state.day_cursor.lock() {
        Ok(mut c) => *c = cursor,
        Err(poisoned) => *poisoned.into_inner() = cursor,
    }

    state.db = Some(conn);
    state.workspace = Some(path.clone());
    tracing::info!(path = %path.display(), "workspace selected");
    ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    match serde_json::to_value(state.config.as_ref()) {
        Ok(cfg) => ok(&req.id, json!({ "config": cfg })),
        Err(e) => err(&req.id, "config_invalid", e.to_string(), None),
    }
}

fn handle_config_specialties(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "specialties": state.config.specialties }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "config.get" => Some(handle_config_get(state, req)),
        "config.specialties" => Some(handle_config_specialties(state, req)),
        _ => None,
    }
}
