use crate::auth;
use crate::clock::{self, CursorMemo, ScheduleState, SCHOOL_DAYS};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::core::DAY_CURSOR_KEY;
use crate::ipc::helpers::{auth_error, clock_error, get_str, get_u64, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::poll::{PollGate, Ticker};
use chrono::{Local, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn render(class_key: &str, state: &ScheduleState) -> serde_json::Value {
    let mut v = serde_json::to_value(state).unwrap_or_else(|_| json!({}));
    v["classKey"] = json!(class_key);
    v["elapsedText"] = json!(clock::format_span(state.elapsed_seconds));
    v["remainingText"] = json!(clock::format_span(state.remaining_seconds));
    v
}

fn persist_memo(conn: &Connection, memo: CursorMemo) {
    if let Err(e) = db::settings_set_json(conn, DAY_CURSOR_KEY, &memo.to_json()) {
        tracing::warn!(error = %e, "failed to persist schedule day");
    }
}

/// Explicit `classKey`, else the signed-in student's class, else the first
/// configured timetable.
fn resolve_class_key(state: &AppState, req: &Request) -> HandlerResult<String> {
    if let Some(k) = get_str(req, "classKey").filter(|k| !k.is_empty()) {
        if !state.config.timetables.contains_key(&k) {
            return Err(err(
                &req.id,
                "not_found",
                format!("no timetable for {k}"),
                Some(json!({ "classKey": k })),
            ));
        }
        return Ok(k);
    }
    if let Some(conn) = state.db.as_ref() {
        if let Ok(profile) = state.auth.current_profile(conn) {
            if state.config.timetables.contains_key(&profile.class) {
                return Ok(profile.class);
            }
        }
    }
    state
        .config
        .default_class_key()
        .map(|k| k.to_string())
        .ok_or_else(|| err(&req.id, "not_found", "no timetables configured", None))
}

fn weekday_param(req: &Request) -> HandlerResult<u8> {
    match get_u64(req, "weekday")? {
        Some(d) if d < 7 => Ok(d as u8),
        Some(d) => Err(err(&req.id, "bad_params", format!("weekday {d} is out of range 0..7"), None)),
        None => Err(err(&req.id, "bad_params", "missing weekday", None)),
    }
}

fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|f| NaiveTime::parse_from_str(raw.trim(), f).ok())
}

fn parse_local_datetime(raw: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw.trim(), f).ok())
}

fn handle_classes(state: &mut AppState, req: &Request) -> serde_json::Value {
    let classes: Vec<_> = state
        .config
        .timetables
        .iter()
        .map(|(key, t)| {
            let label = if t.label.is_empty() { key.as_str() } else { t.label.as_str() };
            json!({ "classKey": key, "label": label, "days": t.schedules.len() })
        })
        .collect();
    ok(&req.id, json!({ "classes": classes }))
}

fn handle_day(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_key = match resolve_class_key(state, req) {
        Ok(k) => k,
        Err(e) => return e,
    };
    let weekday = match weekday_param(req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let periods = clock::day_schedule(&state.config.timetables, &class_key, weekday);
    ok(
        &req.id,
        json!({ "classKey": class_key, "weekday": weekday, "periods": periods }),
    )
}

/// Pure clock sample for an explicit weekday and time of day.
fn handle_tick(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_key = match resolve_class_key(state, req) {
        Ok(k) => k,
        Err(e) => return e,
    };
    let weekday = match weekday_param(req) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let Some(raw) = get_str(req, "time") else {
        return err(&req.id, "bad_params", "missing time", None);
    };
    let Some(now) = parse_time_of_day(&raw) else {
        return err(
            &req.id,
            "malformed_time",
            format!("malformed time {raw:?}, expected HH:MM[:SS]"),
            None,
        );
    };
    match clock::tick(&state.config.timetables, &class_key, weekday, now) {
        Ok(s) => ok(&req.id, render(&class_key, &s)),
        Err(e) => clock_error(req, &e),
    }
}

/// Live view for "now", with the weekend and rollover policies applied.
fn handle_now(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_key = match resolve_class_key(state, req) {
        Ok(k) => k,
        Err(e) => return e,
    };
    let now = match get_str(req, "now") {
        Some(raw) => match parse_local_datetime(&raw) {
            Some(t) => t,
            None => {
                return err(
                    &req.id,
                    "malformed_time",
                    format!("malformed datetime {raw:?}, expected YYYY-MM-DDTHH:MM[:SS]"),
                    None,
                )
            }
        },
        None => Local::now().naive_local(),
    };

    let sample = {
        let mut cursor = match state.day_cursor.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        cursor.sample(&state.config.timetables, &class_key, now)
    };
    let sample = match sample {
        Ok(s) => s,
        Err(e) => return clock_error(req, &e),
    };
    if let (Some(memo), Some(conn)) = (sample.persist, state.db.as_ref()) {
        persist_memo(conn, memo);
    }
    ok(&req.id, render(&class_key, &sample.state))
}

/// Starts pushing `schedule.tick` events. A previous subscription is replaced.
fn handle_subscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_key = match resolve_class_key(state, req) {
        Ok(k) => k,
        Err(e) => return e,
    };
    let interval_ms = match get_u64(req, "intervalMs") {
        Ok(v) => v.unwrap_or(state.config.schedule.tick_interval_ms).max(1),
        Err(e) => return e,
    };

    if let Some(old) = state.schedule_ticker.take() {
        old.cancel();
    }

    let config = state.config.clone();
    let cursor = state.day_cursor.clone();
    let outbox = state.outbox.clone();
    let workspace = state.workspace.clone();
    let key = class_key.clone();
    let mut conn: Option<Connection> = None;
    let job = move || {
        let now = Local::now().naive_local();
        let sample = {
            let mut c = match cursor.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            c.sample(&config.timetables, &key, now)
        };
        match sample {
            Ok(s) => {
                if let (Some(memo), Some(ws)) = (s.persist, workspace.as_ref()) {
                    if conn.is_none() {
                        conn = db::open_db(ws)
                            .map_err(|e| tracing::warn!(error = %e, "schedule ticker cannot open workspace"))
                            .ok();
                    }
                    if let Some(c) = conn.as_ref() {
                        persist_memo(c, memo);
                    }
                }
                outbox.push_event("schedule.tick", render(&key, &s.state));
            }
            Err(e) => {
                tracing::error!(class_key = %key, error = %e, "schedule tick failed");
                outbox.push_event(
                    "schedule.error",
                    json!({ "classKey": key, "code": "malformed_time", "message": e.to_string() }),
                );
            }
        }
    };

    match Ticker::spawn(
        "schedule",
        Duration::from_millis(interval_ms),
        Arc::new(PollGate::new()),
        job,
    ) {
        Ok(handle) => {
            state.schedule_ticker = Some(handle);
            tracing::info!(%class_key, interval_ms, "schedule subscribed");
            ok(
                &req.id,
                json!({ "subscribed": true, "classKey": class_key, "intervalMs": interval_ms }),
            )
        }
        Err(e) => err(&req.id, "io_failed", e.to_string(), None),
    }
}

fn handle_unsubscribe(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was = match state.schedule_ticker.take() {
        Some(t) => {
            tracing::info!(skipped = t.skipped(), "schedule unsubscribed");
            t.cancel();
            true
        }
        None => false,
    };
    ok(&req.id, json!({ "unsubscribed": was }))
}

/// Which timetable class a signed-in student belongs to.
fn handle_my_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match state.auth.current_profile(conn) {
        Ok(p) => {
            let class = auth::class_key(&state.config, p.grade, &p.specialty).unwrap_or(p.class);
            ok(
                &req.id,
                json!({
                    "classKey": class,
                    "hasTimetable": state.config.timetables.contains_key(&class),
                    "schoolDays": SCHOOL_DAYS,
                }),
            )
        }
        Err(e) => auth_error(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.classes" => Some(handle_classes(state, req)),
        "schedule.day" => Some(handle_day(state, req)),
        "schedule.tick" => Some(handle_tick(state, req)),
        "schedule.now" => Some(handle_now(state, req)),
        "schedule.myClass" => Some(handle_my_class(state, req)),
        "schedule.subscribe" => Some(handle_subscribe(state, req)),
        "schedule.unsubscribe" => Some(handle_unsubscribe(state, req)),
        _ => None,
    }
}
