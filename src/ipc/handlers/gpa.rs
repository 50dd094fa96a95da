use crate::estimator::{self, ErrorRange, SubjectEntry};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{estimate_error, get_required_str, get_u64, HandlerResult};
use crate::ipc::types::{AppState, Request};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

/// A request may pin the generator with `seed` for reproducible estimates.
fn rng_for(req: &Request) -> HandlerResult<StdRng> {
    Ok(match get_u64(req, "seed")? {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    })
}

fn int_field(req: &Request, obj: &serde_json::Value, key: &str) -> HandlerResult<i64> {
    match obj.get(key) {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| err(&req.id, "bad_params", format!("{key} must be an integer"), None)),
    }
}

fn error_range(req: &Request, obj: &serde_json::Value) -> HandlerResult<ErrorRange> {
    let min = int_field(req, obj, "min")?;
    let max = int_field(req, obj, "max")?;
    ErrorRange::new(min, max).map_err(|e| estimate_error(req, &e))
}

fn handle_presets(state: &mut AppState, req: &Request) -> serde_json::Value {
    let presets: Vec<_> = state
        .config
        .presets
        .iter()
        .map(|(key, p)| json!({ "classKey": key, "subjectCount": p.subjects.len() }))
        .collect();
    ok(&req.id, json!({ "presets": presets }))
}

/// Fresh calculator rows for a class: blank marks, preset hours, zero range.
fn handle_preset_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_key = match get_required_str(req, "classKey") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(preset) = state.config.presets.get(&class_key) else {
        return err(
            &req.id,
            "not_found",
            format!("no preset for {class_key}"),
            Some(json!({ "classKey": class_key })),
        );
    };
    let subjects: Vec<_> = preset
        .subjects
        .iter()
        .zip(&preset.hours)
        .map(|(name, hours)| json!({ "name": name, "marks": "", "hours": hours }))
        .collect();
    ok(
        &req.id,
        json!({
            "classKey": class_key,
            "subjects": subjects,
            "errorRange": { "min": 0, "max": 0 },
        }),
    )
}

fn handle_estimate(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let range = match error_range(req, &req.params) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let Some(hours) = req.params.get("hours").and_then(estimator::parse_hours) else {
        return err(&req.id, "bad_params", "hours must be a positive number", None);
    };
    let Some(mark) = req.params.get("mark").and_then(estimator::parse_marks) else {
        return err(&req.id, "bad_params", "mark must be a number in [0, 100]", None);
    };
    let mut rng = match rng_for(req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    let value = estimator::estimate(range, hours, mark, &mut rng);
    ok(
        &req.id,
        json!({ "estimate": value, "display": format!("{value:.2}") }),
    )
}

fn handle_calculate(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let subjects: Vec<SubjectEntry> = match req.params.get("subjects") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "bad_params", format!("subjects: {e}"), None),
        },
        None => return err(&req.id, "bad_params", "missing subjects", None),
    };
    let range = match req.params.get("errorRange") {
        Some(obj) => match error_range(req, obj) {
            Ok(r) => r,
            Err(e) => return e,
        },
        None => ErrorRange::default(),
    };
    let mut rng = match rng_for(req) {
        Ok(r) => r,
        Err(e) => return e,
    };

    let report = estimator::weighted_gpa(&subjects, range, &mut rng);
    if !report.excluded.is_empty() {
        tracing::debug!(excluded = report.excluded.len(), "gpa rows skipped");
    }
    match serde_json::to_value(&report) {
        Ok(v) => ok(&req.id, v),
        Err(e) => err(&req.id, "bad_params", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gpa.presets" => Some(handle_presets(state, req)),
        "gpa.preset.load" => Some(handle_preset_load(state, req)),
        "gpa.estimate" => Some(handle_estimate(state, req)),
        "gpa.calculate" => Some(handle_calculate(state, req)),
        _ => None,
    }
}
