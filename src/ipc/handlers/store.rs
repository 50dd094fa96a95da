use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{auth_error, get_record, get_required_str, require_db, store_error, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, Collection, Order};
use serde_json::json;

fn collection(req: &Request) -> HandlerResult<Collection> {
    let name = get_required_str(req, "collection")?;
    Collection::parse(&name).map_err(|e| store_error(req, &e))
}

fn order(req: &Request) -> HandlerResult<Option<Order>> {
    match req.params.get("orderBy") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(col)) => Ok(Some(Order::asc(col))),
        Some(o @ serde_json::Value::Object(_)) => {
            let Some(column) = o.get("column").and_then(|v| v.as_str()) else {
                return Err(err(&req.id, "bad_params", "orderBy.column is required", None));
            };
            let ascending = o.get("ascending").and_then(|v| v.as_bool()).unwrap_or(true);
            Ok(Some(Order {
                column: column.to_string(),
                ascending,
            }))
        }
        Some(_) => Err(err(&req.id, "bad_params", "orderBy must be a column or {column, ascending}", None)),
    }
}

fn handle_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_session() {
        return auth_error(req, &e);
    }
    let (coll, filters, order) = match (collection(req), get_record(req, "filters"), order(req)) {
        (Ok(c), Ok(f), Ok(o)) => (c, f, o),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
    };
    match store::select(conn, coll, &filters, order.as_ref()) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_error(req, &e),
    }
}

fn handle_insert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    let (coll, record) = match (collection(req), get_record(req, "record")) {
        (Ok(c), Ok(r)) => (c, r),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    match store::insert(conn, coll, &record) {
        Ok(row) => ok(&req.id, json!({ "row": row })),
        Err(e) => store_error(req, &e),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    let (coll, filters, values) = match (collection(req), get_record(req, "filters"), get_record(req, "values")) {
        (Ok(c), Ok(f), Ok(v)) => (c, f, v),
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e,
    };
    match store::update(conn, coll, &filters, &values) {
        Ok(n) => ok(&req.id, json!({ "updated": n })),
        Err(e) => store_error(req, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match require_db(&state.db, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    if let Err(e) = state.auth.require_admin(conn) {
        return auth_error(req, &e);
    }
    let (coll, filters) = match (collection(req), get_record(req, "filters")) {
        (Ok(c), Ok(f)) => (c, f),
        (Err(e), _) | (_, Err(e)) => return e,
    };
    match store::delete(conn, coll, &filters) {
        Ok(n) => ok(&req.id, json!({ "deleted": n })),
        Err(e) => store_error(req, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "store.select" => Some(handle_select(state, req)),
        "store.insert" => Some(handle_insert(state, req)),
        "store.update" => Some(handle_update(state, req)),
        "store.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
