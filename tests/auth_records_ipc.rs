use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .env_remove("CAMPUSD_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

/// Response plus any events pushed while the request was handled.
fn request_with_events(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> (serde_json::Value, Vec<serde_json::Value>) {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut events = Vec::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
        if value.get("event").is_some() {
            events.push(value);
            continue;
        }
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
        return (value, events);
    }
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    request_with_events(stdin, reader, id, method, params).0
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value["result"].clone()
}

fn error_code(value: &serde_json::Value) -> &str {
    value["error"]["code"].as_str().unwrap_or("")
}

const ADMIN: &str = "nv22084@nvtc.edu.bh";
const STUDENT: &str = "nv23017@nvtc.edu.bh";

#[test]
fn sign_up_validates_identity_and_emits_auth_events() {
    let workspace = temp_dir("campus-auth");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let no_ws = request(
        &mut stdin,
        &mut reader,
        "0",
        "auth.signIn",
        json!({ "email": ADMIN, "password": "secret1" }),
    );
    assert_eq!(error_code(&no_ws), "no_workspace");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let wrong_domain = request(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signUp",
        json!({ "email": "nv22084@gmail.com", "password": "secret1", "specialty": "Cloud Computing" }),
    );
    assert_eq!(error_code(&wrong_domain), "bad_params");

    let unknown_cohort = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.signUp",
        json!({ "email": "nv19001@nvtc.edu.bh", "password": "secret1", "specialty": "Cloud Computing" }),
    );
    assert_eq!(error_code(&unknown_cohort), "bad_params");

    let weak = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.signUp",
        json!({ "email": ADMIN, "password": "123", "specialty": "Cloud Computing" }),
    );
    assert_eq!(error_code(&weak), "bad_params");

    let (resp, events) = request_with_events(
        &mut stdin,
        &mut reader,
        "5",
        "auth.signUp",
        json!({ "email": ADMIN, "password": "secret1", "specialty": "Cloud Computing" }),
    );
    assert_eq!(resp["ok"].as_bool(), Some(true), "{resp}");
    let profile = &resp["result"]["profile"];
    assert_eq!(profile["nvNumber"].as_str(), Some("nv22084"));
    assert_eq!(profile["grade"].as_i64(), Some(12));
    assert_eq!(profile["class"].as_str(), Some("12.CCP"));
    assert_eq!(profile["role"].as_str(), Some("admin"));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"].as_str(), Some("auth.changed"));
    assert_eq!(events[0]["payload"]["state"].as_str(), Some("signedIn"));

    let dup = request(
        &mut stdin,
        &mut reader,
        "6",
        "auth.signUp",
        json!({ "email": ADMIN, "password": "secret1", "specialty": "Cloud Computing" }),
    );
    assert_eq!(error_code(&dup), "auth_failed");

    let (out, events) = request_with_events(&mut stdin, &mut reader, "7", "auth.signOut", json!({}));
    assert_eq!(out["result"]["signedOut"].as_bool(), Some(true));
    assert_eq!(events[0]["payload"]["state"].as_str(), Some("signedOut"));
    let session = request_ok(&mut stdin, &mut reader, "8", "auth.session", json!({}));
    assert!(session["session"].is_null());

    let bad_pw = request(
        &mut stdin,
        &mut reader,
        "9",
        "auth.signIn",
        json!({ "email": ADMIN, "password": "wrong-one" }),
    );
    assert_eq!(error_code(&bad_pw), "auth_failed");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "auth.signIn",
        json!({ "email": ADMIN, "password": "secret1" }),
    );
    let changed = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "auth.updatePassword",
        json!({ "password": "better-secret" }),
    );
    assert_eq!(changed["signedOut"].as_bool(), Some(true));
    let old = request(
        &mut stdin,
        &mut reader,
        "12",
        "auth.signIn",
        json!({ "email": ADMIN, "password": "secret1" }),
    );
    assert_eq!(error_code(&old), "auth_failed");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "auth.signIn",
        json!({ "email": ADMIN, "password": "better-secret" }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn writes_require_admin_and_calendar_follows_profile() {
    let workspace = temp_dir("campus-records");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let anon = request(&mut stdin, &mut reader, "2", "assignments.list", json!({}));
    assert_eq!(error_code(&anon), "not_signed_in");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.signUp",
        json!({ "email": ADMIN, "password": "secret1", "specialty": "Cloud Computing" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assignments.create",
        json!({ "name": "AI essay", "dueDate": "2099-05-01T10:30", "major": "AI", "grade": "grade11" }),
    );
    let essay_id = created["assignment"]["id"].as_str().expect("generated id").to_string();
    assert_eq!(created["assignment"]["due_date"].as_str(), Some("2099-05-01T10:30:00.000Z"));
    assert_eq!(created["assignment"]["status"].as_str(), Some("Safe"));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.create",
        json!({ "name": "Orientation", "dueDate": "2099-04-01T08:00", "major": "global", "grade": "grade11" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.create",
        json!({ "name": "Cloud lab", "dueDate": "2099-03-01T08:00", "major": "CCP", "grade": "grade12" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "quizzes.create",
        json!({ "name": "ML quiz", "date": "2099-04-15T08:00", "class": "AI" }),
    );
    let bad_date = request(
        &mut stdin,
        &mut reader,
        "8",
        "quizzes.create",
        json!({ "name": "Broken", "date": "someday", "class": "AI" }),
    );
    assert_eq!(error_code(&bad_date), "malformed_time");

    // A grade-11 AI student.
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "auth.signUp",
        json!({ "email": STUDENT, "password": "student1", "specialty": "Artificial Intelligence" }),
    );
    assert_eq!(student["profile"]["class"].as_str(), Some("11.AI"));
    assert_eq!(student["profile"]["role"].as_str(), Some("user"));

    let forbidden = request(
        &mut stdin,
        &mut reader,
        "10",
        "assignments.create",
        json!({ "name": "Sneaky", "dueDate": "2099-01-01T08:00", "major": "AI" }),
    );
    assert_eq!(error_code(&forbidden), "forbidden");
    let forbidden = request(&mut stdin, &mut reader, "11", "users.list", json!({}));
    assert_eq!(error_code(&forbidden), "forbidden");
    let forbidden = request(
        &mut stdin,
        &mut reader,
        "12",
        "store.delete",
        json!({ "collection": "assignments", "filters": { "id": essay_id } }),
    );
    assert_eq!(error_code(&forbidden), "forbidden");

    let defaults = request_ok(&mut stdin, &mut reader, "13", "calendar.defaults", json!({}));
    assert_eq!(defaults["majors"], json!(["AI"]));
    assert_eq!(defaults["grade"].as_str(), Some("grade11"));

    let events = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "calendar.events",
        json!({ "majors": ["AI"], "grade": "grade11", "status": "all" }),
    );
    let names: Vec<&str> = events["events"]
        .as_array()
        .expect("events")
        .iter()
        .filter_map(|e| e["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Orientation", "ML quiz", "AI essay"]);

    let listed = request_ok(&mut stdin, &mut reader, "15", "assignments.list", json!({ "major": "CCP" }));
    assert_eq!(listed["assignments"].as_array().map(|a| a.len()), Some(1));

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "profile.update",
        json!({ "specialty": "Cyber Security" }),
    );
    assert_eq!(moved["profile"]["class"].as_str(), Some("11.SEC"));
    let bad = request(
        &mut stdin,
        &mut reader,
        "17",
        "profile.update",
        json!({ "specialty": "Basket Weaving" }),
    );
    assert_eq!(error_code(&bad), "bad_params");

    // Back to the admin for maintenance.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "auth.signIn",
        json!({ "email": ADMIN, "password": "secret1" }),
    );
    let users = request_ok(&mut stdin, &mut reader, "19", "users.list", json!({}));
    assert_eq!(users["users"].as_array().map(|u| u.len()), Some(2));
    let promoted = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "users.update",
        json!({ "nvNumber": "nv23017", "role": "admin" }),
    );
    assert_eq!(promoted["user"]["role"].as_str(), Some("admin"));

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "assignments.update",
        json!({ "id": essay_id, "name": "AI essay (final)" }),
    );
    assert_eq!(renamed["assignment"]["name"].as_str(), Some("AI essay (final)"));
    let _ = request_ok(&mut stdin, &mut reader, "22", "assignments.delete", json!({ "id": essay_id }));
    let gone = request(&mut stdin, &mut reader, "23", "assignments.delete", json!({ "id": essay_id }));
    assert_eq!(error_code(&gone), "not_found");

    let unfiltered = request(
        &mut stdin,
        &mut reader,
        "24",
        "store.delete",
        json!({ "collection": "quizzes", "filters": {} }),
    );
    assert_eq!(error_code(&unfiltered), "bad_params");
    let bad_column = request(
        &mut stdin,
        &mut reader,
        "25",
        "store.select",
        json!({ "collection": "quizzes", "filters": { "password_hash": "x" } }),
    );
    assert_eq!(error_code(&bad_column), "bad_params");
    let accounts = request(
        &mut stdin,
        &mut reader,
        "26",
        "store.select",
        json!({ "collection": "accounts" }),
    );
    assert_eq!(error_code(&accounts), "bad_params");

    let rows = request_ok(
        &mut stdin,
        &mut reader,
        "27",
        "store.select",
        json!({ "collection": "assignments", "orderBy": { "column": "due_date", "ascending": false } }),
    );
    let names: Vec<&str> = rows["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .filter_map(|r| r["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Orientation", "Cloud lab"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
