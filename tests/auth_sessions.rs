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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
    expected_code: &str,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        !value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true),
        "{} unexpectedly succeeded",
        method
    );
    let error = value.get("error").cloned().unwrap_or_else(|| json!({}));
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some(expected_code),
        "unexpected error for {}: {}",
        method,
        error
    );
    error
}

fn select_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
}

#[test]
fn sign_up_sign_in_and_current_user_round_trip() {
    let workspace = temp_dir("gradebookd-auth-roundtrip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({
            "email": "teacher@example.com",
            "password": "secret-1",
            "first_name": "Pat",
            "last_name": "Lane"
        }),
    );

    let anonymous = request_ok(&mut stdin, &mut reader, "2", "auth.currentUser", json!({}));
    assert!(anonymous.get("user").expect("user key").is_null());

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.signIn",
        json!({ "email": "teacher@example.com", "password": "secret-1" }),
    );

    let current = request_ok(&mut stdin, &mut reader, "4", "auth.currentUser", json!({}));
    assert_eq!(
        current
            .get("user")
            .and_then(|u| u.get("email"))
            .and_then(|v| v.as_str()),
        Some("teacher@example.com")
    );

    request_ok(&mut stdin, &mut reader, "5", "auth.signOut", json!({}));
    let after = request_ok(&mut stdin, &mut reader, "6", "auth.currentUser", json!({}));
    assert!(after.get("user").expect("user key").is_null());
}

#[test]
fn wrong_password_is_rejected_without_a_session() {
    let workspace = temp_dir("gradebookd-auth-wrongpw");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({
            "email": "teacher@example.com",
            "password": "secret-1",
            "first_name": "Pat",
            "last_name": "Lane"
        }),
    );
    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signIn",
        json!({ "email": "teacher@example.com", "password": "not-it-1" }),
        "invalid_credentials",
    );
    assert_eq!(
        error.get("message").and_then(|v| v.as_str()),
        Some("Invalid credentials. Please try again.")
    );

    let current = request_ok(&mut stdin, &mut reader, "3", "auth.currentUser", json!({}));
    assert!(current.get("user").expect("user key").is_null());
}

#[test]
fn unknown_email_gets_the_same_generic_message() {
    let workspace = temp_dir("gradebookd-auth-nouser");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signIn",
        json!({ "email": "nobody@example.com", "password": "secret-1" }),
        "invalid_credentials",
    );
    assert_eq!(
        error.get("message").and_then(|v| v.as_str()),
        Some("Invalid credentials. Please try again.")
    );
}

#[test]
fn duplicate_email_cannot_sign_up_twice() {
    let workspace = temp_dir("gradebookd-auth-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({
            "email": "teacher@example.com",
            "password": "secret-1",
            "first_name": "Pat",
            "last_name": "Lane"
        }),
    );
    request_err(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signUp",
        json!({
            "email": "teacher@example.com",
            "password": "secret-2",
            "first_name": "Ana",
            "last_name": "Mora"
        }),
        "store_error",
    );
}

#[test]
fn short_password_is_a_field_error() {
    let workspace = temp_dir("gradebookd-auth-shortpw");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({
            "email": "teacher@example.com",
            "password": "short",
            "first_name": "Pat",
            "last_name": "Lane"
        }),
        "validation_failed",
    );
    assert!(error
        .get("details")
        .and_then(|d| d.get("password"))
        .is_some());
}

#[test]
fn password_update_takes_effect_on_next_sign_in() {
    let workspace = temp_dir("gradebookd-auth-newpw");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({
            "email": "teacher@example.com",
            "password": "secret-1",
            "first_name": "Pat",
            "last_name": "Lane"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signIn",
        json!({ "email": "teacher@example.com", "password": "secret-1" }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.updatePassword",
        json!({ "password": "secret-2" }),
    );
    request_ok(&mut stdin, &mut reader, "4", "auth.signOut", json!({}));

    request_err(
        &mut stdin,
        &mut reader,
        "5",
        "auth.signIn",
        json!({ "email": "teacher@example.com", "password": "secret-1" }),
        "invalid_credentials",
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.signIn",
        json!({ "email": "teacher@example.com", "password": "secret-2" }),
    );
}

#[test]
fn update_password_requires_a_session() {
    let workspace = temp_dir("gradebookd-auth-gate");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    request_err(
        &mut stdin,
        &mut reader,
        "1",
        "auth.updatePassword",
        json!({ "password": "secret-9" }),
        "unauthorized",
    );
}
