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

fn open_session(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "su",
        "auth.signUp",
        json!({
            "email": "teacher@example.com",
            "password": "secret-1",
            "first_name": "Pat",
            "last_name": "Lane"
        }),
    );
    request_ok(
        stdin,
        reader,
        "si",
        "auth.signIn",
        json!({ "email": "teacher@example.com", "password": "secret-1" }),
    );
}

#[test]
fn create_then_list_returns_exact_name_and_generated_id() {
    let workspace = temp_dir("gradebookd-inst-create");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "institutions.create",
        json!({ "name": "  National High School " }),
    );
    let id = created
        .get("id")
        .and_then(|v| v.as_str())
        .expect("generated id")
        .to_string();
    assert!(!id.is_empty());

    let listed = request_ok(&mut stdin, &mut reader, "2", "institutions.list", json!({}));
    let institutions = listed
        .get("institutions")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("institutions array");
    assert_eq!(institutions.len(), 1);
    assert_eq!(
        institutions[0].get("id").and_then(|v| v.as_str()),
        Some(id.as_str())
    );
    assert_eq!(
        institutions[0].get("name").and_then(|v| v.as_str()),
        Some("National High School")
    );
}

#[test]
fn short_name_is_rejected_and_nothing_is_persisted() {
    let workspace = temp_dir("gradebookd-inst-short");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "institutions.create",
        json!({ "name": " ab " }),
        "validation_failed",
    );
    assert!(error
        .get("details")
        .and_then(|d| d.get("name"))
        .is_some());

    let listed = request_ok(&mut stdin, &mut reader, "2", "institutions.list", json!({}));
    assert_eq!(
        listed
            .get("institutions")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn deleting_an_institution_cascades_to_its_careers() {
    let workspace = temp_dir("gradebookd-inst-cascade");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    let inst = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "institutions.create",
        json!({ "name": "Central Institute" }),
    );
    let inst_id = inst.get("id").and_then(|v| v.as_str()).expect("id").to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "careers.create",
        json!({ "name": "Science", "institution_id": inst_id }),
    );
    let before = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "careers.list",
        json!({ "institutionId": inst_id }),
    );
    assert_eq!(
        before.get("careers").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "institutions.delete",
        json!({ "id": inst_id }),
    );
    let after = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "careers.list",
        json!({ "institutionId": inst_id }),
    );
    assert_eq!(
        after.get("careers").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn institutions_are_scoped_to_their_owner() {
    let workspace = temp_dir("gradebookd-inst-scope");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_session(&mut stdin, &mut reader, &workspace);

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "institutions.create",
        json!({ "name": "Owned by First" }),
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signUp",
        json!({
            "email": "other@example.com",
            "password": "secret-2",
            "first_name": "Ana",
            "last_name": "Mora"
        }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.signIn",
        json!({ "email": "other@example.com", "password": "secret-2" }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "4", "institutions.list", json!({}));
    assert_eq!(
        listed
            .get("institutions")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );
}

#[test]
fn mutations_require_a_session() {
    let workspace = temp_dir("gradebookd-inst-auth");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    request_err(
        &mut stdin,
        &mut reader,
        "1",
        "institutions.create",
        json!({ "name": "No Session Yet" }),
        "unauthorized",
    );
}
