use serde_json::{json, Value};

use crate::db;
use crate::ipc::error::{err, ok, validation};
use crate::ipc::types::{AppState, Request};
use crate::store::{Filter, Join, Record, Saga, Scope, SelectSpec, Store, ENROLLMENTS, STUDENTS};
use crate::validate;

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(course_id) = req.params.get("courseId").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };

    let store = Store::new(conn);
    let rows = match store.select(
        &ENROLLMENTS,
        SelectSpec {
            columns: &["student_id"],
            filter: Filter::new().eq("course_id", course_id),
            order: Some("last_name, first_name"),
            joins: &[Join {
                collection: &STUDENTS,
                fk: "student_id",
                columns: &[
                    ("student_code", "student_code"),
                    ("first_name", "first_name"),
                    ("last_name", "last_name"),
                    ("email", "email"),
                ],
            }],
        },
        &Scope::Unscoped,
    ) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "roster query failed");
            return err(&req.id, "store_error", "Could not load the students.", None);
        }
    };

    let students: Vec<Value> = rows
        .iter()
        .map(|r| {
            json!({
                "id": r.get("student_id").cloned().unwrap_or(Value::Null),
                "studentCode": r.get("student_code").cloned().unwrap_or(Value::Null),
                "firstName": r.get("first_name").cloned().unwrap_or(Value::Null),
                "lastName": r.get("last_name").cloned().unwrap_or(Value::Null),
                "email": r.get("email").cloned().unwrap_or(Value::Null),
            })
        })
        .collect();
    ok(&req.id, json!({ "students": students }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let store = Store::new(conn);
    let rows = match store.select(
        &STUDENTS,
        SelectSpec {
            filter: Filter::new().eq("id", student_id),
            ..Default::default()
        },
        &Scope::Unscoped,
    ) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "student lookup failed");
            return err(&req.id, "store_error", "Could not load the student.", None);
        }
    };

    match rows.first() {
        Some(r) => ok(
            &req.id,
            json!({
                "student": {
                    "id": r.get("id").cloned().unwrap_or(Value::Null),
                    "studentCode": r.get("student_code").cloned().unwrap_or(Value::Null),
                    "firstName": r.get("first_name").cloned().unwrap_or(Value::Null),
                    "lastName": r.get("last_name").cloned().unwrap_or(Value::Null),
                    "email": r.get("email").cloned().unwrap_or(Value::Null),
                }
            }),
        ),
        None => ok(&req.id, json!({ "student": Value::Null })),
    }
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if state.session.is_none() {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    }
    let Some(course_id) = req.params.get("courseId").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let fields = match validate::student(&req.params) {
        Ok(f) => f,
        Err(e) => return validation(&req.id, e),
    };

    let store = Store::new(conn);
    let mut saga = Saga::new();

    let student = match store.insert(&STUDENTS, fields, &Scope::Unscoped) {
        Ok(row) => row,
        Err(e) => {
            tracing::error!(error = %e, "student creation failed");
            return err(
                &req.id,
                "store_error",
                "Could not create the student. The email or code may already exist.",
                None,
            );
        }
    };
    let student_id = student
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    saga.record_delete(&STUDENTS, Filter::new().eq("id", student_id.as_str()));

    let mut enrollment = Record::new();
    enrollment.insert(
        "student_id".to_string(),
        Value::String(student_id.clone()),
    );
    enrollment.insert("course_id".to_string(), Value::String(course_id.to_string()));
    if let Err(e) = store.insert(&ENROLLMENTS, enrollment, &Scope::Unscoped) {
        tracing::error!(error = %e, "enrollment failed, rolling back student");
        saga.abort(&store);
        return err(
            &req.id,
            "store_error",
            "Could not enroll the student in the course.",
            None,
        );
    }

    ok(
        &req.id,
        json!({
            "message": "Student created and enrolled successfully.",
            "studentId": student_id
        }),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if state.session.is_none() {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    }
    let Some(student_id) = req.params.get("studentId").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let mut patch = match validate::student_patch(&req.params) {
        Ok(f) => f,
        Err(e) => return validation(&req.id, e),
    };
    patch.insert("updated_at".to_string(), Value::String(db::now_utc()));

    let store = Store::new(conn);
    match store.update(
        &STUDENTS,
        patch,
        Filter::new().eq("id", student_id),
        &Scope::Unscoped,
    ) {
        Ok(_) => ok(&req.id, json!({ "message": "Student updated successfully." })),
        Err(e) => {
            tracing::error!(error = %e, "student update failed");
            err(&req.id, "store_error", "Could not update the student.", None)
        }
    }
}

/// Removes the enrollment pair only; the student row stays available for
/// other courses.
fn handle_remove_from_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if state.session.is_none() {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    }
    let Some(student_id) = req.params.get("studentId").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(course_id) = req.params.get("courseId").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };

    let store = Store::new(conn);
    match store.delete(
        &ENROLLMENTS,
        Filter::new()
            .eq("student_id", student_id)
            .eq("course_id", course_id),
        &Scope::Unscoped,
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "message": "Student unenrolled from the course successfully." }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "unenroll failed");
            err(&req.id, "store_error", "Could not unenroll the student.", None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_list(state, req)),
        "students.get" => Some(handle_get(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.removeFromCourse" => Some(handle_remove_from_course(state, req)),
        _ => None,
    }
}
