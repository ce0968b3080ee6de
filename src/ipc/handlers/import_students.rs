//! Bulk roster import: parse the file, validate the whole batch, partition
//! rows on the presence of a student code, upsert each partition, then
//! link every resulting student to the target course. The two student
//! batches and the enrollment batch are separate sequential gateway calls;
//! rows inserted by this run are compensated if a later step fails.

use std::path::PathBuf;

use serde_json::{json, Value};

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{Filter, Record, Saga, Scope, SelectSpec, Store, COURSES, ENROLLMENTS, STUDENTS};
use crate::tabular;
use crate::validate;

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };
    let Some(course_id) = req.params.get("courseId").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing courseId", None);
    };
    let Some(path) = req.params.get("path").and_then(Value::as_str).map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing path", None);
    };

    let store = Store::new(conn);

    // The target course must exist and belong to the caller.
    let course = match store.select(
        &COURSES,
        SelectSpec {
            columns: &["id"],
            filter: Filter::new().eq("id", course_id),
            ..Default::default()
        },
        &Scope::Owner(session.user_id.clone()),
    ) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "course lookup failed");
            return err(&req.id, "store_error", "Could not import the students.", None);
        }
    };
    if course.is_empty() {
        return err(&req.id, "not_found", "Course not found.", None);
    }

    let rows = match tabular::read_rows(&path) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "roster parse failed");
            return err(
                &req.id,
                "import_parse_failed",
                "Could not read the file. Check the format.",
                None,
            );
        }
    };

    let validated = match validate::import_rows(&rows) {
        Ok(v) => v,
        Err(bad) => {
            tracing::warn!(row = bad.row, field = bad.field, "import batch rejected");
            return err(
                &req.id,
                "import_invalid",
                "The student data is not valid. Check the file format.",
                None,
            );
        }
    };
    if validated.is_empty() {
        return err(
            &req.id,
            "import_empty",
            "No students could be processed.",
            None,
        );
    }

    let (with_code, without_code): (Vec<Record>, Vec<Record>) = validated
        .into_iter()
        .partition(|r| r.get("student_code").map(|v| !v.is_null()).unwrap_or(false));

    let mut saga = Saga::new();
    let mut student_ids: Vec<String> = Vec::new();

    if !with_code.is_empty() {
        let outcomes = match store.upsert(
            &STUDENTS,
            with_code,
            &["student_code"],
            false,
            &Scope::Unscoped,
        ) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(error = %e, "coded student upsert failed");
                return err(
                    &req.id,
                    "store_error",
                    "Could not save the students with a code.",
                    None,
                );
            }
        };
        for outcome in outcomes {
            let Some(id) = outcome.id else { continue };
            if outcome.inserted {
                saga.record_delete(&STUDENTS, Filter::new().eq("id", id.as_str()));
            }
            student_ids.push(id);
        }
    }

    for record in without_code {
        match store.insert(&STUDENTS, record, &Scope::Unscoped) {
            Ok(row) => {
                let id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                saga.record_delete(&STUDENTS, Filter::new().eq("id", id.as_str()));
                student_ids.push(id);
            }
            Err(e) => {
                tracing::error!(error = %e, "uncoded student insert failed, rolling back");
                saga.abort(&store);
                return err(
                    &req.id,
                    "store_error",
                    "Could not save the students without a code.",
                    None,
                );
            }
        }
    }

    if student_ids.is_empty() {
        return err(
            &req.id,
            "import_empty",
            "No students could be processed.",
            None,
        );
    }

    let enrollments: Vec<Record> = student_ids
        .iter()
        .map(|sid| {
            let mut e = Record::new();
            e.insert("student_id".to_string(), Value::String(sid.clone()));
            e.insert("course_id".to_string(), Value::String(course_id.to_string()));
            e
        })
        .collect();

    match store.upsert(
        &ENROLLMENTS,
        enrollments,
        &["student_id", "course_id"],
        true,
        &Scope::Unscoped,
    ) {
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "enrollment upsert failed, rolling back");
            saga.abort(&store);
            return err(
                &req.id,
                "store_error",
                "Could not enroll the imported students.",
                None,
            );
        }
    }

    let count = student_ids.len();
    ok(
        &req.id,
        json!({
            "message": format!("{} students imported and enrolled successfully.", count),
            "importedCount": count
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
