use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{Filter, Scope, SelectSpec, Store, CAREERS, COURSES, ENROLLMENTS, INSTITUTIONS};

fn summary(conn: &Connection, user_id: &str) -> anyhow::Result<Value> {
    let store = Store::new(conn);
    let owner = Scope::Owner(user_id.to_string());

    let institutions = store.select(
        &INSTITUTIONS,
        SelectSpec {
            columns: &["id", "name"],
            order: Some("name"),
            ..Default::default()
        },
        &owner,
    )?;
    let courses = store.select(
        &COURSES,
        SelectSpec {
            columns: &["id", "career_id"],
            ..Default::default()
        },
        &owner,
    )?;

    // Students enrolled in each owned course; a student counts once even
    // when enrolled in several courses.
    let mut students_by_course: HashMap<String, Vec<String>> = HashMap::new();
    let mut all_students: HashSet<String> = HashSet::new();
    for course in &courses {
        let Some(cid) = course.get("id").and_then(Value::as_str) else {
            continue;
        };
        let enrollments = store.select(
            &ENROLLMENTS,
            SelectSpec {
                columns: &["student_id"],
                filter: Filter::new().eq("course_id", cid),
                ..Default::default()
            },
            &Scope::Unscoped,
        )?;
        let ids: Vec<String> = enrollments
            .iter()
            .filter_map(|r| r.get("student_id").and_then(Value::as_str))
            .map(|s| s.to_string())
            .collect();
        all_students.extend(ids.iter().cloned());
        students_by_course.insert(cid.to_string(), ids);
    }

    let mut per_institution = Vec::with_capacity(institutions.len());
    for inst in &institutions {
        let Some(inst_id) = inst.get("id").and_then(Value::as_str) else {
            continue;
        };
        let careers = store.select(
            &CAREERS,
            SelectSpec {
                columns: &["id"],
                filter: Filter::new().eq("institution_id", inst_id),
                ..Default::default()
            },
            &Scope::Unscoped,
        )?;
        let career_ids: HashSet<&str> = careers
            .iter()
            .filter_map(|c| c.get("id").and_then(Value::as_str))
            .collect();

        let mut students: HashSet<&str> = HashSet::new();
        for course in &courses {
            let in_institution = course
                .get("career_id")
                .and_then(Value::as_str)
                .map(|cid| career_ids.contains(cid))
                .unwrap_or(false);
            if !in_institution {
                continue;
            }
            if let Some(cid) = course.get("id").and_then(Value::as_str) {
                if let Some(ids) = students_by_course.get(cid) {
                    students.extend(ids.iter().map(String::as_str));
                }
            }
        }

        per_institution.push(json!({
            "institutionName": inst.get("name").cloned().unwrap_or(Value::Null),
            "studentCount": students.len(),
        }));
    }

    Ok(json!({
        "institutionCount": institutions.len(),
        "courseCount": courses.len(),
        "studentCount": all_students.len(),
        "studentsPerInstitution": per_institution,
    }))
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };

    match summary(conn, &session.user_id) {
        Ok(result) => ok(&req.id, result),
        Err(e) => {
            tracing::error!(error = %e, "dashboard summary failed");
            err(&req.id, "store_error", "Could not load the dashboard.", None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
