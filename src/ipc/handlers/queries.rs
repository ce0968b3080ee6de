use std::collections::HashMap;

use rusqlite::Connection;
use serde_json::{json, Value};

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::store::{
    Filter, Join, Scope, SelectSpec, Store, CAREERS, COURSES, GRADES_CATALOG, INSTITUTIONS,
    PERIODS_CATALOG, SECTIONS_CATALOG,
};

fn field(row: &serde_json::Map<String, Value>, key: &str) -> Value {
    row.get(key).cloned().unwrap_or(Value::Null)
}

fn list_institutions(conn: &Connection, user_id: &str) -> anyhow::Result<Value> {
    let store = Store::new(conn);
    let institutions = store.select(
        &INSTITUTIONS,
        SelectSpec {
            columns: &["id", "name", "created_at"],
            order: Some("name"),
            ..Default::default()
        },
        &Scope::Owner(user_id.to_string()),
    )?;

    let mut out = Vec::with_capacity(institutions.len());
    for inst in &institutions {
        let inst_id = inst.get("id").and_then(Value::as_str).unwrap_or_default();
        let careers = store.select(
            &CAREERS,
            SelectSpec {
                columns: &["id", "name"],
                filter: Filter::new().eq("institution_id", inst_id),
                order: Some("name"),
                ..Default::default()
            },
            &Scope::Unscoped,
        )?;
        let careers: Vec<Value> = careers
            .iter()
            .map(|c| json!({ "id": field(c, "id"), "name": field(c, "name") }))
            .collect();
        out.push(json!({
            "id": field(inst, "id"),
            "name": field(inst, "name"),
            "createdAt": field(inst, "created_at"),
            "careers": careers,
        }));
    }
    Ok(json!({ "institutions": out }))
}

fn list_careers(conn: &Connection, institution_id: &str) -> anyhow::Result<Value> {
    let store = Store::new(conn);
    let careers = store.select(
        &CAREERS,
        SelectSpec {
            columns: &["id", "name", "institution_id"],
            filter: Filter::new().eq("institution_id", institution_id),
            order: Some("name"),
            ..Default::default()
        },
        &Scope::Unscoped,
    )?;
    let careers: Vec<Value> = careers
        .iter()
        .map(|c| {
            json!({
                "id": field(c, "id"),
                "name": field(c, "name"),
                "institutionId": field(c, "institution_id"),
            })
        })
        .collect();
    Ok(json!({ "careers": careers }))
}

fn list_catalog(conn: &Connection, catalog: &str) -> anyhow::Result<Option<Value>> {
    let store = Store::new(conn);
    let (collection, order) = match catalog {
        "grades" => (&GRADES_CATALOG, "level, grade"),
        "sections" => (&SECTIONS_CATALOG, "section"),
        "periods" => (&PERIODS_CATALOG, "period"),
        _ => return Ok(None),
    };
    let rows = store.select(
        collection,
        SelectSpec {
            order: Some(order),
            ..Default::default()
        },
        &Scope::Unscoped,
    )?;
    let items: Vec<Value> = rows.into_iter().map(Value::Object).collect();
    Ok(Some(json!({ "items": items })))
}

fn list_courses(conn: &Connection, user_id: &str) -> anyhow::Result<Value> {
    let store = Store::new(conn);
    let courses = store.select(
        &COURSES,
        SelectSpec {
            columns: &["id", "name", "career_id", "created_at"],
            order: Some("created_at DESC"),
            joins: &[
                Join {
                    collection: &CAREERS,
                    fk: "career_id",
                    columns: &[("name", "career_name"), ("institution_id", "institution_id")],
                },
                Join {
                    collection: &GRADES_CATALOG,
                    fk: "grade_id",
                    columns: &[("grade", "grade")],
                },
                Join {
                    collection: &SECTIONS_CATALOG,
                    fk: "section_id",
                    columns: &[("section", "section")],
                },
                Join {
                    collection: &PERIODS_CATALOG,
                    fk: "period_id",
                    columns: &[("period", "period")],
                },
            ],
            ..Default::default()
        },
        &Scope::Owner(user_id.to_string()),
    )?;

    // Institution labels come through the career, one extra lookup.
    let career_rows = store.select(
        &CAREERS,
        SelectSpec {
            columns: &["id"],
            joins: &[Join {
                collection: &INSTITUTIONS,
                fk: "institution_id",
                columns: &[("name", "institution_name")],
            }],
            ..Default::default()
        },
        &Scope::Unscoped,
    )?;
    let institution_by_career: HashMap<String, Value> = career_rows
        .into_iter()
        .filter_map(|row| {
            let id = row.get("id").and_then(Value::as_str)?.to_string();
            Some((id, row.get("institution_name").cloned().unwrap_or(Value::Null)))
        })
        .collect();

    let courses: Vec<Value> = courses
        .iter()
        .map(|c| {
            let career_id = c.get("career_id").and_then(Value::as_str).unwrap_or_default();
            json!({
                "id": field(c, "id"),
                "name": field(c, "name"),
                "createdAt": field(c, "created_at"),
                "careerId": field(c, "career_id"),
                "careerName": field(c, "career_name"),
                "institutionName": institution_by_career
                    .get(career_id)
                    .cloned()
                    .unwrap_or(Value::Null),
                "grade": field(c, "grade"),
                "section": field(c, "section"),
                "period": field(c, "period"),
            })
        })
        .collect();
    Ok(json!({ "courses": courses }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "institutions.list" | "courses.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            let Some(session) = state.session.as_ref() else {
                return Some(err(&req.id, "unauthorized", "Not authorized.", None));
            };
            if req.method == "institutions.list" {
                list_institutions(conn, &session.user_id)
            } else {
                list_courses(conn, &session.user_id)
            }
        }
        "careers.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            let Some(institution_id) =
                req.params.get("institutionId").and_then(Value::as_str)
            else {
                return Some(err(&req.id, "bad_params", "missing institutionId", None));
            };
            list_careers(conn, institution_id)
        }
        "catalogs.list" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            let Some(catalog) = req.params.get("catalog").and_then(Value::as_str) else {
                return Some(err(&req.id, "bad_params", "missing catalog", None));
            };
            match list_catalog(conn, catalog) {
                Ok(Some(v)) => Ok(v),
                Ok(None) => {
                    return Some(err(
                        &req.id,
                        "bad_params",
                        format!("unknown catalog: {}", catalog),
                        None,
                    ))
                }
                Err(e) => Err(e),
            }
        }
        _ => return None,
    };

    Some(match result {
        Ok(value) => ok(&req.id, value),
        Err(e) => {
            tracing::error!(method = %req.method, error = %e, "list query failed");
            err(&req.id, "store_error", "Could not load the data.", None)
        }
    })
}
