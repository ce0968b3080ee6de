//! Generic create/update/delete for every descriptor-backed entity
//! (institutions, careers, courses, catalogs). One code path: validate,
//! resolve the session, call the gateway, map store failures to a generic
//! entity-specific message. Cascaded dependents are removed by the store.

use serde_json::{json, Value};

use crate::auth::Session;
use crate::db;
use crate::entity::{self, EntityDescriptor};
use crate::ipc::error::{err, ok, validation};
use crate::ipc::types::{AppState, Request};
use crate::store::{Filter, Scope, Store};

fn scope_for(desc: &EntityDescriptor, session: &Session) -> Scope {
    if desc.collection.owner_column.is_some() {
        Scope::Owner(session.user_id.clone())
    } else {
        Scope::Unscoped
    }
}

fn handle_create(state: &mut AppState, req: &Request, desc: &EntityDescriptor) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };
    let mut record = match (desc.validate)(&req.params) {
        Ok(fields) => fields,
        Err(e) => return validation(&req.id, e),
    };
    if desc.collection.columns.contains(&"created_at") {
        record.insert("created_at".to_string(), Value::String(db::now_utc()));
    }

    let store = Store::new(conn);
    match store.insert(desc.collection, record, &scope_for(desc, session)) {
        Ok(row) => ok(
            &req.id,
            json!({
                "message": format!("The {} was created successfully.", desc.label),
                "id": row.get("id").cloned().unwrap_or(Value::Null)
            }),
        ),
        Err(e) => {
            tracing::error!(entity = desc.label, error = %e, "create failed");
            err(
                &req.id,
                "store_error",
                format!("Could not create the {}.", desc.label),
                None,
            )
        }
    }
}

fn handle_update(state: &mut AppState, req: &Request, desc: &EntityDescriptor) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };
    let Some(id) = req.params.get("id").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing id", None);
    };
    let mut patch = match (desc.validate)(&req.params) {
        Ok(fields) => fields,
        Err(e) => return validation(&req.id, e),
    };
    if desc.collection.columns.contains(&"updated_at") {
        patch.insert("updated_at".to_string(), Value::String(db::now_utc()));
    }

    let store = Store::new(conn);
    match store.update(
        desc.collection,
        patch,
        Filter::new().eq("id", id),
        &scope_for(desc, session),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({
                "message": format!("The {} was updated successfully.", desc.label)
            }),
        ),
        Err(e) => {
            tracing::error!(entity = desc.label, error = %e, "update failed");
            err(
                &req.id,
                "store_error",
                format!("Could not update the {}.", desc.label),
                None,
            )
        }
    }
}

fn handle_delete(state: &mut AppState, req: &Request, desc: &EntityDescriptor) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };
    let Some(id) = req.params.get("id").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    let store = Store::new(conn);
    match store.delete(
        desc.collection,
        Filter::new().eq("id", id),
        &scope_for(desc, session),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({
                "message": format!("The {} was deleted successfully.", desc.label)
            }),
        ),
        Err(e) => {
            tracing::error!(entity = desc.label, error = %e, "delete failed");
            err(
                &req.id,
                "store_error",
                format!("Could not delete the {}.", desc.label),
                None,
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (ns, verb) = req.method.rsplit_once('.')?;
    if !matches!(verb, "create" | "update" | "delete") {
        return None;
    }
    let desc = if ns == "catalogs" {
        let Some(catalog) = req.params.get("catalog").and_then(Value::as_str) else {
            return Some(err(&req.id, "bad_params", "missing catalog", None));
        };
        match entity::find(&format!("catalogs/{}", catalog)) {
            Some(d) => d,
            None => {
                return Some(err(
                    &req.id,
                    "bad_params",
                    format!("unknown catalog: {}", catalog),
                    None,
                ))
            }
        }
    } else {
        entity::find(ns)?
    };

    Some(match verb {
        "create" => handle_create(state, req, desc),
        "update" => handle_update(state, req, desc),
        _ => handle_delete(state, req, desc),
    })
}
