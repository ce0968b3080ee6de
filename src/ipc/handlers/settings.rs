use std::path::Path;

use serde_json::{json, Value};

use crate::db;
use crate::ipc::error::{err, ok, validation};
use crate::ipc::types::{AppState, Request};
use crate::store::{Filter, Record, Scope, SelectSpec, Store, PROFILES};
use crate::validate;

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };

    let store = Store::new(conn);
    let rows = match store.select(
        &PROFILES,
        SelectSpec::default(),
        &Scope::Owner(session.user_id.clone()),
    ) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "profile lookup failed");
            return err(&req.id, "store_error", "Could not load the profile.", None);
        }
    };

    match rows.first() {
        Some(r) => ok(
            &req.id,
            json!({
                "profile": {
                    "firstName": r.get("first_name").cloned().unwrap_or(Value::Null),
                    "lastName": r.get("last_name").cloned().unwrap_or(Value::Null),
                    "phoneNumber": r.get("phone_number").cloned().unwrap_or(Value::Null),
                    "avatarUrl": r.get("avatar_url").cloned().unwrap_or(Value::Null),
                }
            }),
        ),
        None => ok(&req.id, json!({ "profile": Value::Null })),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };
    let mut patch = match validate::profile(&req.params) {
        Ok(f) => f,
        Err(e) => return validation(&req.id, e),
    };
    patch.insert("updated_at".to_string(), Value::String(db::now_utc()));

    let store = Store::new(conn);
    match store.update(
        &PROFILES,
        patch,
        Filter::new(),
        &Scope::Owner(session.user_id.clone()),
    ) {
        Ok(_) => ok(&req.id, json!({ "message": "Profile updated successfully." })),
        Err(e) => {
            tracing::error!(error = %e, "profile update failed");
            err(&req.id, "store_error", "Could not update the profile.", None)
        }
    }
}

/// Copies the picked file into the workspace's avatar area (overwriting any
/// previous avatar) and records the public URL on the profile.
fn handle_upload_avatar(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };
    let Some(source) = req.params.get("sourcePath").and_then(Value::as_str) else {
        return err(&req.id, "bad_params", "missing sourcePath", None);
    };

    let bytes = match std::fs::read(source) {
        Ok(b) if !b.is_empty() => b,
        Ok(_) => return err(&req.id, "bad_params", "No file was selected.", None),
        Err(e) => {
            tracing::error!(error = %e, "avatar read failed");
            return err(&req.id, "file_read_failed", "Could not read the image.", None);
        }
    };

    let ext = Path::new(source)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    let rel_path = format!("avatars/{}/avatar.{}", session.user_id, ext);
    let dest = workspace.join(&rel_path);
    if let Some(parent) = dest.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::error!(error = %e, "avatar dir creation failed");
            return err(&req.id, "file_write_failed", "Could not store the image.", None);
        }
    }
    if let Err(e) = std::fs::write(&dest, bytes) {
        tracing::error!(error = %e, "avatar write failed");
        return err(&req.id, "file_write_failed", "Could not store the image.", None);
    }

    let store = Store::new(conn);
    let mut patch = Record::new();
    patch.insert("avatar_url".to_string(), Value::String(rel_path.clone()));
    patch.insert("updated_at".to_string(), Value::String(db::now_utc()));
    match store.update(
        &PROFILES,
        patch,
        Filter::new(),
        &Scope::Owner(session.user_id.clone()),
    ) {
        Ok(_) => ok(&req.id, json!({ "publicUrl": rel_path })),
        Err(e) => {
            tracing::error!(error = %e, "avatar url save failed");
            err(&req.id, "store_error", "Could not save the image URL.", None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profile.get" => Some(handle_get(state, req)),
        "profile.update" => Some(handle_update(state, req)),
        "profile.uploadAvatar" => Some(handle_upload_avatar(state, req)),
        _ => None,
    }
}
