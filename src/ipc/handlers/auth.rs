use serde_json::{json, Value};

use crate::auth::{self, Session};
use crate::db;
use crate::ipc::error::{err, ok, validation};
use crate::ipc::types::{AppState, Request};
use crate::store::{Filter, Record, Saga, Scope, SelectSpec, Store};
use crate::validate;

fn handle_sign_up(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let input = match validate::sign_up(&req.params) {
        Ok(i) => i,
        Err(e) => return validation(&req.id, e),
    };

    let store = Store::new(conn);
    let salt = auth::new_salt();
    let mut user = Record::new();
    user.insert("email".to_string(), Value::String(input.email.clone()));
    user.insert(
        "password_hash".to_string(),
        Value::String(auth::hash_password(&salt, &input.password)),
    );
    user.insert("salt".to_string(), Value::String(salt));
    user.insert("created_at".to_string(), Value::String(db::now_utc()));

    let mut saga = Saga::new();
    let user = match store.insert(&crate::store::USERS, user, &Scope::Unscoped) {
        Ok(row) => row,
        Err(e) => {
            tracing::error!(error = %e, "sign up failed");
            return err(
                &req.id,
                "store_error",
                "Could not register the user. The email may already be in use.",
                None,
            );
        }
    };
    let user_id = user
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    saga.record_delete(
        &crate::store::USERS,
        Filter::new().eq("id", user_id.as_str()),
    );

    let mut profile = Record::new();
    profile.insert(
        "first_name".to_string(),
        Value::String(input.first_name),
    );
    profile.insert("last_name".to_string(), Value::String(input.last_name));
    if let Err(e) = store.insert(
        &crate::store::PROFILES,
        profile,
        &Scope::Owner(user_id.clone()),
    ) {
        tracing::error!(error = %e, "profile creation failed");
        saga.abort(&store);
        return err(&req.id, "store_error", "Could not register the user.", None);
    }

    ok(
        &req.id,
        json!({
            "message": "Registration successful. You can sign in now.",
            "userId": user_id
        }),
    )
}

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let email = req
        .params
        .get("email")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let password = req
        .params
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let store = Store::new(conn);
    let rows = match store.select(
        &crate::store::USERS,
        SelectSpec {
            columns: &["id", "email", "password_hash", "salt"],
            filter: Filter::new().eq("email", email.as_str()),
            ..Default::default()
        },
        &Scope::Unscoped,
    ) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "sign in lookup failed");
            return err(&req.id, "store_error", "Could not sign in.", None);
        }
    };

    let invalid = || {
        err(
            &req.id,
            "invalid_credentials",
            "Invalid credentials. Please try again.",
            None,
        )
    };
    let Some(row) = rows.first() else {
        return invalid();
    };
    let salt = row.get("salt").and_then(Value::as_str).unwrap_or_default();
    let hash = row
        .get("password_hash")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !auth::verify_password(salt, &password, hash) {
        return invalid();
    }

    let user_id = row
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    state.session = Some(Session {
        user_id: user_id.clone(),
        email: email.clone(),
    });
    ok(&req.id, json!({ "user": { "id": user_id, "email": email } }))
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.session = None;
    ok(&req.id, json!({ "message": "Signed out." }))
}

fn handle_current_user(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.as_ref() {
        Some(s) => ok(
            &req.id,
            json!({ "user": { "id": s.user_id, "email": s.email } }),
        ),
        None => ok(&req.id, json!({ "user": Value::Null })),
    }
}

fn handle_update_password(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = state.session.as_ref() else {
        return err(&req.id, "unauthorized", "Not authorized.", None);
    };
    let raw = req
        .params
        .get("password")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let password = match validate::password(raw) {
        Ok(p) => p,
        Err(e) => return validation(&req.id, e),
    };

    let store = Store::new(conn);
    let salt = auth::new_salt();
    let mut patch = Record::new();
    patch.insert(
        "password_hash".to_string(),
        Value::String(auth::hash_password(&salt, &password)),
    );
    patch.insert("salt".to_string(), Value::String(salt));

    match store.update(
        &crate::store::USERS,
        patch,
        Filter::new().eq("id", session.user_id.as_str()),
        &Scope::Unscoped,
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "message": "Password updated successfully." }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "password update failed");
            err(&req.id, "store_error", "Could not update the password.", None)
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signUp" => Some(handle_sign_up(state, req)),
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.currentUser" => Some(handle_current_user(state, req)),
        "auth.updatePassword" => Some(handle_update_password(state, req)),
        _ => None,
    }
}
