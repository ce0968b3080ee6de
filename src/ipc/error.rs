use serde_json::json;

use crate::validate::FieldErrors;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Field-keyed validation failure. Expected and user-correctable, so it is
/// never logged; the field map rides in `details`.
pub fn validation(id: &str, errors: FieldErrors) -> serde_json::Value {
    let message = errors
        .first_message()
        .unwrap_or("Invalid input.")
        .to_string();
    err(id, "validation_failed", message, Some(errors.into_json()))
}
