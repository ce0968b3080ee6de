//! Schema validation for raw form/import input. Produces either a
//! normalized record ready for the gateway or a field-keyed set of
//! human-readable messages. Never touches storage.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use uuid::Uuid;

pub type Fields = Map<String, Value>;

#[derive(Debug, Default)]
pub struct FieldErrors {
    entries: BTreeMap<String, String>,
}

impl FieldErrors {
    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.entries.entry(field.to_string()).or_insert(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_message(&self) -> Option<&str> {
        self.entries.values().next().map(String::as_str)
    }

    pub fn into_json(self) -> Value {
        let mut out = Map::new();
        for (field, message) in self.entries {
            out.insert(field, Value::String(message));
        }
        Value::Object(out)
    }
}

fn text(params: &Value, key: &str) -> String {
    match params.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn name_field(
    params: &Value,
    key: &str,
    min: usize,
    errors: &mut FieldErrors,
    out: &mut Fields,
) {
    let value = text(params, key);
    if value.chars().count() < min {
        errors.push(
            key,
            format!("The {} must be at least {} characters.", key.replace('_', " "), min),
        );
    } else {
        out.insert(key.to_string(), Value::String(value));
    }
}

fn uuid_field(params: &Value, key: &str, errors: &mut FieldErrors, out: &mut Fields) {
    let value = text(params, key);
    if Uuid::parse_str(&value).is_err() {
        errors.push(key, format!("Please select a valid {}.", key.trim_end_matches("_id")));
    } else {
        out.insert(key.to_string(), Value::String(value));
    }
}

/// Optional email: empty means "no email" and stores as null; anything
/// else must look like an address.
fn email_field(params: &Value, key: &str, errors: &mut FieldErrors, out: &mut Fields) {
    let value = text(params, key);
    if value.is_empty() {
        out.insert(key.to_string(), Value::Null);
    } else if is_valid_email(&value) {
        out.insert(key.to_string(), Value::String(value));
    } else {
        errors.push(key, "Please enter a valid email address.");
    }
}

pub fn is_valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return false;
    }
    domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !domain.contains("..")
}

pub fn is_uuid(s: &str) -> bool {
    Uuid::parse_str(s).is_ok()
}

pub fn institution(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    name_field(params, "name", 3, &mut errors, &mut out);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn career(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    name_field(params, "name", 3, &mut errors, &mut out);
    uuid_field(params, "institution_id", &mut errors, &mut out);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn course(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    name_field(params, "name", 3, &mut errors, &mut out);
    for key in ["career_id", "grade_id", "section_id", "period_id"] {
        uuid_field(params, key, &mut errors, &mut out);
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn grade_item(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    name_field(params, "level", 1, &mut errors, &mut out);
    name_field(params, "grade", 1, &mut errors, &mut out);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn section_item(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    name_field(params, "section", 1, &mut errors, &mut out);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn period_item(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    name_field(params, "period", 1, &mut errors, &mut out);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn student(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    let code = text(params, "student_code");
    out.insert(
        "student_code".to_string(),
        if code.is_empty() {
            Value::Null
        } else {
            Value::String(code)
        },
    );
    name_field(params, "first_name", 2, &mut errors, &mut out);
    name_field(params, "last_name", 2, &mut errors, &mut out);
    email_field(params, "email", &mut errors, &mut out);
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

/// Update patch for a student: only the keys present in the request are
/// validated and written, so an absent `student_code` or `email` leaves
/// the stored value untouched. An explicit empty string still clears.
pub fn student_patch(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    if params.get("student_code").is_some() {
        let code = text(params, "student_code");
        out.insert(
            "student_code".to_string(),
            if code.is_empty() {
                Value::Null
            } else {
                Value::String(code)
            },
        );
    }
    for key in ["first_name", "last_name"] {
        if params.get(key).is_some() {
            name_field(params, key, 2, &mut errors, &mut out);
        }
    }
    if params.get("email").is_some() {
        email_field(params, "email", &mut errors, &mut out);
    }
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn profile(params: &Value) -> Result<Fields, FieldErrors> {
    let mut errors = FieldErrors::default();
    let mut out = Fields::new();
    name_field(params, "first_name", 2, &mut errors, &mut out);
    name_field(params, "last_name", 2, &mut errors, &mut out);
    let phone = text(params, "phone_number");
    out.insert(
        "phone_number".to_string(),
        if phone.is_empty() {
            Value::Null
        } else {
            Value::String(phone)
        },
    );
    if errors.is_empty() {
        Ok(out)
    } else {
        Err(errors)
    }
}

pub fn password(raw: &str) -> Result<String, FieldErrors> {
    if raw.chars().count() < 6 {
        let mut errors = FieldErrors::default();
        errors.push("password", "The password must be at least 6 characters.");
        Err(errors)
    } else {
        Ok(raw.to_string())
    }
}

pub struct SignUpInput {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

pub fn sign_up(params: &Value) -> Result<SignUpInput, FieldErrors> {
    let mut errors = FieldErrors::default();
    let email = text(params, "email");
    if !is_valid_email(&email) {
        errors.push("email", "Please enter a valid email address.");
    }
    let raw_password = match params.get("password").and_then(Value::as_str) {
        Some(p) => p.to_string(),
        None => String::new(),
    };
    let password = match password(&raw_password) {
        Ok(p) => p,
        Err(e) => {
            if let Some(msg) = e.first_message() {
                errors.push("password", msg.to_string());
            }
            String::new()
        }
    };
    let mut names = Fields::new();
    name_field(params, "first_name", 2, &mut errors, &mut names);
    name_field(params, "last_name", 2, &mut errors, &mut names);

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(SignUpInput {
        email,
        password,
        first_name: names
            .get("first_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        last_name: names
            .get("last_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Batch validation for the import pipeline. Any bad row rejects the whole
/// batch; the offending row and field are reported for the log only.
#[derive(Debug)]
pub struct ImportRowError {
    pub row: usize,
    pub field: &'static str,
}

pub fn import_rows(
    rows: &[BTreeMap<String, String>],
) -> Result<Vec<Fields>, ImportRowError> {
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let mut fields = Fields::new();

        let code = row.get("student_code").map(|s| s.trim()).unwrap_or("");
        fields.insert(
            "student_code".to_string(),
            if code.is_empty() {
                Value::Null
            } else {
                Value::String(code.to_string())
            },
        );

        for key in ["first_name", "last_name"] {
            let value = row.get(key).map(|s| s.trim()).unwrap_or("");
            if value.is_empty() {
                return Err(ImportRowError {
                    row: i,
                    field: if key == "first_name" {
                        "first_name"
                    } else {
                        "last_name"
                    },
                });
            }
            fields.insert(key.to_string(), Value::String(value.to_string()));
        }

        let email = row.get("email").map(|s| s.trim()).unwrap_or("");
        if email.is_empty() {
            fields.insert("email".to_string(), Value::Null);
        } else if is_valid_email(email) {
            fields.insert("email".to_string(), Value::String(email.to_string()));
        } else {
            return Err(ImportRowError {
                row: i,
                field: "email",
            });
        }

        out.push(fields);
    }
    Ok(out)
}
