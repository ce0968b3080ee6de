//! Data-access gateway. Every read or write goes through a named
//! `Collection` descriptor and carries an explicit `Scope`; a collection
//! with an owner column refuses an unscoped call, so a query that would
//! leak rows across owners cannot be expressed here.

use anyhow::{bail, Context};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type Record = Map<String, Value>;

pub struct Collection {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub owner_column: Option<&'static str>,
}

pub static USERS: Collection = Collection {
    name: "users",
    columns: &["id", "email", "password_hash", "salt", "created_at"],
    owner_column: None,
};

pub static PROFILES: Collection = Collection {
    name: "profiles",
    columns: &[
        "id",
        "first_name",
        "last_name",
        "phone_number",
        "avatar_url",
        "updated_at",
    ],
    // A profile row is keyed by its user; scoping folds into the pk.
    owner_column: Some("id"),
};

pub static INSTITUTIONS: Collection = Collection {
    name: "institutions",
    columns: &["id", "name", "owner_id", "created_at", "updated_at"],
    owner_column: Some("owner_id"),
};

pub static CAREERS: Collection = Collection {
    name: "careers",
    columns: &["id", "name", "institution_id", "updated_at"],
    owner_column: None,
};

pub static GRADES_CATALOG: Collection = Collection {
    name: "grades_catalog",
    columns: &["id", "level", "grade"],
    owner_column: None,
};

pub static SECTIONS_CATALOG: Collection = Collection {
    name: "sections_catalog",
    columns: &["id", "section"],
    owner_column: None,
};

pub static PERIODS_CATALOG: Collection = Collection {
    name: "periods_catalog",
    columns: &["id", "period"],
    owner_column: None,
};

pub static COURSES: Collection = Collection {
    name: "courses",
    columns: &[
        "id",
        "name",
        "career_id",
        "grade_id",
        "section_id",
        "period_id",
        "teacher_id",
        "created_at",
        "updated_at",
    ],
    owner_column: Some("teacher_id"),
};

pub static STUDENTS: Collection = Collection {
    name: "students",
    columns: &[
        "id",
        "student_code",
        "first_name",
        "last_name",
        "email",
        "updated_at",
    ],
    owner_column: None,
};

pub static ENROLLMENTS: Collection = Collection {
    name: "enrollments",
    columns: &["student_id", "course_id"],
    owner_column: None,
};

#[derive(Debug, Clone)]
pub enum Scope {
    Owner(String),
    Unscoped,
}

#[derive(Debug, Default, Clone)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((column.to_string(), value.into()));
        self
    }
}

/// Left join from a base collection's foreign key to another collection's
/// id, projecting `(column, alias)` pairs into the result rows.
pub struct Join {
    pub collection: &'static Collection,
    pub fk: &'static str,
    pub columns: &'static [(&'static str, &'static str)],
}

#[derive(Default)]
pub struct SelectSpec<'s> {
    /// Base columns to project; empty means all of them.
    pub columns: &'s [&'s str],
    pub filter: Filter,
    pub order: Option<&'s str>,
    pub joins: &'s [Join],
}

pub struct UpsertOutcome {
    pub id: Option<String>,
    pub inserted: bool,
}

pub struct Store<'a> {
    conn: &'a Connection,
}

impl<'a> Store<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(
        &self,
        col: &'static Collection,
        mut record: Record,
        scope: &Scope,
    ) -> anyhow::Result<Record> {
        if let Some((owner_col, owner)) = scope_clause(col, scope)? {
            record.insert(owner_col, Value::String(owner));
        }
        if col.columns.contains(&"id") && !record.contains_key("id") {
            record.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        check_columns(col, record.keys())?;

        let names: Vec<&str> = record.keys().map(String::as_str).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {}({}) VALUES({})",
            col.name,
            names.join(", "),
            placeholders
        );
        let params: Vec<rusqlite::types::Value> = record.values().map(to_sql).collect();
        self.conn
            .execute(&sql, params_from_iter(params))
            .with_context(|| format!("insert into {}", col.name))?;
        Ok(record)
    }

    pub fn update(
        &self,
        col: &'static Collection,
        patch: Record,
        filter: Filter,
        scope: &Scope,
    ) -> anyhow::Result<usize> {
        if patch.is_empty() {
            bail!("empty patch for {}", col.name);
        }
        check_columns(col, patch.keys())?;
        check_columns(col, filter.clauses.iter().map(|(c, _)| c))?;

        let mut where_clauses = filter.clauses.clone();
        if let Some((owner_col, owner)) = scope_clause(col, scope)? {
            where_clauses.push((owner_col, Value::String(owner)));
        }
        if where_clauses.is_empty() {
            bail!("refusing unfiltered update of {}", col.name);
        }

        let set = patch
            .keys()
            .map(|k| format!("{} = ?", k))
            .collect::<Vec<_>>()
            .join(", ");
        let cond = where_clauses
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("UPDATE {} SET {} WHERE {}", col.name, set, cond);
        let params: Vec<rusqlite::types::Value> = patch
            .values()
            .map(to_sql)
            .chain(where_clauses.iter().map(|(_, v)| to_sql(v)))
            .collect();
        let n = self
            .conn
            .execute(&sql, params_from_iter(params))
            .with_context(|| format!("update {}", col.name))?;
        Ok(n)
    }

    pub fn delete(
        &self,
        col: &'static Collection,
        filter: Filter,
        scope: &Scope,
    ) -> anyhow::Result<usize> {
        check_columns(col, filter.clauses.iter().map(|(c, _)| c))?;

        let mut where_clauses = filter.clauses.clone();
        if let Some((owner_col, owner)) = scope_clause(col, scope)? {
            where_clauses.push((owner_col, Value::String(owner)));
        }
        if where_clauses.is_empty() {
            bail!("refusing unfiltered delete of {}", col.name);
        }

        let cond = where_clauses
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("DELETE FROM {} WHERE {}", col.name, cond);
        let params: Vec<rusqlite::types::Value> =
            where_clauses.iter().map(|(_, v)| to_sql(v)).collect();
        let n = self
            .conn
            .execute(&sql, params_from_iter(params))
            .with_context(|| format!("delete from {}", col.name))?;
        Ok(n)
    }

    pub fn select(
        &self,
        col: &'static Collection,
        spec: SelectSpec<'_>,
        scope: &Scope,
    ) -> anyhow::Result<Vec<Record>> {
        let base_columns: Vec<&str> = if spec.columns.is_empty() {
            col.columns.to_vec()
        } else {
            spec.columns.to_vec()
        };
        check_columns(col, base_columns.iter())?;
        check_columns(col, spec.filter.clauses.iter().map(|(c, _)| c))?;

        let mut projected: Vec<String> = Vec::new();
        let mut out_names: Vec<String> = Vec::new();
        for c in &base_columns {
            projected.push(format!("{}.{}", col.name, c));
            out_names.push(c.to_string());
        }
        for (ji, join) in spec.joins.iter().enumerate() {
            if !col.columns.contains(&join.fk) {
                bail!("unknown join key {} for {}", join.fk, col.name);
            }
            if !join.collection.columns.contains(&"id") {
                bail!("collection {} cannot be joined", join.collection.name);
            }
            for (jc, alias) in join.columns {
                if !join.collection.columns.contains(jc) {
                    bail!("unknown column {} for {}", jc, join.collection.name);
                }
                projected.push(format!("j{}.{} AS {}", ji, jc, alias));
                out_names.push(alias.to_string());
            }
        }

        let mut sql = format!("SELECT {} FROM {}", projected.join(", "), col.name);
        for (ji, join) in spec.joins.iter().enumerate() {
            sql.push_str(&format!(
                " LEFT JOIN {} j{} ON {}.{} = j{}.id",
                join.collection.name, ji, col.name, join.fk, ji
            ));
        }

        let mut where_clauses = spec.filter.clauses.clone();
        if let Some((owner_col, owner)) = scope_clause(col, scope)? {
            where_clauses.push((owner_col, Value::String(owner)));
        }
        if !where_clauses.is_empty() {
            let cond = where_clauses
                .iter()
                .map(|(c, _)| format!("{}.{} = ?", col.name, c))
                .collect::<Vec<_>>()
                .join(" AND ");
            sql.push_str(&format!(" WHERE {}", cond));
        }
        if let Some(order) = spec.order {
            sql.push_str(&format!(" ORDER BY {}", order));
        }

        let params: Vec<rusqlite::types::Value> =
            where_clauses.iter().map(|(_, v)| to_sql(v)).collect();
        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("select from {}", col.name))?;
        let rows = stmt
            .query_map(params_from_iter(params), |row| {
                let mut out = Record::new();
                for (i, name) in out_names.iter().enumerate() {
                    let v: rusqlite::types::Value = row.get(i)?;
                    out.insert(name.clone(), from_sql(v));
                }
                Ok(out)
            })?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("select from {}", col.name))?;
        Ok(rows)
    }

    /// Insert-or-update keyed on `conflict_key`, resolved row by row so the
    /// caller learns which records were actually inserted. In ignore mode a
    /// matching row is left untouched.
    pub fn upsert(
        &self,
        col: &'static Collection,
        records: Vec<Record>,
        conflict_key: &[&str],
        ignore_duplicates: bool,
        scope: &Scope,
    ) -> anyhow::Result<Vec<UpsertOutcome>> {
        check_columns(col, conflict_key.iter())?;
        let has_id = col.columns.contains(&"id");
        let probe: Vec<&str> = if has_id {
            vec!["id"]
        } else {
            conflict_key.to_vec()
        };

        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let mut filter = Filter::new();
            for key in conflict_key {
                let v = record.get(*key).cloned().unwrap_or(Value::Null);
                filter = filter.eq(key, v);
            }

            let existing = self.select(
                col,
                SelectSpec {
                    columns: &probe,
                    filter: filter.clone(),
                    ..Default::default()
                },
                scope,
            )?;

            if let Some(row) = existing.first() {
                let id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string());
                if !ignore_duplicates {
                    let patch: Record = record
                        .iter()
                        .filter(|(k, _)| {
                            k.as_str() != "id" && !conflict_key.contains(&k.as_str())
                        })
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    if !patch.is_empty() {
                        let update_filter = match &id {
                            Some(id) => Filter::new().eq("id", id.as_str()),
                            None => filter.clone(),
                        };
                        self.update(col, patch, update_filter, scope)?;
                    }
                }
                outcomes.push(UpsertOutcome {
                    id,
                    inserted: false,
                });
            } else {
                let inserted = self.insert(col, record, scope)?;
                let id = inserted
                    .get("id")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string());
                outcomes.push(UpsertOutcome { id, inserted: true });
            }
        }
        Ok(outcomes)
    }
}

/// Compensation log for multi-step writes. Forward steps record a delete
/// for every row they inserted; on the first failing step the caller aborts
/// and the recorded deletes run in reverse, best effort. Updates to rows
/// that already existed record nothing and are not undone.
pub struct Saga {
    undo: Vec<(&'static Collection, Filter)>,
}

impl Saga {
    pub fn new() -> Self {
        Self { undo: Vec::new() }
    }

    pub fn record_delete(&mut self, col: &'static Collection, filter: Filter) {
        self.undo.push((col, filter));
    }

    pub fn abort(mut self, store: &Store) {
        while let Some((col, filter)) = self.undo.pop() {
            if let Err(e) = store.delete(col, filter, &Scope::Unscoped) {
                tracing::error!(collection = col.name, error = %e, "compensating delete failed");
            }
        }
    }
}

fn scope_clause(col: &Collection, scope: &Scope) -> anyhow::Result<Option<(String, String)>> {
    match (col.owner_column, scope) {
        (Some(owner_col), Scope::Owner(owner)) => {
            Ok(Some((owner_col.to_string(), owner.clone())))
        }
        (Some(_), Scope::Unscoped) => bail!("collection {} requires an owner scope", col.name),
        (None, Scope::Owner(_)) => bail!("collection {} is not owner scoped", col.name),
        (None, Scope::Unscoped) => Ok(None),
    }
}

fn check_columns<S, I>(col: &Collection, names: I) -> anyhow::Result<()>
where
    S: AsRef<str>,
    I: Iterator<Item = S>,
{
    for name in names {
        let name = name.as_ref();
        if !col.columns.contains(&name) {
            bail!("unknown column {} for {}", name, col.name);
        }
    }
    Ok(())
}

fn to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn from_sql(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(i) => Value::from(i),
        rusqlite::types::Value::Real(f) => Value::from(f),
        rusqlite::types::Value::Text(s) => Value::String(s),
        rusqlite::types::Value::Blob(_) => Value::Null,
    }
}
