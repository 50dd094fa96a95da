//! Generic table access over the named collections the UI reads and writes.
//!
//! Every column name that reaches SQL is checked against the collection's
//! whitelist first; values are always bound as parameters.

use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::Map;
use thiserror::Error;
use uuid::Uuid;

pub type Record = Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown collection: {0}")]
    UnknownCollection(String),
    #[error("collection {collection} has no column {column}")]
    UnknownColumn { collection: String, column: String },
    #[error("column {column}: arrays and objects cannot be stored")]
    UnsupportedValue { column: String },
    #[error("refusing to {op} {collection} without a filter")]
    UnfilteredWrite { op: &'static str, collection: String },
    #[error("nothing to write")]
    EmptyRecord,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Assignments,
    Quizzes,
    UserSpecialties,
}

impl Collection {
    pub fn parse(name: &str) -> Result<Self, StoreError> {
        match name {
            "assignments" => Ok(Self::Assignments),
            "quizzes" => Ok(Self::Quizzes),
            "user_specialties" => Ok(Self::UserSpecialties),
            other => Err(StoreError::UnknownCollection(other.to_string())),
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            Self::Assignments => "assignments",
            Self::Quizzes => "quizzes",
            Self::UserSpecialties => "user_specialties",
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Assignments => &["id", "name", "due_date", "major", "grade"],
            Self::Quizzes => &["id", "name", "date", "class", "grade"],
            Self::UserSpecialties => &["nv_number", "grade", "specialty", "class", "role"],
        }
    }

    /// Rows keyed by a generated id get one on insert when the caller omits it.
    fn generated_key(self) -> Option<&'static str> {
        match self {
            Self::Assignments | Self::Quizzes => Some("id"),
            Self::UserSpecialties => None,
        }
    }

    fn check_column<'a>(self, column: &'a str) -> Result<&'a str, StoreError> {
        if self.columns().contains(&column) {
            Ok(column)
        } else {
            Err(StoreError::UnknownColumn {
                collection: self.table().to_string(),
                column: column.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            ascending: true,
        }
    }
}

fn to_sql_value(column: &str, v: &serde_json::Value) -> Result<Value, StoreError> {
    Ok(match v {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().unwrap_or(0.0)),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            return Err(StoreError::UnsupportedValue {
                column: column.to_string(),
            })
        }
    })
}

fn from_sql_value(v: ValueRef<'_>) -> serde_json::Value {
    match v {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => serde_json::Value::from(b.len()),
    }
}

/// Builds `WHERE a = ? AND b = ?` from equality filters.
fn where_clause(coll: Collection, filters: &Record) -> Result<(String, Vec<Value>), StoreError> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut parts = Vec::with_capacity(filters.len());
    let mut values = Vec::with_capacity(filters.len());
    for (col, v) in filters {
        let col = coll.check_column(col)?;
        if v.is_null() {
            parts.push(format!("{col} IS NULL"));
        } else {
            parts.push(format!("{col} = ?"));
            values.push(to_sql_value(col, v)?);
        }
    }
    Ok((format!(" WHERE {}", parts.join(" AND ")), values))
}

pub fn select(
    conn: &Connection,
    coll: Collection,
    filters: &Record,
    order: Option<&Order>,
) -> Result<Vec<Record>, StoreError> {
    let columns = coll.columns();
    let (where_sql, values) = where_clause(coll, filters)?;
    let mut sql = format!("SELECT {} FROM {}{}", columns.join(", "), coll.table(), where_sql);
    if let Some(o) = order {
        let col = coll.check_column(&o.column)?;
        sql.push_str(&format!(
            " ORDER BY {col} {}",
            if o.ascending { "ASC" } else { "DESC" }
        ));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            let mut rec = Record::new();
            for (i, col) in columns.iter().enumerate() {
                rec.insert(col.to_string(), from_sql_value(row.get_ref(i)?));
            }
            Ok(rec)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn select_one(conn: &Connection, coll: Collection, filters: &Record) -> Result<Option<Record>, StoreError> {
    Ok(select(conn, coll, filters, None)?.into_iter().next())
}

/// Inserts one record and returns it as stored (including a generated id).
pub fn insert(conn: &Connection, coll: Collection, record: &Record) -> Result<Record, StoreError> {
    let mut rec = record.clone();
    if let Some(key) = coll.generated_key() {
        let missing = rec.get(key).map(|v| v.is_null()).unwrap_or(true);
        if missing {
            rec.insert(key.to_string(), Uuid::new_v4().to_string().into());
        }
    }
    if rec.is_empty() {
        return Err(StoreError::EmptyRecord);
    }

    let mut cols = Vec::with_capacity(rec.len());
    let mut values = Vec::with_capacity(rec.len());
    for (col, v) in &rec {
        cols.push(coll.check_column(col)?);
        values.push(to_sql_value(col, v)?);
    }
    let placeholders = vec!["?"; cols.len()].join(", ");
    let sql = format!(
        "INSERT INTO {}({}) VALUES({})",
        coll.table(),
        cols.join(", "),
        placeholders
    );
    conn.execute(&sql, params_from_iter(values))?;
    Ok(rec)
}

/// Returns the number of rows changed. Refuses an empty filter.
pub fn update(
    conn: &Connection,
    coll: Collection,
    filters: &Record,
    values: &Record,
) -> Result<usize, StoreError> {
    if filters.is_empty() {
        return Err(StoreError::UnfilteredWrite {
            op: "update",
            collection: coll.table().to_string(),
        });
    }
    if values.is_empty() {
        return Err(StoreError::EmptyRecord);
    }
    let mut sets = Vec::with_capacity(values.len());
    let mut params = Vec::with_capacity(values.len() + filters.len());
    for (col, v) in values {
        let col = coll.check_column(col)?;
        sets.push(format!("{col} = ?"));
        params.push(to_sql_value(col, v)?);
    }
    let (where_sql, where_values) = where_clause(coll, filters)?;
    params.extend(where_values);
    let sql = format!("UPDATE {} SET {}{}", coll.table(), sets.join(", "), where_sql);
    Ok(conn.execute(&sql, params_from_iter(params))?)
}

/// Returns the number of rows removed. Refuses an empty filter.
pub fn delete(conn: &Connection, coll: Collection, filters: &Record) -> Result<usize, StoreError> {
    if filters.is_empty() {
        return Err(StoreError::UnfilteredWrite {
            op: "delete",
            collection: coll.table().to_string(),
        });
    }
    let (where_sql, values) = where_clause(coll, filters)?;
    let sql = format!("DELETE FROM {}{}", coll.table(), where_sql);
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

/// Convenience for single-column equality filters.
pub fn eq(column: &str, value: impl Into<serde_json::Value>) -> Record {
    let mut m = Record::new();
    m.insert(column.to_string(), value.into());
    m
}
