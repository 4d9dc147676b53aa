//! Predicates over tenant table columns.
//!
//! The storage engine accepts a flat SQL-like predicate string, so every
//! predicate is built as a small AST and rendered with escaping applied to
//! identifiers and string literals. Metadata filters are restricted to an
//! allow-list of column names.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::types::{Metadata, MetadataValue};

/// Columns a caller may filter on.
pub const FILTERABLE_FIELDS: &[&str] = &["id", "text", "source_name", "metadata"];

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<&MetadataValue> for Literal {
    fn from(v: &MetadataValue) -> Self {
        match v {
            MetadataValue::Null => Literal::Null,
            MetadataValue::Bool(b) => Literal::Bool(*b),
            MetadataValue::Integer(i) => Literal::Int(*i),
            MetadataValue::Float(f) => Literal::Float(*f),
            MetadataValue::String(s) => Literal::Str(s.clone()),
        }
    }
}

impl Literal {
    /// Textual form used when comparing against a string column.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Literal::Null => None,
            Literal::Bool(b) => Some(b.to_string()),
            Literal::Int(i) => Some(i.to_string()),
            Literal::Float(f) => Some(f.to_string()),
            Literal::Str(s) => Some(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, Literal),
    NotEq(String, Literal),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: &str, value: impl Into<String>) -> Self {
        Predicate::Eq(column.to_string(), Literal::Str(value.into()))
    }

    pub fn not_eq(column: &str, value: impl Into<String>) -> Self {
        Predicate::NotEq(column.to_string(), Literal::Str(value.into()))
    }

    /// Matches any row whose id is in `ids`.
    pub fn any_id<S: AsRef<str>>(ids: &[S]) -> Self {
        Predicate::Or(ids.iter().map(|id| Predicate::eq("id", id.as_ref())).collect())
    }

    /// Matches every row. Rows always carry an id.
    pub fn all_rows() -> Self {
        Predicate::not_eq("id", "")
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            p => Predicate::And(vec![p, other]),
        }
    }

    /// Render into the storage engine's predicate language.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out);
        out
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            Predicate::Eq(col, Literal::Null) => {
                let _ = write!(out, "{} IS NULL", sanitize_identifier(col));
            }
            Predicate::NotEq(col, Literal::Null) => {
                let _ = write!(out, "{} IS NOT NULL", sanitize_identifier(col));
            }
            Predicate::Eq(col, lit) => {
                let _ = write!(out, "{} = {}", sanitize_identifier(col), render_literal(lit));
            }
            Predicate::NotEq(col, lit) => {
                let _ = write!(out, "{} != {}", sanitize_identifier(col), render_literal(lit));
            }
            Predicate::And(parts) => write_joined(out, parts, " AND ", "TRUE"),
            Predicate::Or(parts) => write_joined(out, parts, " OR ", "FALSE"),
        }
    }

    /// Evaluate against a row's string columns. Unknown columns never match.
    pub fn matches<'a>(&self, column: &dyn Fn(&str) -> Option<&'a str>) -> bool {
        match self {
            Predicate::Eq(col, lit) => match (column(col), lit.as_text()) {
                (Some(v), Some(expected)) => v == expected,
                (Some(v), None) => v.is_empty(),
                (None, _) => false,
            },
            Predicate::NotEq(col, lit) => match (column(col), lit.as_text()) {
                (Some(v), Some(expected)) => v != expected,
                (Some(v), None) => !v.is_empty(),
                (None, _) => false,
            },
            Predicate::And(parts) => parts.iter().all(|p| p.matches(column)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(column)),
        }
    }
}

fn write_joined(out: &mut String, parts: &[Predicate], sep: &str, empty: &str) {
    if parts.is_empty() {
        out.push_str(empty);
        return;
    }
    if parts.len() == 1 {
        parts[0].write_sql(out);
        return;
    }
    out.push('(');
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        p.write_sql(out);
    }
    out.push(')');
}

fn render_literal(lit: &Literal) -> String {
    match lit {
        Literal::Null => "NULL".to_string(),
        Literal::Bool(b) => b.to_string(),
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => f.to_string(),
        Literal::Str(s) => format!("'{}'", escape_sql_string(s)),
    }
}

/// Escape a string literal: backslashes doubled, single quotes doubled, NUL stripped.
pub fn escape_sql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("''"),
            '\0' => {}
            c => out.push(c),
        }
    }
    out
}

/// Keep only `[A-Za-z0-9_]` from a column name.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect()
}

/// Build a conjunction of equality checks from a metadata filter map.
///
/// Returns `None` for an empty map. Keys outside [`FILTERABLE_FIELDS`] are rejected.
pub fn build_filter(filters: &Metadata) -> Result<Option<Predicate>> {
    if filters.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::with_capacity(filters.len());
    for (key, value) in filters {
        if !FILTERABLE_FIELDS.contains(&key.as_str()) {
            return Err(Error::Validation(format!(
                "invalid filter field {key:?}: allowed fields are {}",
                FILTERABLE_FIELDS.join(", ")
            )));
        }
        parts.push(Predicate::Eq(sanitize_identifier(key), Literal::from(value)));
    }
    if parts.len() == 1 {
        Ok(parts.pop())
    } else {
        Ok(Some(Predicate::And(parts)))
    }
}
