//! Value escaping
//!
//! Values are rendered inline into the statement text. Every SQL backend
//! supplies the quoting primitive through [`EscapeValue`]; the helpers here
//! decide which JSON scalars need it.

use serde_json::Value;

use crate::error::{DbError, DbResult};

/// Backend string-literal quoting.
///
/// Implementations must return a complete literal (quotes included) that
/// cannot terminate early whatever `raw` contains.
pub trait EscapeValue: Send + Sync {
    fn escape_value(&self, raw: &str) -> String;
}

/// MySQL string-literal escaping, as done by `mysql_real_escape_string`
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlEscaper;

impl EscapeValue for MySqlEscaper {
    fn escape_value(&self, raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len() + 2);
        escaped.push('\'');
        for ch in raw.chars() {
            match ch {
                '\0' => escaped.push_str("\\0"),
                '\n' => escaped.push_str("\\n"),
                '\r' => escaped.push_str("\\r"),
                '\\' => escaped.push_str("\\\\"),
                '\'' => escaped.push_str("\\'"),
                '"' => escaped.push_str("\\\""),
                '\x1a' => escaped.push_str("\\Z"),
                c => escaped.push(c),
            }
        }
        escaped.push('\'');
        escaped
    }
}

/// Which side(s) of a LIKE pattern receive a `%`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LikeAnchor {
    /// `%value`
    Left,
    /// `value%`
    Right,
    /// `%value%`
    #[default]
    Both,
}

impl LikeAnchor {
    pub fn parse(suffix: &str) -> DbResult<Self> {
        match suffix.to_lowercase().as_str() {
            "left" => Ok(LikeAnchor::Left),
            "right" => Ok(LikeAnchor::Right),
            "both" | "" => Ok(LikeAnchor::Both),
            other => Err(DbError::UnsupportedOperator(format!("LIKE.{}", other))),
        }
    }

    pub fn wrap(&self, value: &str) -> String {
        match self {
            LikeAnchor::Left => format!("%{}", value),
            LikeAnchor::Right => format!("{}%", value),
            LikeAnchor::Both => format!("%{}%", value),
        }
    }
}

/// Render a scalar as an inline literal.
///
/// Integers and booleans pass through unquoted; strings and floats go
/// through the backend's quoting; `null` renders `NULL`.
pub fn escape_literal(escaper: &dyn EscapeValue, value: &Value) -> DbResult<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Value::Number(n) => Ok(escaper.escape_value(&n.to_string())),
        Value::String(s) => Ok(escaper.escape_value(s)),
        Value::Array(_) | Value::Object(_) => Err(DbError::InvalidArgument(format!(
            "Expected a scalar value, got {}",
            value
        ))),
    }
}

/// Render a value for an INSERT/UPDATE list, where `null` and `""` are `NULL`
pub fn escape_assignment(escaper: &dyn EscapeValue, value: &Value) -> DbResult<String> {
    if is_empty_value(value) {
        return Ok("NULL".to_string());
    }
    escape_literal(escaper, value)
}

/// Render each element of a list, e.g. for `IN (…)`
pub fn escape_list(escaper: &dyn EscapeValue, values: &[Value]) -> DbResult<Vec<String>> {
    values.iter().map(|v| escape_literal(escaper, v)).collect()
}

/// Render a LIKE pattern; `%` is added before escaping
pub fn escape_like(escaper: &dyn EscapeValue, value: &Value, anchor: LikeAnchor) -> DbResult<String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => {
            return Err(DbError::InvalidArgument(format!(
                "Expected a scalar LIKE pattern, got {}",
                value
            )))
        }
    };
    Ok(escaper.escape_value(&anchor.wrap(&raw)))
}

/// `null` or the empty string
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
