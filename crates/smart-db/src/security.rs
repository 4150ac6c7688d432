//! Identifier validation and quoting
//!
//! Every table, column and alias that reaches a statement goes through this
//! module. Names must match `[A-Za-z0-9_.*]+`; each dotted segment is wrapped
//! in backticks, except the `*` wildcard which stays bare.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DbError, DbResult};

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.*]+$").expect("identifier pattern is valid")
});

static ALIAS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("alias pattern is valid"));

static AGGREGATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+)\(([A-Za-z0-9_.*]+)\)$").expect("aggregate pattern is valid")
});

/// Quote a table or column name, with an optional alias.
///
/// ```
/// use smart_db::security::parse_key;
///
/// assert_eq!(parse_key("user", None).unwrap(), "`user`");
/// assert_eq!(parse_key("shop.user", Some("u")).unwrap(), "`shop`.`user` `u`");
/// assert_eq!(parse_key("u.*", None).unwrap(), "`u`.*");
/// ```
pub fn parse_key(key: &str, alias: Option<&str>) -> DbResult<String> {
    let key = key.trim();
    if !IDENTIFIER.is_match(key) {
        return Err(DbError::InvalidIdentifier(key.to_string()));
    }

    let segments: Vec<&str> = key.split('.').collect();
    let last = segments.len() - 1;
    let mut quoted = Vec::with_capacity(segments.len());
    for (index, segment) in segments.iter().enumerate() {
        match *segment {
            "" => return Err(DbError::InvalidIdentifier(key.to_string())),
            "*" if index == last => quoted.push("*".to_string()),
            s if s.contains('*') => return Err(DbError::InvalidIdentifier(key.to_string())),
            s => quoted.push(format!("`{}`", s)),
        }
    }

    Ok(format!("{}{}", quoted.join("."), parse_alias(alias)?))
}

/// Render ` `alias`` or nothing. Surrounding backticks are trimmed first.
pub fn parse_alias(alias: Option<&str>) -> DbResult<String> {
    match alias.map(|a| a.trim().trim_matches('`')) {
        None | Some("") => Ok(String::new()),
        Some(a) if ALIAS.is_match(a) => Ok(format!(" `{}`", a)),
        Some(a) => Err(DbError::InvalidIdentifier(format!("alias {}", a))),
    }
}

/// Whether `expr` has the `func(arg)` aggregate shape
pub fn is_aggregate(expr: &str) -> bool {
    AGGREGATE.is_match(expr.trim())
}

/// Render an aggregate call such as `count(*)` or `max(o.total)`.
///
/// The function name passes through, the argument is quoted unless it is
/// `*`.
pub fn parse_aggregate(expr: &str, alias: Option<&str>) -> DbResult<String> {
    let expr = expr.trim();
    let captures = AGGREGATE
        .captures(expr)
        .ok_or_else(|| DbError::InvalidIdentifier(expr.to_string()))?;

    let func = &captures[1];
    let arg = match &captures[2] {
        "*" => "*".to_string(),
        other => parse_key(other, None)?,
    };

    Ok(format!("{}({}){}", func, arg, parse_alias(alias)?))
}

/// Render one select-list entry: `*`, `name`, `name alias` or an aggregate
pub fn parse_field_item(item: &str) -> DbResult<String> {
    let item = item.trim();
    if item == "*" {
        return Ok("*".to_string());
    }

    let mut parts = item.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let alias = parts.next().map(strip_as);

    if is_aggregate(name) {
        parse_aggregate(name, alias)
    } else {
        parse_key(name, alias)
    }
}

/// Split a table entry of the form `name`, `name alias` or `name AS alias`
pub fn split_alias(entry: &str) -> (&str, Option<&str>) {
    let entry = entry.trim();
    let mut parts = entry.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let alias = parts.next().map(strip_as).filter(|a| !a.is_empty());
    (name, alias)
}

fn strip_as(alias: &str) -> &str {
    let alias = alias.trim();
    match alias.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("as ") => alias[3..].trim(),
        _ => alias,
    }
}

/// Recover the raw segments of a quoted identifier (alias not included)
pub fn unquote_identifier(quoted: &str) -> Vec<String> {
    quoted
        .split('.')
        .map(|segment| segment.trim_matches('`').to_string())
        .collect()
}
