//! Query Builder SQL generation
//!
//! Every clause has a valid empty form, so an omitted clause never produces
//! broken SQL. In particular `WHERE 1` is always rendered when no condition
//! was given; UPDATE and DELETE are never silently unconditional.

use serde_json::{Map, Value};

use super::types::QueryOptions;
use crate::error::{DbError, DbResult};
use crate::escape::{escape_assignment, EscapeValue};
use crate::security::parse_key;

/// Direction of an in-place counter update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Increment,
    Decrement,
}

impl QueryOptions {
    /// `SELECT …` without the trailing semicolon, usable as a sub-query
    pub fn build_select_body(&self) -> DbResult<String> {
        let table = self.table_or_err()?;
        let mut sql = String::from("SELECT ");

        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(self.field.as_deref().unwrap_or("*"));
        sql.push_str(" FROM ");
        sql.push_str(table);

        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join);
        }

        sql.push_str(&self.where_sql());

        if let Some(group) = &self.group {
            sql.push_str(" GROUP BY ");
            sql.push_str(group);
        }
        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.having);
        }
        if let Some(order) = &self.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = &self.limit {
            sql.push(' ');
            sql.push_str(&limit.to_string());
        }
        if self.lock {
            sql.push_str(" FOR UPDATE");
        }

        Ok(sql)
    }

    /// Full SELECT statement
    pub fn build_query_sql(&self) -> DbResult<String> {
        Ok(format!("{};", self.build_select_body()?))
    }

    /// `INSERT` for one row (an object) or many rows (a list of objects).
    ///
    /// Multi-row inserts take their column list from the first row; a key
    /// missing from a later row renders `NULL`.
    pub fn build_insert_sql(&self, escaper: &dyn EscapeValue, data: &Value) -> DbResult<String> {
        let table = self.table_or_err()?;

        match data {
            Value::Object(row) => {
                let columns = insert_columns(row)?;
                let values = row_values(escaper, row, &columns)?;
                Ok(format!(
                    "INSERT INTO {}({}) VALUES({});",
                    table,
                    quote_columns(&columns)?,
                    values
                ))
            }
            Value::Array(rows) => {
                let first = match rows.first() {
                    Some(Value::Object(first)) => first,
                    Some(other) => return Err(not_a_row(other)),
                    None => {
                        return Err(DbError::InvalidArgument(
                            "Insert needs at least one row".to_string(),
                        ))
                    }
                };
                let columns = insert_columns(first)?;

                let mut tuples = Vec::with_capacity(rows.len());
                for row in rows {
                    let row = row.as_object().ok_or_else(|| not_a_row(row))?;
                    tuples.push(format!("({})", row_values(escaper, row, &columns)?));
                }

                Ok(format!(
                    "INSERT INTO {}({}) VALUES{};",
                    table,
                    quote_columns(&columns)?,
                    tuples.join(",")
                ))
            }
            other => Err(DbError::InvalidArgument(format!(
                "Insert expects a row or a list of rows, got {}",
                other
            ))),
        }
    }

    pub fn build_update_sql(&self, escaper: &dyn EscapeValue, data: &Value) -> DbResult<String> {
        let table = self.table_or_err()?;
        let row = match data {
            Value::Object(row) if !row.is_empty() => row,
            other => {
                return Err(DbError::InvalidArgument(format!(
                    "Update expects a non-empty row, got {}",
                    other
                )))
            }
        };

        let assignments = row
            .iter()
            .map(|(column, value)| {
                Ok(format!(
                    "{}={}",
                    parse_key(column, None)?,
                    escape_assignment(escaper, value)?
                ))
            })
            .collect::<DbResult<Vec<_>>>()?;

        Ok(format!(
            "UPDATE {} SET {}{};",
            table,
            assignments.join(","),
            self.where_sql()
        ))
    }

    /// `UPDATE t SET f = f ± amount`; the amount must be a positive integer
    pub fn build_step_sql(&self, field: &str, amount: i64, step: Step) -> DbResult<String> {
        if amount < 1 {
            return Err(DbError::InvalidArgument(format!(
                "{:?} amount must be a positive integer, got {}",
                step, amount
            )));
        }
        let table = self.table_or_err()?;
        let field = parse_key(field, None)?;
        let sign = match step {
            Step::Increment => '+',
            Step::Decrement => '-',
        };

        Ok(format!(
            "UPDATE {} SET {} = {} {} {}{};",
            table,
            field,
            field,
            sign,
            amount,
            self.where_sql()
        ))
    }

    pub fn build_delete_sql(&self) -> DbResult<String> {
        Ok(format!("DELETE FROM {}{};", self.table_or_err()?, self.where_sql()))
    }

    pub fn build_truncate_sql(&self) -> DbResult<String> {
        Ok(format!("TRUNCATE {}", self.table_or_err()?))
    }

    fn where_sql(&self) -> String {
        if self.where_clause.is_empty() {
            " WHERE 1".to_string()
        } else {
            format!(" WHERE {}", self.where_clause)
        }
    }
}

fn insert_columns(row: &Map<String, Value>) -> DbResult<Vec<&str>> {
    if row.is_empty() {
        return Err(DbError::InvalidArgument("Insert row has no columns".to_string()));
    }
    Ok(row.keys().map(String::as_str).collect())
}

fn quote_columns(columns: &[&str]) -> DbResult<String> {
    let quoted = columns
        .iter()
        .map(|column| parse_key(column, None))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(quoted.join(","))
}

fn row_values(escaper: &dyn EscapeValue, row: &Map<String, Value>, columns: &[&str]) -> DbResult<String> {
    let values = columns
        .iter()
        .map(|column| escape_assignment(escaper, row.get(*column).unwrap_or(&Value::Null)))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(values.join(","))
}

fn not_a_row(value: &Value) -> DbError {
    DbError::InvalidArgument(format!("Insert rows must be objects, got {}", value))
}
