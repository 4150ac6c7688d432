//! Condition compilation
//!
//! A condition is parsed into a [`ConditionNode`] (which validates the
//! operand shape) and then rendered by a [`ConditionCompiler`] using the
//! backend's value escaping. Nodes are transient: they only live for the
//! duration of one `where`/`having` call.

use serde_json::Value;

use super::types::{keyword, Comparison, Logic, Operator, QueryOptions};
use crate::error::{DbError, DbResult};
use crate::escape::{escape_like, escape_list, escape_literal, is_empty_value, EscapeValue, LikeAnchor};
use crate::security::{is_aggregate, parse_aggregate, parse_key};

/// One condition, discriminated by operator family
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    Comparison {
        op: Comparison,
        field: String,
        value: Value,
    },
    ColumnComparison {
        op: Comparison,
        field: String,
        other: String,
    },
    Like {
        field: String,
        patterns: Vec<Value>,
        anchor: LikeAnchor,
        negated: bool,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    Between {
        field: String,
        low: Value,
        high: Value,
        negated: bool,
    },
    NullCheck {
        field: String,
        is_not: bool,
    },
    /// `[NOT] EXISTS (SELECT …)` over a pre-built query
    SubqueryExists {
        query: Box<QueryOptions>,
        is_not: bool,
    },
    /// Parenthesised WHERE body of a pre-built query
    Group(Box<QueryOptions>),
    Raw(String),
}

impl ConditionNode {
    /// Parse `field OP value`, checking the operand shape for the operator
    pub fn parse(field: &str, op: &str, value: Value) -> DbResult<Self> {
        let field = field.to_string();
        let operator: Operator = op.parse()?;

        let node = match operator {
            // `= ''` and `= NULL` both mean "no value"
            Operator::Compare(_) if is_empty_value(&value) => {
                ConditionNode::NullCheck { field, is_not: false }
            }
            Operator::Compare(op) => {
                if value.is_array() || value.is_object() {
                    return Err(DbError::InvalidArgument(format!(
                        "Operator {} on {} expects a scalar, got {}",
                        op, field, value
                    )));
                }
                ConditionNode::Comparison { op, field, value }
            }
            Operator::Column(op) => match value {
                Value::String(other) => ConditionNode::ColumnComparison { op, field, other },
                other => {
                    return Err(DbError::InvalidArgument(format!(
                        "Column comparison on {} expects a column name, got {}",
                        field, other
                    )))
                }
            },
            Operator::Like { anchor, negated } => {
                let patterns = match value {
                    Value::Array(items) if items.is_empty() => {
                        return Err(DbError::InvalidArgument(format!(
                            "LIKE on {} needs at least one pattern",
                            field
                        )))
                    }
                    Value::Array(items) => items,
                    scalar => vec![scalar],
                };
                ConditionNode::Like { field, patterns, anchor, negated }
            }
            Operator::In { negated } => match value {
                Value::Array(values) if !values.is_empty() => {
                    ConditionNode::In { field, values, negated }
                }
                Value::Array(_) => {
                    return Err(DbError::InvalidArgument(format!(
                        "{} on {} needs at least one value",
                        keyword("IN", negated),
                        field
                    )))
                }
                other => {
                    return Err(DbError::InvalidArgument(format!(
                        "{} on {} requires a list, got {}",
                        keyword("IN", negated),
                        field,
                        other
                    )))
                }
            },
            Operator::Between { negated } => match value {
                Value::Array(mut bounds) if bounds.len() == 2 => {
                    let high = bounds.pop().unwrap_or(Value::Null);
                    let low = bounds.pop().unwrap_or(Value::Null);
                    ConditionNode::Between { field, low, high, negated }
                }
                other => {
                    return Err(DbError::InvalidArgument(format!(
                        "{} on {} requires a list of exactly two bounds, got {}",
                        keyword("BETWEEN", negated),
                        field,
                        other
                    )))
                }
            },
            Operator::Null { negated } => ConditionNode::NullCheck { field, is_not: negated },
            Operator::Exists { negated } => {
                return Err(DbError::UnsupportedOperator(format!(
                    "{} on {} requires a sub-query, not a column",
                    keyword("EXISTS", negated),
                    field
                )))
            }
        };

        Ok(node)
    }
}

/// Renders condition nodes with a backend's escaping
pub struct ConditionCompiler<'a> {
    escaper: &'a dyn EscapeValue,
}

impl<'a> ConditionCompiler<'a> {
    pub fn new(escaper: &'a dyn EscapeValue) -> Self {
        Self { escaper }
    }

    /// Render a single node
    pub fn compile(&self, node: &ConditionNode) -> DbResult<String> {
        match node {
            ConditionNode::Comparison { op, field, value } => Ok(format!(
                "{} {} {}",
                render_field(field)?,
                op,
                escape_literal(self.escaper, value)?
            )),
            ConditionNode::ColumnComparison { op, field, other } => Ok(format!(
                "{} {} {}",
                render_field(field)?,
                op,
                render_field(other)?
            )),
            ConditionNode::Like { field, patterns, anchor, negated } => {
                let field = render_field(field)?;
                let op = keyword("LIKE", *negated);
                let mut rendered = patterns
                    .iter()
                    .map(|p| Ok(format!("{} {} {}", field, op, escape_like(self.escaper, p, *anchor)?)))
                    .collect::<DbResult<Vec<_>>>()?;

                if rendered.len() == 1 {
                    Ok(rendered.remove(0))
                } else {
                    // A row must match any LIKE pattern, or avoid every NOT LIKE pattern
                    let joiner = if *negated { " AND " } else { " OR " };
                    Ok(format!("({})", rendered.join(joiner)))
                }
            }
            ConditionNode::In { field, values, negated } => Ok(format!(
                "{} {} ({})",
                render_field(field)?,
                keyword("IN", *negated),
                escape_list(self.escaper, values)?.join(", ")
            )),
            ConditionNode::Between { field, low, high, negated } => Ok(format!(
                "{} {} {} AND {}",
                render_field(field)?,
                keyword("BETWEEN", *negated),
                escape_literal(self.escaper, low)?,
                escape_literal(self.escaper, high)?
            )),
            ConditionNode::NullCheck { field, is_not } => Ok(format!(
                "{} {}",
                render_field(field)?,
                if *is_not { "IS NOT NULL" } else { "IS NULL" }
            )),
            ConditionNode::SubqueryExists { query, is_not } => Ok(format!(
                "{} ({})",
                keyword("EXISTS", *is_not),
                query.build_select_body()?
            )),
            ConditionNode::Group(query) => {
                if query.where_clause.is_empty() {
                    return Err(DbError::InvalidArgument(
                        "Grouped condition has no WHERE conditions".to_string(),
                    ));
                }
                Ok(format!("({})", query.where_clause))
            }
            ConditionNode::Raw(sql) => Ok(sql.clone()),
        }
    }

    /// Parse and render `field OP value`
    pub fn compile_item(&self, field: &str, op: &str, value: Value) -> DbResult<String> {
        self.compile(&ConditionNode::parse(field, op, value)?)
    }

    /// Render a batch of per-field rules.
    ///
    /// Each rule is `[field, op, value?, logic?]` or
    /// `[field, [[op, value?, logic?], …]]`. A missing value is `""`, a
    /// missing logic is `AND`.
    pub fn compile_batch(&self, rules: &Value) -> DbResult<String> {
        let rules = rules.as_array().ok_or_else(|| {
            DbError::InvalidArgument(format!("Batch conditions must be a list, got {}", rules))
        })?;

        let mut chain = String::new();
        for rule in rules {
            let entry = match rule.as_array() {
                Some(entry) if entry.len() >= 2 => entry,
                _ => {
                    return Err(DbError::InvalidArgument(format!(
                        "Each batch condition must be a list of at least two items, got {}",
                        rule
                    )))
                }
            };
            let field = as_text(&entry[0], "field")?;

            match &entry[1] {
                Value::Array(items) => {
                    for item in items.iter().filter_map(Value::as_array) {
                        let Some(op) = item.first() else { continue };
                        let op = as_text(op, "operator")?;
                        let value = item.get(1).cloned().unwrap_or_else(empty);
                        let logic = parse_logic(item.get(2))?;
                        let rendered = self.compile_item(field, op, value)?;
                        super::types::append_condition(&mut chain, logic, rendered);
                    }
                }
                op => {
                    let op = as_text(op, "operator")?;
                    let value = entry.get(2).cloned().unwrap_or_else(empty);
                    let logic = parse_logic(entry.get(3))?;
                    let rendered = self.compile_item(field, op, value)?;
                    super::types::append_condition(&mut chain, logic, rendered);
                }
            }
        }
        Ok(chain)
    }
}

/// Quote a condition field; aggregates are allowed so HAVING can use them
pub(crate) fn render_field(field: &str) -> DbResult<String> {
    if is_aggregate(field) {
        parse_aggregate(field, None)
    } else {
        parse_key(field, None)
    }
}

fn empty() -> Value {
    Value::String(String::new())
}

fn as_text<'v>(value: &'v Value, what: &str) -> DbResult<&'v str> {
    value.as_str().ok_or_else(|| {
        DbError::InvalidArgument(format!("Batch condition {} must be a string, got {}", what, value))
    })
}

fn parse_logic(value: Option<&Value>) -> DbResult<Logic> {
    match value {
        None | Some(Value::Null) => Ok(Logic::And),
        Some(Value::String(s)) => s.parse(),
        Some(other) => Err(DbError::InvalidArgument(format!(
            "Logical connective must be a string, got {}",
            other
        ))),
    }
}
