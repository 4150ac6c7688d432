//! Query Builder WHERE clause operations
//!
//! Every condition is compiled as soon as it is added; the builder only
//! keeps the rendered chain. Conditions are joined with AND unless the
//! `_or` variant or an explicit [`Logic`] is used.

use serde_json::Value;

use super::builder::QueryBuilder;
use super::condition::ConditionNode;
use super::types::Logic;
use crate::error::DbResult;
use crate::escape::is_empty_value;

impl QueryBuilder {
    /// Add WHERE condition with equality
    pub fn where_eq(&mut self, field: &str, value: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, "=", value, Logic::And)
    }

    /// Add WHERE condition with any supported operator
    pub fn where_op(&mut self, field: &str, op: &str, value: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, op, value, Logic::And)
    }

    /// OR-ed WHERE condition
    pub fn where_or(&mut self, field: &str, op: &str, value: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, op, value, Logic::Or)
    }

    pub fn where_with(
        &mut self,
        field: &str,
        op: &str,
        value: impl Into<Value>,
        logic: Logic,
    ) -> DbResult<&mut Self> {
        let value = value.into();
        self.apply(|opts, compiler| {
            let rendered = compiler.compile_item(field, op, value)?;
            opts.push_where(logic, rendered);
            Ok(())
        })
    }

    /// Add a batch of rules, see
    /// [`ConditionCompiler::compile_batch`](super::condition::ConditionCompiler::compile_batch)
    pub fn where_batch(&mut self, rules: &Value) -> DbResult<&mut Self> {
        self.where_batch_with(rules, Logic::And)
    }

    pub fn where_batch_with(&mut self, rules: &Value, logic: Logic) -> DbResult<&mut Self> {
        self.apply(|opts, compiler| {
            let rendered = compiler.compile_batch(rules)?;
            if !rendered.is_empty() {
                opts.push_where(logic, rendered);
            }
            Ok(())
        })
    }

    pub fn where_in(&mut self, field: &str, values: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, "IN", values, Logic::And)
    }

    pub fn where_not_in(&mut self, field: &str, values: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, "NOT IN", values, Logic::And)
    }

    /// `%pattern%` match; use [`where_op`](Self::where_op) with `LIKE.left`
    /// or `LIKE.right` for one-sided patterns
    pub fn where_like(&mut self, field: &str, pattern: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, "LIKE", pattern, Logic::And)
    }

    pub fn where_not_like(&mut self, field: &str, pattern: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, "NOT LIKE", pattern, Logic::And)
    }

    pub fn where_between(&mut self, field: &str, range: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, "BETWEEN", range, Logic::And)
    }

    pub fn where_not_between(&mut self, field: &str, range: impl Into<Value>) -> DbResult<&mut Self> {
        self.where_with(field, "NOT BETWEEN", range, Logic::And)
    }

    pub fn where_null(&mut self, field: &str) -> DbResult<&mut Self> {
        self.where_with(field, "IS NULL", Value::Null, Logic::And)
    }

    pub fn where_not_null(&mut self, field: &str) -> DbResult<&mut Self> {
        self.where_with(field, "IS NOT NULL", Value::Null, Logic::And)
    }

    /// `EXISTS (SELECT …)` over a fully built sub-query
    pub fn where_exists(&mut self, mut query: QueryBuilder) -> DbResult<&mut Self> {
        let node = ConditionNode::SubqueryExists {
            query: Box::new(query.take()),
            is_not: false,
        };
        self.where_node(node, Logic::And)
    }

    pub fn where_not_exists(&mut self, mut query: QueryBuilder) -> DbResult<&mut Self> {
        let node = ConditionNode::SubqueryExists {
            query: Box::new(query.take()),
            is_not: true,
        };
        self.where_node(node, Logic::And)
    }

    /// AND a parenthesised group built on a separate builder
    pub fn where_group(&mut self, mut query: QueryBuilder) -> DbResult<&mut Self> {
        self.where_node(ConditionNode::Group(Box::new(query.take())), Logic::And)
    }

    pub fn where_or_group(&mut self, mut query: QueryBuilder) -> DbResult<&mut Self> {
        self.where_node(ConditionNode::Group(Box::new(query.take())), Logic::Or)
    }

    /// Raw condition, emitted verbatim
    pub fn where_raw(&mut self, sql: &str) -> &mut Self {
        self.options.push_where(Logic::And, sql.to_string());
        self
    }

    pub fn where_or_raw(&mut self, sql: &str) -> &mut Self {
        self.options.push_where(Logic::Or, sql.to_string());
        self
    }

    /// Add the condition only when `value` is neither null nor `""`
    pub fn where_if(&mut self, field: &str, op: &str, value: impl Into<Value>) -> DbResult<&mut Self> {
        let value = value.into();
        if is_empty_value(&value) {
            return Ok(self);
        }
        self.where_with(field, op, value, Logic::And)
    }

    /// Batch form of [`where_if`](Self::where_if).
    ///
    /// Each entry is `[field, op, value, logic?]`; entries whose value is
    /// empty are skipped, as are non-list entries. A two-item entry is only
    /// kept for `IS NULL` / `IS NOT NULL`.
    pub fn where_if_batch(&mut self, rules: &Value) -> DbResult<&mut Self> {
        let Some(rules) = rules.as_array() else {
            return self.apply(|_, _| {
                Err(crate::error::DbError::InvalidArgument(
                    "Conditional batch must be a list of rules".to_string(),
                ))
            });
        };

        for rule in rules.iter().filter_map(Value::as_array) {
            let (Some(field), Some(op)) = (
                rule.first().and_then(Value::as_str),
                rule.get(1).and_then(Value::as_str),
            ) else {
                continue;
            };
            let logic = match rule.get(3).and_then(Value::as_str) {
                Some(logic) => match logic.parse::<Logic>() {
                    Ok(logic) => logic,
                    Err(e) => return self.apply(|_, _| Err(e)),
                },
                None => Logic::And,
            };

            match rule.get(2) {
                Some(value) if !is_empty_value(value) => {
                    self.where_with(field, op, value.clone(), logic)?;
                }
                Some(_) => {}
                None => {
                    let op_upper = op.trim().to_uppercase();
                    if op_upper == "IS NULL" || op_upper == "IS NOT NULL" {
                        self.where_with(field, op, Value::Null, logic)?;
                    }
                }
            }
        }
        Ok(self)
    }

    fn where_node(&mut self, node: ConditionNode, logic: Logic) -> DbResult<&mut Self> {
        self.apply(|opts, compiler| {
            let rendered = compiler.compile(&node)?;
            opts.push_where(logic, rendered);
            Ok(())
        })
    }
}
