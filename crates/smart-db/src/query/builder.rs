//! Query Builder - Core builder implementation

use std::fmt;
use std::mem;
use std::sync::Arc;

use super::condition::ConditionCompiler;
use super::types::*;
use crate::error::{DbError, DbResult};
use crate::escape::EscapeValue;
use crate::security::{is_aggregate, parse_aggregate, parse_field_item, parse_key, split_alias};

/// Fluent builder accumulating the state of one statement.
///
/// Methods that can reject their input return `DbResult<&mut Self>`; on
/// error the whole accumulated state is discarded, so a half-built query
/// never leaks into the next one.
#[derive(Clone)]
pub struct QueryBuilder {
    escaper: Arc<dyn EscapeValue>,
    pub(crate) options: QueryOptions,
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("options", &self.options)
            .finish()
    }
}

impl QueryBuilder {
    /// Create a new query builder rendering values with `escaper`
    pub fn new(escaper: Arc<dyn EscapeValue>) -> Self {
        Self {
            escaper,
            options: QueryOptions::default(),
        }
    }

    /// Fresh builder sharing this builder's escaping, for sub-queries
    pub fn sub_query(&self) -> Self {
        Self::new(Arc::clone(&self.escaper))
    }

    pub fn escaper(&self) -> &dyn EscapeValue {
        self.escaper.as_ref()
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Take the accumulated state, leaving the builder empty
    pub fn take(&mut self) -> QueryOptions {
        mem::take(&mut self.options)
    }

    pub fn clear(&mut self) {
        self.options = QueryOptions::default();
    }

    /// Apply a fallible mutation; any error resets the builder
    pub(crate) fn apply<F>(&mut self, f: F) -> DbResult<&mut Self>
    where
        F: FnOnce(&mut QueryOptions, &ConditionCompiler<'_>) -> DbResult<()>,
    {
        let compiler = ConditionCompiler::new(self.escaper.as_ref());
        match f(&mut self.options, &compiler) {
            Ok(()) => Ok(self),
            Err(e) => {
                self.options = QueryOptions::default();
                Err(e)
            }
        }
    }

    /// Set the table list: `"user"`, `"user u"`, `"shop.user u, order o"`
    pub fn table(&mut self, tables: &str) -> DbResult<&mut Self> {
        self.set_tables(tables, false)
    }

    /// Like [`table`](Self::table), but a dotted name without an explicit
    /// alias is aliased to its last segment (`shop.user` → `` `shop`.`user` `user` ``)
    pub fn table_strict(&mut self, tables: &str) -> DbResult<&mut Self> {
        self.set_tables(tables, true)
    }

    /// Set the table list from `(name, alias)` pairs
    pub fn table_as(&mut self, tables: &[(&str, &str)]) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            let rendered = tables
                .iter()
                .map(|(name, alias)| parse_key(name, Some(*alias)))
                .collect::<DbResult<Vec<_>>>()?;
            opts.table = Some(non_empty(rendered, "table")?.join(", "));
            Ok(())
        })
    }

    fn set_tables(&mut self, tables: &str, strict: bool) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            let rendered = tables
                .split(',')
                .filter(|entry| !entry.trim().is_empty())
                .map(|entry| {
                    let (name, alias) = split_alias(entry);
                    let alias = match alias {
                        Some(alias) => Some(alias),
                        None if strict => name.rsplit_once('.').map(|(_, last)| last),
                        None => None,
                    };
                    parse_key(name, alias)
                })
                .collect::<DbResult<Vec<_>>>()?;
            opts.table = Some(non_empty(rendered, "table")?.join(", "));
            Ok(())
        })
    }

    /// Set the select list: `"id, name nick, count(*) total"`
    pub fn field(&mut self, fields: &str) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            let rendered = fields
                .split(',')
                .filter(|item| !item.trim().is_empty())
                .map(parse_field_item)
                .collect::<DbResult<Vec<_>>>()?;
            opts.field = Some(non_empty(rendered, "field")?.join(","));
            Ok(())
        })
    }

    /// Set the select list from `(field, alias)` pairs
    pub fn field_as(&mut self, fields: &[(&str, &str)]) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            let rendered = fields
                .iter()
                .map(|(field, alias)| {
                    if is_aggregate(field) {
                        parse_aggregate(field, Some(*alias))
                    } else {
                        parse_key(field, Some(*alias))
                    }
                })
                .collect::<DbResult<Vec<_>>>()?;
            opts.field = Some(non_empty(rendered, "field")?.join(","));
            Ok(())
        })
    }

    /// Use `expr` as the select list verbatim. The caller is responsible
    /// for its safety.
    pub fn field_raw(&mut self, expr: &str) -> &mut Self {
        self.options.field = Some(expr.to_string());
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.options.distinct = true;
        self
    }

    /// Add a join on one equality condition, e.g. `"o.uid = u.id"`.
    ///
    /// A table without an alias is aliased to its last segment.
    pub fn join(&mut self, table: &str, on: &str, kind: JoinType) -> DbResult<&mut Self> {
        self.join_on(table, &[on], kind)
    }

    /// Add a join whose conditions are AND-ed together
    pub fn join_on(&mut self, table: &str, on: &[&str], kind: JoinType) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            opts.joins.push(render_join(table, on, kind)?);
            Ok(())
        })
    }

    /// Add several `(table, condition)` joins of the same kind
    pub fn join_many(&mut self, joins: &[(&str, &str)], kind: JoinType) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            if joins.is_empty() {
                return Err(DbError::InvalidArgument("Batch join needs at least one join".to_string()));
            }
            for (table, on) in joins {
                opts.joins.push(render_join(table, &[*on], kind)?);
            }
            Ok(())
        })
    }

    /// GROUP BY one or more comma-separated columns
    pub fn group(&mut self, fields: &str) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            let rendered = fields
                .split(',')
                .filter(|f| !f.trim().is_empty())
                .map(|f| parse_key(f, None))
                .collect::<DbResult<Vec<_>>>()?;
            opts.group = Some(non_empty(rendered, "group")?.join(","));
            Ok(())
        })
    }

    /// HAVING condition, AND-ed with earlier ones
    pub fn having(&mut self, field: &str, op: &str, value: impl Into<serde_json::Value>) -> DbResult<&mut Self> {
        self.having_with(field, op, value, Logic::And)
    }

    pub fn having_with(
        &mut self,
        field: &str,
        op: &str,
        value: impl Into<serde_json::Value>,
        logic: Logic,
    ) -> DbResult<&mut Self> {
        let value = value.into();
        self.apply(|opts, compiler| {
            let rendered = compiler.compile_item(field, op, value)?;
            opts.push_having(logic, rendered);
            Ok(())
        })
    }

    /// HAVING counterpart of [`where_batch`](Self::where_batch); fields may
    /// be aggregates
    pub fn having_batch(&mut self, rules: &serde_json::Value) -> DbResult<&mut Self> {
        self.apply(|opts, compiler| {
            let rendered = compiler.compile_batch(rules)?;
            if !rendered.is_empty() {
                opts.push_having(Logic::And, rendered);
            }
            Ok(())
        })
    }

    /// Raw HAVING expression, emitted verbatim
    pub fn having_raw(&mut self, sql: &str) -> &mut Self {
        self.options.push_having(Logic::And, sql.to_string());
        self
    }

    /// ORDER BY `(field, direction)` pairs; direction is ASC or DESC
    pub fn order(&mut self, fields: &[(&str, &str)]) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            let rendered = fields
                .iter()
                .map(|(field, direction)| {
                    let direction: OrderDirection = direction.parse()?;
                    Ok(format!("{} {}", parse_key(field, None)?, direction))
                })
                .collect::<DbResult<Vec<_>>>()?;
            opts.order = Some(non_empty(rendered, "order")?.join(","));
            Ok(())
        })
    }

    /// Raw ORDER BY expression, emitted verbatim
    pub fn order_raw(&mut self, sql: &str) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            if sql.trim().is_empty() {
                return Err(DbError::InvalidArgument("Order expression is empty".to_string()));
            }
            opts.order = Some(sql.trim().to_string());
            Ok(())
        })
    }

    /// `LIMIT count`
    pub fn limit(&mut self, count: u64) -> &mut Self {
        self.options.limit = Some(Limit { offset: None, count });
        self
    }

    /// `LIMIT offset,count`
    pub fn limit_offset(&mut self, offset: u64, count: u64) -> &mut Self {
        self.options.limit = Some(Limit {
            offset: Some(offset),
            count,
        });
        self
    }

    /// Parse `"count"` or `"offset,count"`
    pub fn limit_str(&mut self, limit: &str) -> DbResult<&mut Self> {
        self.apply(|opts, _| {
            let number = |s: &str| {
                s.trim().parse::<u64>().map_err(|_| {
                    DbError::InvalidArgument(format!("Invalid limit '{}'", limit))
                })
            };
            opts.limit = Some(match limit.split_once(',') {
                Some((offset, count)) => Limit {
                    offset: Some(number(offset)?),
                    count: number(count)?,
                },
                None => Limit {
                    offset: None,
                    count: number(limit)?,
                },
            });
            Ok(())
        })
    }

    /// Page `page` (1-based) of `rows` rows
    pub fn page(&mut self, page: u64, rows: u64) -> &mut Self {
        let offset = page.saturating_sub(1).saturating_mul(rows);
        self.limit_offset(offset, rows)
    }

    /// Append `FOR UPDATE`
    pub fn lock(&mut self, lock: bool) -> &mut Self {
        self.options.lock = lock;
        self
    }

    /// Return the rendered SQL from the next terminal call instead of
    /// executing it
    pub fn fetch_sql(&mut self, fetch: bool) -> &mut Self {
        self.options.fetch_sql = fetch;
        self
    }
}

fn render_join(table: &str, on: &[&str], kind: JoinType) -> DbResult<String> {
    let (name, alias) = split_alias(table);
    let alias = alias.or_else(|| name.rsplit_once('.').map(|(_, last)| last).or(Some(name)));
    let table = parse_key(name, alias)?;

    if on.is_empty() {
        return Err(DbError::InvalidArgument(format!("Join on {} needs a condition", name)));
    }
    let conditions = on
        .iter()
        .map(|condition| {
            let (left, right) = condition.split_once('=').ok_or_else(|| {
                DbError::InvalidArgument(format!(
                    "Join condition '{}' must be an equality between two columns",
                    condition
                ))
            })?;
            Ok(format!("{} = {}", parse_key(left, None)?, parse_key(right, None)?))
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(format!("{} {} ON {}", kind, table, conditions.join(" AND ")))
}

fn non_empty(items: Vec<String>, what: &str) -> DbResult<Vec<String>> {
    if items.is_empty() {
        return Err(DbError::InvalidArgument(format!("{} list is empty", what)));
    }
    Ok(items)
}
