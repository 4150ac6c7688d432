//! Query Builder Types - operators, connectives and clause enums

use std::fmt;
use std::str::FromStr;

use crate::error::{DbError, DbResult};
use crate::escape::LikeAnchor;

/// Logical connective between two conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    #[default]
    And,
    Or,
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logic::And => write!(f, "AND"),
            Logic::Or => write!(f, "OR"),
        }
    }
}

impl FromStr for Logic {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AND" | "" => Ok(Logic::And),
            "OR" => Ok(Logic::Or),
            other => Err(DbError::InvalidArgument(format!(
                "Unknown logical connective '{}', expected AND or OR",
                other
            ))),
        }
    }
}

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
            JoinType::Right => write!(f, "RIGHT JOIN"),
            JoinType::Full => write!(f, "FULL JOIN"),
        }
    }
}

impl FromStr for JoinType {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inner" => Ok(JoinType::Inner),
            "left" => Ok(JoinType::Left),
            "right" => Ok(JoinType::Right),
            "full" => Ok(JoinType::Full),
            other => Err(DbError::InvalidArgument(format!(
                "Join type '{}' is not one of inner/left/right/full",
                other
            ))),
        }
    }
}

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

impl FromStr for OrderDirection {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ASC" => Ok(OrderDirection::Asc),
            "DESC" => Ok(OrderDirection::Desc),
            other => Err(DbError::InvalidArgument(format!(
                "Order direction '{}' is not ASC or DESC",
                other
            ))),
        }
    }
}

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Equal => write!(f, "="),
            Comparison::NotEqual => write!(f, "<>"),
            Comparison::GreaterThan => write!(f, ">"),
            Comparison::GreaterThanOrEqual => write!(f, ">="),
            Comparison::LessThan => write!(f, "<"),
            Comparison::LessThanOrEqual => write!(f, "<="),
        }
    }
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" | "EQ" => Some(Comparison::Equal),
            "<>" | "!=" | "NEQ" => Some(Comparison::NotEqual),
            ">" | "GT" => Some(Comparison::GreaterThan),
            ">=" | "EGT" => Some(Comparison::GreaterThanOrEqual),
            "<" | "LT" => Some(Comparison::LessThan),
            "<=" | "ELT" => Some(Comparison::LessThanOrEqual),
            _ => None,
        }
    }
}

/// A parsed condition operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `field OP value`
    Compare(Comparison),
    /// `field OP other_field`, written with a leading `:`
    Column(Comparison),
    Like { anchor: LikeAnchor, negated: bool },
    In { negated: bool },
    Between { negated: bool },
    Null { negated: bool },
    Exists { negated: bool },
}

impl FromStr for Operator {
    type Err = DbError;

    /// Operators are case-insensitive and ignore inner spacing, so
    /// `not  in`, `NOT IN` and `notin` are the same operator.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        let unsupported = || DbError::UnsupportedOperator(s.trim().to_string());

        if let Some(column_op) = upper.strip_prefix(':') {
            return Comparison::parse(column_op.trim())
                .map(Operator::Column)
                .ok_or_else(unsupported);
        }

        let (head, suffix) = match upper.split_once('.') {
            Some((head, suffix)) => (head, Some(suffix)),
            None => (upper.as_str(), None),
        };
        let compact: String = head.chars().filter(|c| !c.is_whitespace()).collect();

        let operator = match compact.as_str() {
            "LIKE" | "NOTLIKE" => {
                let anchor = match suffix {
                    Some(suffix) => LikeAnchor::parse(suffix)?,
                    None => LikeAnchor::Both,
                };
                return Ok(Operator::Like {
                    anchor,
                    negated: compact == "NOTLIKE",
                });
            }
            "IN" => Operator::In { negated: false },
            "NOTIN" => Operator::In { negated: true },
            "BETWEEN" => Operator::Between { negated: false },
            "NOTBETWEEN" => Operator::Between { negated: true },
            "ISNULL" => Operator::Null { negated: false },
            "ISNOTNULL" => Operator::Null { negated: true },
            "EXISTS" => Operator::Exists { negated: false },
            "NOTEXISTS" => Operator::Exists { negated: true },
            other => Comparison::parse(other)
                .map(Operator::Compare)
                .ok_or_else(unsupported)?,
        };

        if suffix.is_some() {
            return Err(unsupported());
        }
        Ok(operator)
    }
}

/// Keyword form of a negatable operator family
pub(crate) fn keyword(base: &str, negated: bool) -> String {
    if negated {
        format!("NOT {}", base)
    } else {
        base.to_string()
    }
}

/// LIMIT clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: Option<u64>,
    pub count: u64,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "LIMIT {},{}", offset, self.count),
            None => write!(f, "LIMIT {}", self.count),
        }
    }
}

/// Accumulated per-query state, reset after every terminal operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Rendered table list
    pub table: Option<String>,
    /// Rendered select list; `None` selects `*`
    pub field: Option<String>,
    pub distinct: bool,
    /// Rendered join clauses, in call order
    pub joins: Vec<String>,
    /// Rendered condition chain without the `WHERE` keyword
    pub where_clause: String,
    pub group: Option<String>,
    /// Rendered condition chain without the `HAVING` keyword
    pub having: String,
    pub order: Option<String>,
    pub limit: Option<Limit>,
    pub lock: bool,
    pub fetch_sql: bool,
}

impl QueryOptions {
    pub(crate) fn push_where(&mut self, logic: Logic, condition: String) {
        append_condition(&mut self.where_clause, logic, condition);
    }

    pub(crate) fn push_having(&mut self, logic: Logic, condition: String) {
        append_condition(&mut self.having, logic, condition);
    }

    pub fn table_or_err(&self) -> DbResult<&str> {
        self.table
            .as_deref()
            .ok_or_else(|| DbError::InvalidArgument("No table specified".to_string()))
    }
}

pub(crate) fn append_condition(chain: &mut String, logic: Logic, condition: String) {
    if chain.is_empty() {
        *chain = condition;
    } else {
        chain.push_str(&format!(" {} {}", logic, condition));
    }
}
