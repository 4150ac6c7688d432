//! Query Builder Module - fluent SQL construction with inline escaping

pub mod builder;
pub mod condition;
pub mod sql_generation;
pub mod types;
pub mod where_clause;

pub use builder::QueryBuilder;
pub use condition::{ConditionCompiler, ConditionNode};
pub use sql_generation::Step;
pub use types::{Comparison, JoinType, Limit, Logic, Operator, OrderDirection, QueryOptions};
