//! Job selection expressions.
//!
//! A small boolean language over the indexed job fields:
//!
//! ```text
//! status = 'Pending' AND tag.priority = 'high'
//! (status IN (Done, Failed) OR id = 17) SUB tag.owner = *
//! NOT status = Running XOR tag.batch != '7'
//! ```
//!
//! Fields are `status`, `id` and `tag.<name>`. An unquoted `*` matches any
//! value; on its own it selects every live job. `NOT` binds tightest, then `AND`, then `OR`, `XOR` and `SUB`,
//! which share one level and associate to the left. Keywords are
//! case-insensitive.

mod lexer;
mod parser;

pub use parser::parse;

use crate::protocol::ObservedStatus;

/// A leaf of a selection: resolves to one set of jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `*`, `status = *` or `id = *`: every live job
    Any,
    Status(ObservedStatus),
    Id(u64),
    /// Jobs carrying tag `key`, with `value` or any value when `None`
    Tag { key: String, value: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryExpr {
    Leaf(Predicate),
    Not(Box<QueryExpr>),
    And(Box<QueryExpr>, Box<QueryExpr>),
    Or(Box<QueryExpr>, Box<QueryExpr>),
    Xor(Box<QueryExpr>, Box<QueryExpr>),
    /// Left side minus right side
    Sub(Box<QueryExpr>, Box<QueryExpr>),
}

impl QueryExpr {
    pub(crate) fn not(inner: QueryExpr) -> Self {
        QueryExpr::Not(Box::new(inner))
    }
}
