//! Query specifications for one-shot reads and subscriptions.

use serde_json::Value;
use std::cmp::Ordering;

use crate::document::{value_cmp, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
}

/// A single field predicate, e.g. `appointment_at >= <instant>`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// Filters, ordering and a limit, applied to all documents of one collection.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document satisfies every filter. Missing fields read as
    /// null, which only matches explicit null equality.
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| {
            let field = doc.get(&f.field).unwrap_or(&Value::Null);
            if field.is_null() && !f.value.is_null() {
                return false;
            }
            let ord = value_cmp(field, &f.value);
            match f.op {
                FilterOp::Eq => ord == Ordering::Equal,
                FilterOp::Ge => ord != Ordering::Less,
                FilterOp::Gt => ord == Ordering::Greater,
                FilterOp::Le => ord != Ordering::Greater,
                FilterOp::Lt => ord == Ordering::Less,
            }
        })
    }

    /// Apply ordering and limit to an already-filtered result set.
    pub fn arrange(&self, mut rows: Vec<(String, Document)>) -> Vec<(String, Document)> {
        if let Some((field, direction)) = &self.order_by {
            rows.sort_by(|(_, a), (_, b)| {
                let ord = value_cmp(
                    a.get(field).unwrap_or(&Value::Null),
                    b.get(field).unwrap_or(&Value::Null),
                );
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}
