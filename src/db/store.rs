//! Document store abstraction
//!
//! The compatibility layer only ever talks to persistence through
//! [`DocumentStore`]. Records come back as raw `bson::Document`s in whatever
//! shape they were written; interpreting them is the job of `compat`.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Comparison applied by a [`QueryClause`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Field is an array holding the value
    ArrayContains,
    /// Field equals one of the values in an array
    In,
}

/// A single `field <op> value` filter. Fields may be dotted paths.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryClause {
    pub field: String,
    pub op: FilterOp,
    pub value: Bson,
}

impl QueryClause {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Bson>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self::new(field, FilterOp::ArrayContains, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Clauses are ANDed together in order
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub clauses: Vec<QueryClause>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn new(clauses: Vec<QueryClause>) -> Self {
        Self {
            clauses,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Handle to the backing document database
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name for logs and status output
    fn backend(&self) -> &'static str;

    /// Check that the handle is usable before the registry adopts it
    fn check_handle(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Run a filtered query against a collection
    async fn query(&self, collection: &str, query: &StoreQuery)
        -> Result<Vec<Document>, StoreError>;

    /// Fetch one record by id
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a record and return its id
    async fn insert(&self, collection: &str, document: Document) -> Result<String, StoreError>;
}
