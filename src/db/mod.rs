//! Persistence layer
//!
//! The [`DocumentStore`] trait is the only seam between the compatibility
//! services and the database. MongoDB is the production backend.

pub mod memory;
pub mod mongo;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::{IntoIndexes, MongoStore};
pub use store::{DocumentStore, FilterOp, QueryClause, SortDirection, StoreQuery};
