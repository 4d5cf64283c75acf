//! MongoDB-backed document store
//!
//! Records are read as untyped `Document`s; the compatibility services do
//! all interpretation. Query clauses are translated to a filter document.

use bson::{doc, oid::ObjectId, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use tracing::{debug, info};

use super::store::{DocumentStore, FilterOp, QueryClause, SortDirection, StoreQuery};
use crate::error::StoreError;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db_name: String,
}

impl MongoStore {
    /// Connect and verify the database answers a ping
    pub async fn connect(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast instead of hanging on an unreachable server
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::Connection(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.db_name).collection::<Document>(name)
    }

    /// Create the indexes a schema declares on `collection`
    pub async fn ensure_indexes<T: IntoIndexes>(&self, collection: &str) -> Result<(), StoreError> {
        let indices: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        if indices.is_empty() {
            return Ok(());
        }

        let count = indices.len();
        self.collection(collection)
            .create_indexes(indices)
            .await
            .map_err(|e| StoreError::Write(format!("Failed to create indexes: {}", e)))?;

        info!(collection, count, "Indexes ensured");
        Ok(())
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

#[async_trait::async_trait]
impl DocumentStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    fn check_handle(&self) -> Result<(), StoreError> {
        if self.db_name.trim().is_empty() {
            return Err(StoreError::Unavailable("database name is empty".into()));
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<Document>, StoreError> {
        if query.limit == Some(0) {
            return Ok(Vec::new());
        }
        let filter = filter_document(&query.clauses);
        debug!(collection, filter = %filter, "mongo query");

        let coll = self.collection(collection);
        let mut find = coll.find(filter);
        if let Some((field, direction)) = &query.order_by {
            let order = match direction {
                SortDirection::Ascending => 1,
                SortDirection::Descending => -1,
            };
            find = find.sort(doc! { field.as_str(): order });
        }
        if let Some(limit) = driver_limit(query.limit) {
            find = find.limit(limit);
        }

        let cursor = find
            .await
            .map_err(|e| StoreError::Query(format!("Find failed: {}", e)))?;

        // A document that fails to decode fails the whole read
        cursor
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.collection(collection)
            .find_one(id_filter(id))
            .await
            .map_err(|e| StoreError::Query(format!("Find failed: {}", e)))
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        let result = self
            .collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| StoreError::Write(format!("Insert failed: {}", e)))?;

        match result.inserted_id {
            Bson::ObjectId(oid) => Ok(oid.to_hex()),
            Bson::String(s) => Ok(s),
            other => Err(StoreError::Write(format!(
                "Unexpected inserted id type: {}",
                other
            ))),
        }
    }
}

/// Match a string `_id`, an ObjectId `_id`, or a legacy string `id` field
fn id_filter(id: &str) -> Document {
    let mut alternatives = vec![doc! { "_id": id }, doc! { "id": id }];
    if let Ok(oid) = ObjectId::parse_str(id) {
        alternatives.push(doc! { "_id": oid });
    }
    doc! { "$or": alternatives }
}

/// MongoDB treats a zero limit as no limit, so zero never reaches the driver.
/// Caps beyond `i64::MAX` are unbounded anyway.
fn driver_limit(limit: Option<usize>) -> Option<i64> {
    limit
        .filter(|l| *l > 0)
        .and_then(|l| i64::try_from(l).ok())
}

fn clause_document(clause: &QueryClause) -> Document {
    let field = clause.field.as_str();
    let value = clause.value.clone();
    match clause.op {
        // MongoDB equality already matches array members
        FilterOp::Eq | FilterOp::ArrayContains => doc! { field: value },
        FilterOp::Ne => doc! { field: { "$ne": value } },
        FilterOp::Lt => doc! { field: { "$lt": value } },
        FilterOp::Lte => doc! { field: { "$lte": value } },
        FilterOp::Gt => doc! { field: { "$gt": value } },
        FilterOp::Gte => doc! { field: { "$gte": value } },
        FilterOp::In => doc! { field: { "$in": value } },
    }
}

pub(crate) fn filter_document(clauses: &[QueryClause]) -> Document {
    match clauses {
        [] => Document::new(),
        [single] => clause_document(single),
        many => {
            let all: Vec<Document> = many.iter().map(clause_document).collect();
            doc! { "$and": all }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Round trips against a live server need a running MongoDB instance;
    // these cover the pure filter translation.

    #[test]
    fn test_single_clause_filter() {
        let filter = filter_document(&[QueryClause::eq("creatorId", "u1")]);
        assert_eq!(filter, doc! { "creatorId": "u1" });
    }

    #[test]
    fn test_multiple_clauses_are_anded() {
        let filter = filter_document(&[
            QueryClause::eq("status", "open"),
            QueryClause::new("createdAt", FilterOp::Gt, 10i64),
        ]);
        assert_eq!(
            filter,
            doc! { "$and": [ { "status": "open" }, { "createdAt": { "$gt": 10i64 } } ] }
        );
    }

    #[test]
    fn test_driver_limit() {
        assert_eq!(driver_limit(None), None);
        assert_eq!(driver_limit(Some(0)), None);
        assert_eq!(driver_limit(Some(25)), Some(25));
    }

    #[test]
    fn test_id_filter_accepts_object_ids() {
        let oid = ObjectId::new();
        let filter = id_filter(&oid.to_hex());
        let alternatives = filter.get_array("$or").unwrap();
        assert_eq!(alternatives.len(), 3);

        let plain = id_filter("trade-1");
        assert_eq!(plain.get_array("$or").unwrap().len(), 2);
    }
}
