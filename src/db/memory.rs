//! In-process document store
//!
//! Evaluates the same clause semantics the MongoDB backend translates to,
//! including dotted paths that reach into arrays of sub-documents. Used by
//! tests and for running the CLI without a database.

use std::cmp::Ordering;
use std::collections::HashMap;

use bson::{Bson, Document};
use tokio::sync::RwLock;
use tracing::debug;

use super::store::{DocumentStore, FilterOp, QueryClause, SortDirection, StoreQuery};
use crate::error::StoreError;

pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    /// When set, every operation fails with this error
    failure: RwLock<Option<StoreError>>,
    usable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            failure: RwLock::new(None),
            usable: true,
        }
    }

    /// A handle that fails `check_handle`, e.g. a client built from bad config
    pub fn unusable() -> Self {
        Self {
            usable: false,
            ..Self::new()
        }
    }

    /// Make every subsequent operation fail with `error` until cleared
    pub async fn fail_with(&self, error: StoreError) {
        *self.failure.write().await = Some(error);
    }

    pub async fn clear_failure(&self) {
        *self.failure.write().await = None;
    }

    /// Number of records in a collection
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    async fn injected_failure(&self) -> Result<(), StoreError> {
        match self.failure.read().await.as_ref() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn check_handle(&self) -> Result<(), StoreError> {
        if self.usable {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store handle is unusable".into()))
        }
    }

    async fn query(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> Result<Vec<Document>, StoreError> {
        self.injected_failure().await?;

        let collections = self.collections.read().await;
        let mut results: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| query.clauses.iter().all(|c| clause_matches(doc, c)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((field, direction)) = &query.order_by {
            results.sort_by(|a, b| {
                let ord = compare_optional(
                    resolve(a, field).first().copied(),
                    resolve(b, field).first().copied(),
                );
                match direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        debug!(collection, count = results.len(), "memory query");
        Ok(results)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.injected_failure().await?;

        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|doc| document_id(doc).as_deref() == Some(id))
                .cloned()
        }))
    }

    async fn insert(&self, collection: &str, mut document: Document) -> Result<String, StoreError> {
        self.injected_failure().await?;

        let id = document_id(&document).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if !document.contains_key("_id") {
            document.insert("_id", id.clone());
        }

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| document_id(d).as_deref() == Some(id.as_str())) {
            return Err(StoreError::Write(format!(
                "duplicate id '{}' in {}",
                id, collection
            )));
        }
        docs.push(document);
        Ok(id)
    }
}

/// `_id` (string or ObjectId) falling back to a string `id` field
fn document_id(doc: &Document) -> Option<String> {
    match doc.get("_id") {
        Some(Bson::String(s)) => return Some(s.clone()),
        Some(Bson::ObjectId(oid)) => return Some(oid.to_hex()),
        _ => {}
    }
    doc.get_str("id").ok().map(str::to_string)
}

/// All values reachable at a dotted path, descending into arrays of documents
fn resolve<'a>(doc: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(value) = doc.get(segments[0]) {
        descend(value, &segments[1..], &mut out);
    }
    out
}

fn descend<'a>(value: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Bson::Document(d) => {
            if let Some(v) = d.get(*head) {
                descend(v, rest, out);
            }
        }
        Bson::Array(items) => {
            for item in items {
                if let Bson::Document(d) = item {
                    if let Some(v) = d.get(*head) {
                        descend(v, rest, out);
                    }
                }
            }
        }
        _ => {}
    }
}

fn clause_matches(doc: &Document, clause: &QueryClause) -> bool {
    let values = resolve(doc, &clause.field);
    match clause.op {
        FilterOp::Eq | FilterOp::ArrayContains => equals_any(&values, &clause.value),
        FilterOp::Ne => !equals_any(&values, &clause.value),
        FilterOp::In => match &clause.value {
            Bson::Array(candidates) => candidates.iter().any(|c| equals_any(&values, c)),
            _ => false,
        },
        FilterOp::Lt => compares(&values, &clause.value, |o| o == Ordering::Less),
        FilterOp::Lte => compares(&values, &clause.value, |o| o != Ordering::Greater),
        FilterOp::Gt => compares(&values, &clause.value, |o| o == Ordering::Greater),
        FilterOp::Gte => compares(&values, &clause.value, |o| o != Ordering::Less),
    }
}

fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    values.iter().any(|v| match v {
        Bson::Array(items) => items.iter().any(|i| bson_eq(i, target)),
        other => bson_eq(other, target),
    })
}

fn compares(values: &[&Bson], target: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    values
        .iter()
        .any(|v| compare_bson(v, target).map(&accept).unwrap_or(false))
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    compare_bson(a, b) == Some(Ordering::Equal) || a == b
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn compare_bson(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Cross-type sort order, following MongoDB's BSON comparison brackets
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null | Bson::Undefined => 0,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 1,
        Bson::String(_) | Bson::Symbol(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::Binary(_) => 5,
        Bson::ObjectId(_) => 6,
        Bson::Boolean(_) => 7,
        Bson::DateTime(_) => 8,
        Bson::Timestamp(_) => 9,
        _ => 10,
    }
}

/// Missing values sort first; values of different types sort by bracket
fn compare_optional(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_bson(x, y)
            .unwrap_or_else(|| type_rank(x).cmp(&type_rank(y))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use tokio_test::{assert_err, assert_ok};

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert("trades", doc! { "_id": "t1", "creatorId": "u1", "rank": 3, "skillsIndex": ["react", "go"] })
            .await
            .unwrap();
        store
            .insert("trades", doc! { "_id": "t2", "creatorId": "u2", "rank": 1, "skillsIndex": ["rust"] })
            .await
            .unwrap();
        store
            .insert(
                "conversations",
                doc! { "_id": "c1", "participants": [{ "id": "u1" }, { "id": "u2" }] },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_equality_and_ordering() {
        let store = seeded().await;

        let found = store
            .query("trades", &StoreQuery::new(vec![QueryClause::eq("creatorId", "u2")]))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("_id").unwrap(), "t2");

        let ordered = store
            .query(
                "trades",
                &StoreQuery::default().order_by("rank", SortDirection::Descending),
            )
            .await
            .unwrap();
        assert_eq!(ordered[0].get_str("_id").unwrap(), "t1");

        let limited = store
            .query("trades", &StoreQuery::default().limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_array_and_range_clauses() {
        let store = seeded().await;

        let react = store
            .query(
                "trades",
                &StoreQuery::new(vec![QueryClause::array_contains("skillsIndex", "react")]),
            )
            .await
            .unwrap();
        assert_eq!(react.len(), 1);

        let ranked = store
            .query(
                "trades",
                &StoreQuery::new(vec![QueryClause::new("rank", FilterOp::Gte, 2i64)]),
            )
            .await
            .unwrap();
        assert_eq!(ranked.len(), 1);

        let either = store
            .query(
                "trades",
                &StoreQuery::new(vec![QueryClause::new(
                    "creatorId",
                    FilterOp::In,
                    vec![Bson::from("u1"), Bson::from("u2")],
                )]),
            )
            .await
            .unwrap();
        assert_eq!(either.len(), 2);

        let nested = store
            .query(
                "conversations",
                &StoreQuery::new(vec![QueryClause::eq("participants.id", "u2")]),
            )
            .await
            .unwrap();
        assert_eq!(nested.len(), 1);
    }

    #[tokio::test]
    async fn test_get_and_duplicate_insert() {
        let store = seeded().await;
        assert!(store.get("trades", "t1").await.unwrap().is_some());
        assert!(store.get("trades", "missing").await.unwrap().is_none());
        assert_err!(store.insert("trades", doc! { "_id": "t1" }).await);

        let id = assert_ok!(store.insert("trades", doc! { "creatorId": "u3" }).await);
        assert!(store.get("trades", &id).await.unwrap().is_some());
        assert_eq!(store.count("trades").await, 3);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = seeded().await;
        store.fail_with(StoreError::Connection("down".into())).await;

        let err = store
            .query("trades", &StoreQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Connection("down".into()));

        store.clear_failure().await;
        assert_ok!(store.query("trades", &StoreQuery::default()).await);
    }

    #[tokio::test]
    async fn test_mixed_types_sort_by_bracket() {
        let store = MemoryStore::new();
        for record in [
            doc! { "_id": "n", "createdAt": 5_000i64 },
            doc! { "_id": "s", "createdAt": "1970-01-01T00:00:01Z" },
            doc! { "_id": "d", "createdAt": bson::DateTime::from_millis(1) },
            doc! { "_id": "m" },
            doc! { "_id": "f", "createdAt": 7_000.5f64 },
        ] {
            assert_ok!(store.insert("trades", record).await);
        }

        let query = StoreQuery::default().order_by("createdAt", SortDirection::Descending);
        let ids: Vec<String> = assert_ok!(store.query("trades", &query).await)
            .iter()
            .map(|d| d.get_str("_id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["d", "s", "f", "n", "m"]);
    }

    #[test]
    fn test_unusable_handle() {
        assert_err!(MemoryStore::unusable().check_handle());
        assert_ok!(MemoryStore::new().check_handle());
    }
}
