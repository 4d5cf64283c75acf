//! Trade compatibility service
//!
//! Reads trades of either schema generation and hands back [`NormalizedTrade`]s.
//! Writes follow the registry's migration mode at the moment of the call.

use std::collections::HashSet;
use std::sync::Arc;

use bson::{doc, Bson, DateTime, Document};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::filters::{self, TradeFilters};
use super::raw::{self, SchemaVersion, SkillSources};
use super::skills::{names_from_sources, skills_for_scope, SkillScope};
use crate::db::schemas::{LegacyTradeDoc, Skill, TradeDoc, CURRENT_SCHEMA_VERSION, TRADE_COLLECTION};
use crate::db::{DocumentStore, QueryClause, SortDirection, StoreQuery};
use crate::error::{CompatError, Result};
use crate::registry::MigrationModeState;

/// Trade lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TradeStatus {
    Open,
    Pending,
    InProgress,
    PendingConfirmation,
    Completed,
    Cancelled,
    Disputed,
}

impl TradeStatus {
    /// Accepts current names and the spellings legacy records used
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_lowercase().replace('_', "-");
        let status = match normalized.as_str() {
            "open" | "active" | "draft" => TradeStatus::Open,
            "pending" => TradeStatus::Pending,
            "in-progress" | "accepted" => TradeStatus::InProgress,
            "pending-confirmation" | "pending-completion" => TradeStatus::PendingConfirmation,
            "completed" | "complete" => TradeStatus::Completed,
            "cancelled" | "canceled" => TradeStatus::Cancelled,
            "disputed" => TradeStatus::Disputed,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Pending => "pending",
            TradeStatus::InProgress => "in-progress",
            TradeStatus::PendingConfirmation => "pending-confirmation",
            TradeStatus::Completed => "completed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Disputed => "disputed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Completed | TradeStatus::Cancelled | TradeStatus::Disputed
        )
    }
}

/// A trade in the clean model, whatever shape it was stored in
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedTrade {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub creator_id: String,
    pub participant_id: Option<String>,
    pub status: TradeStatus,
    /// Stored value; `None` for records that predate the field
    pub visibility: Option<String>,
    pub skills_offered: Vec<Skill>,
    pub skills_wanted: Vec<Skill>,
    /// Lower-cased union of every skill field
    pub skills_index: Vec<String>,
    pub created_at: Option<chrono::DateTime<Utc>>,
    pub updated_at: Option<chrono::DateTime<Utc>>,
    /// Generation of the stored record
    pub schema_version: SchemaVersion,
    pub compatibility_layer_used: bool,
}

impl NormalizedTrade {
    pub fn is_visible_to_public(&self) -> bool {
        let stored = self.visibility.as_deref().map(Bson::from);
        filters::visibility_is_public(stored.as_ref())
    }

    /// Current-schema document carrying every clean field.
    /// Normalizing it again yields the same trade.
    pub fn to_document(&self) -> Document {
        let skills = |list: &[Skill]| -> Vec<Bson> {
            list.iter()
                .filter_map(|s| bson::to_bson(s).ok())
                .collect()
        };

        let mut document = doc! {
            "id": self.id.as_str(),
            "title": self.title.as_str(),
            "description": self.description.as_str(),
            "creatorId": self.creator_id.as_str(),
            "status": self.status.as_str(),
            "skillsOffered": skills(&self.skills_offered),
            "skillsWanted": skills(&self.skills_wanted),
            "skillsIndex": self.skills_index.clone(),
            "schemaVersion": self.schema_version.as_str(),
        };
        if let Some(category) = &self.category {
            document.insert("category", category.as_str());
        }
        if let Some(participant) = &self.participant_id {
            document.insert("participantId", participant.as_str());
        }
        if let Some(visibility) = &self.visibility {
            document.insert("visibility", visibility.as_str());
        }
        if let Some(created) = self.created_at {
            document.insert("createdAt", DateTime::from_chrono(created));
        }
        if let Some(updated) = self.updated_at {
            document.insert("updatedAt", DateTime::from_chrono(updated));
        }
        document
    }
}

/// Project a raw trade record onto the clean model.
///
/// Missing optional fields get defaults. A missing id, a missing creator or
/// an unrecognized status is a validation error.
pub fn normalize_trade(record: &Document) -> Result<NormalizedTrade> {
    normalize_trade_from(record, TRADE_COLLECTION)
}

/// [`normalize_trade`] naming `collection` in validation errors
pub(crate) fn normalize_trade_from(record: &Document, collection: &str) -> Result<NormalizedTrade> {
    let id = raw::record_id(record)
        .ok_or_else(|| CompatError::validation(collection, "<unknown>", "missing id"))?;

    let creator_id = raw::creator_id(record)
        .ok_or_else(|| CompatError::validation(collection, &id, "missing creatorId"))?;

    let status = match raw::string_field(record, "status") {
        None => TradeStatus::Open,
        Some(value) => TradeStatus::parse(&value).ok_or_else(|| {
            CompatError::validation(collection, &id, format!("unrecognized status '{}'", value))
        })?,
    };

    let visibility = match record.get("visibility") {
        None | Some(Bson::Null) | Some(Bson::Undefined) => None,
        Some(Bson::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };

    let sources = SkillSources::parse(record);

    Ok(NormalizedTrade {
        title: raw::string_field(record, "title").unwrap_or_default(),
        description: raw::string_field(record, "description").unwrap_or_default(),
        category: raw::string_field(record, "category"),
        participant_id: raw::participant_id(record),
        status,
        visibility,
        skills_offered: skills_for_scope(&sources, SkillScope::Offered),
        skills_wanted: skills_for_scope(&sources, SkillScope::Wanted),
        skills_index: names_from_sources(&sources, None),
        created_at: raw::timestamp_field(record, "createdAt").map(|d| d.to_chrono()),
        updated_at: raw::timestamp_field(record, "updatedAt").map(|d| d.to_chrono()),
        schema_version: SchemaVersion::detect(record, sources.has_current_fields()),
        compatibility_layer_used: true,
        id,
        creator_id,
    })
}

/// Input for a new trade listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrade {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub creator_id: String,
    #[serde(default)]
    pub skills_offered: Vec<Skill>,
    #[serde(default)]
    pub skills_wanted: Vec<Skill>,
    /// Defaults to public
    #[serde(default)]
    pub visibility: Option<String>,
}

impl NewTrade {
    fn validate(&self, collection: &str) -> Result<()> {
        if self.creator_id.trim().is_empty() {
            return Err(CompatError::validation(collection, "<new>", "missing creatorId"));
        }
        if self.title.trim().is_empty() {
            return Err(CompatError::validation(collection, "<new>", "missing title"));
        }
        Ok(())
    }

    fn visibility(&self) -> String {
        self.visibility
            .clone()
            .unwrap_or_else(|| filters::PUBLIC_VISIBILITY.to_string())
    }

    fn current_doc(&self, now: DateTime) -> TradeDoc {
        let mut index: Vec<String> = self
            .skills_offered
            .iter()
            .chain(&self.skills_wanted)
            .map(|s| s.name.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        index.sort();
        index.dedup();

        TradeDoc {
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            creator_id: self.creator_id.clone(),
            participant_id: None,
            status: TradeStatus::Open.as_str().to_string(),
            visibility: self.visibility(),
            skills_offered: self.skills_offered.clone(),
            skills_wanted: self.skills_wanted.clone(),
            skills_index: index,
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn legacy_doc(&self, now: DateTime) -> LegacyTradeDoc {
        let names = |list: &[Skill]| -> Vec<String> { list.iter().map(|s| s.name.clone()).collect() };
        let offered = names(&self.skills_offered);
        let requested = names(&self.skills_wanted);
        let skills = offered.iter().chain(&requested).cloned().collect();

        LegacyTradeDoc {
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            creator_id: self.creator_id.clone(),
            participant_id: None,
            status: TradeStatus::Open.as_str().to_string(),
            visibility: self.visibility(),
            offered_skills: offered,
            requested_skills: requested,
            skills,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Trade reads and writes across both schema generations
pub struct TradeCompatibilityService {
    store: Arc<dyn DocumentStore>,
    mode: Arc<MigrationModeState>,
    collection: String,
}

impl std::fmt::Debug for TradeCompatibilityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeCompatibilityService")
            .field("backend", &self.store.backend())
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl TradeCompatibilityService {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        mode: Arc<MigrationModeState>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            mode,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn normalize_trade_data(&self, record: &Document) -> Result<NormalizedTrade> {
        normalize_trade_from(record, &self.collection)
    }

    /// Run a store query and normalize every result, newest first.
    ///
    /// Store failures come back unchanged. One malformed record fails the
    /// whole call rather than being dropped. A `limit` of 0 returns nothing.
    ///
    /// The store orders by the raw `createdAt`, which mixes BSON dates,
    /// numbers and strings across schema generations, so results are sorted
    /// again on the normalized timestamp.
    pub async fn query_trades(
        &self,
        clauses: Vec<QueryClause>,
        limit: usize,
    ) -> Result<Vec<NormalizedTrade>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = StoreQuery::new(clauses)
            .order_by("createdAt", SortDirection::Descending)
            .limit(limit);
        let records = self.store.query(&self.collection, &query).await?;
        debug!(collection = %self.collection, count = records.len(), "trades fetched");
        let mut trades = records
            .iter()
            .map(|record| self.normalize_trade_data(record))
            .collect::<Result<Vec<_>>>()?;
        sort_newest_first(&mut trades);
        Ok(trades)
    }

    pub async fn get_trade(&self, id: &str) -> Result<Option<NormalizedTrade>> {
        match self.store.get(&self.collection, id).await? {
            Some(record) => self.normalize_trade_data(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Trades the user created or joined, newest first
    pub async fn get_user_trades(&self, user_id: &str, limit: usize) -> Result<Vec<NormalizedTrade>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let created = self
            .query_trades(vec![QueryClause::eq("creatorId", user_id)], limit)
            .await?;
        let joined = self
            .query_trades(vec![QueryClause::eq("participantId", user_id)], limit)
            .await?;

        let mut seen = HashSet::new();
        let mut trades: Vec<NormalizedTrade> = created
            .into_iter()
            .chain(joined)
            .filter(|t| seen.insert(t.id.clone()))
            .collect();
        sort_newest_first(&mut trades);
        trades.truncate(limit);
        Ok(trades)
    }

    /// Public trades matching filters and an optional search term.
    ///
    /// Creator and participant filters go to the store; skill and text
    /// matching run here because legacy records lack `skillsIndex`.
    pub async fn search_trades(
        &self,
        criteria: &TradeFilters,
        term: Option<&str>,
        limit: usize,
    ) -> Result<Vec<NormalizedTrade>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut clauses = Vec::new();
        if let Some(creator) = &criteria.creator_id {
            clauses.push(QueryClause::eq("creatorId", creator.as_str()));
        }
        if let Some(participant) = &criteria.participant_id {
            clauses.push(QueryClause::eq("participantId", participant.as_str()));
        }

        let query = StoreQuery::new(clauses).order_by("createdAt", SortDirection::Descending);
        let records = self.store.query(&self.collection, &query).await?;

        let mut results = Vec::new();
        for record in records.iter().filter(|r| {
            filters::is_visible_to_public(r)
                && filters::matches_filters(r, criteria)
                && term.map_or(true, |t| filters::matches_search_term(r, t))
        }) {
            results.push(self.normalize_trade_data(record)?);
            if results.len() >= limit {
                break;
            }
        }
        debug!(
            collection = %self.collection,
            scanned = records.len(),
            matched = results.len(),
            "trade search"
        );
        Ok(results)
    }

    /// Insert a new open trade in the shape the current mode calls for
    pub async fn create_trade(&self, trade: NewTrade) -> Result<String> {
        trade.validate(&self.collection)?;

        let now = DateTime::now();
        let migrating = self.mode.is_enabled();
        let document = if migrating {
            bson::to_document(&trade.current_doc(now))
        } else {
            bson::to_document(&trade.legacy_doc(now))
        }
        .map_err(|e| CompatError::validation(self.collection.as_str(), "<new>", e.to_string()))?;

        let id = self.store.insert(&self.collection, document).await?;
        info!(
            trade_id = %id,
            schema = if migrating { "current" } else { "legacy" },
            "Trade created"
        );
        Ok(id)
    }
}

/// Undated trades sort last
fn sort_newest_first(trades: &mut [NormalizedTrade]) {
    trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}
