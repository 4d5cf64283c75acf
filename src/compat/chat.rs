//! Chat compatibility service
//!
//! Conversations have stored their participant list under three different
//! fields over time. Normalization settles on one ordered `participant_ids`
//! list; when the conversation belongs to a trade, the trade's creator comes
//! first and its counterpart second.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bson::{Bson, DateTime, Document};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::raw::{self, ParticipantSource, SchemaVersion};
use super::trade::{normalize_trade_from, NormalizedTrade};
use crate::db::schemas::{
    ConversationDoc, LegacyConversationDoc, LegacyParticipantRef, CONVERSATION_COLLECTION,
    CURRENT_SCHEMA_VERSION,
};
use crate::db::{DocumentStore, FilterOp, QueryClause, SortDirection, StoreQuery};
use crate::error::{CompatError, Result};
use crate::registry::MigrationModeState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedConversation {
    pub id: String,
    pub participant_ids: Vec<String>,
    pub trade_id: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Text of the most recent message, when the record carries one
    pub last_message: Option<String>,
    pub created_at: Option<chrono::DateTime<Utc>>,
    pub updated_at: Option<chrono::DateTime<Utc>>,
    pub schema_version: SchemaVersion,
    pub compatibility_layer_used: bool,
}

/// Project a raw conversation onto the clean model.
///
/// `linked_trade` is only consulted when its id equals the conversation's
/// `tradeId`. Output order depends on nothing but the inputs.
pub fn normalize_conversation(
    record: &Document,
    linked_trade: Option<&NormalizedTrade>,
) -> Result<NormalizedConversation> {
    normalize_conversation_from(record, linked_trade, CONVERSATION_COLLECTION)
}

fn normalize_conversation_from(
    record: &Document,
    linked_trade: Option<&NormalizedTrade>,
    collection: &str,
) -> Result<NormalizedConversation> {
    let id = raw::record_id(record)
        .ok_or_else(|| CompatError::validation(collection, "<unknown>", "missing id"))?;

    let source = ParticipantSource::parse(record);
    let mut participant_ids = source.ids();
    if participant_ids.is_empty() {
        return Err(CompatError::validation(collection, &id, "no participants"));
    }

    let trade_id = raw::string_field(record, "tradeId");
    if let (Some(trade), Some(link)) = (linked_trade, trade_id.as_deref()) {
        if trade.id == link {
            order_by_trade(&id, &mut participant_ids, trade);
        }
    }

    let last_message = match record.get("lastMessage") {
        Some(Bson::String(s)) => Some(s.clone()),
        Some(Bson::Document(d)) => raw::string_field(d, "content")
            .or_else(|| raw::string_field(d, "text")),
        _ => None,
    };

    Ok(NormalizedConversation {
        participant_ids,
        trade_id,
        title: raw::string_field(record, "title"),
        kind: raw::string_field(record, "type"),
        last_message,
        created_at: raw::timestamp_field(record, "createdAt").map(|d| d.to_chrono()),
        updated_at: raw::timestamp_field(record, "updatedAt").map(|d| d.to_chrono()),
        schema_version: SchemaVersion::detect(
            record,
            matches!(source, ParticipantSource::Ids(_)),
        ),
        compatibility_layer_used: true,
        id,
    })
}

/// Move the trade creator to the front and the counterpart second.
/// Everyone else keeps their relative order.
fn order_by_trade(conversation_id: &str, ids: &mut Vec<String>, trade: &NormalizedTrade) {
    let mut front = Vec::with_capacity(2);
    for party in [Some(&trade.creator_id), trade.participant_id.as_ref()]
        .into_iter()
        .flatten()
    {
        match ids.iter().position(|id| id == party) {
            Some(pos) => front.push(ids.remove(pos)),
            None => warn!(
                conversation = conversation_id,
                trade = %trade.id,
                party = %party,
                "trade party missing from conversation participants"
            ),
        }
    }
    front.append(ids);
    *ids = front;
}

/// Input for a new conversation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub participant_ids: Vec<String>,
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl NewConversation {
    fn participants(&self, collection: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.participant_ids.iter().map(|s| s.trim()) {
            if !id.is_empty() && !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
        if ids.is_empty() {
            return Err(CompatError::validation(collection, "<new>", "no participants"));
        }
        Ok(ids)
    }
}

/// Conversation reads and writes across both schema generations
pub struct ChatCompatibilityService {
    store: Arc<dyn DocumentStore>,
    mode: Arc<MigrationModeState>,
    collection: String,
    trade_collection: String,
}

impl std::fmt::Debug for ChatCompatibilityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompatibilityService")
            .field("backend", &self.store.backend())
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl ChatCompatibilityService {
    pub(crate) fn new(
        store: Arc<dyn DocumentStore>,
        mode: Arc<MigrationModeState>,
        collection: impl Into<String>,
        trade_collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            mode,
            collection: collection.into(),
            trade_collection: trade_collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn normalize_conversation_data(
        &self,
        record: &Document,
        linked_trade: Option<&NormalizedTrade>,
    ) -> Result<NormalizedConversation> {
        normalize_conversation_from(record, linked_trade, &self.collection)
    }

    /// Fetch and normalize the trade a conversation points at.
    ///
    /// A missing or malformed trade only costs the participant ordering, so
    /// it is logged and skipped. Store failures still propagate.
    async fn linked_trade(&self, record: &Document) -> Result<Option<NormalizedTrade>> {
        let Some(trade_id) = raw::string_field(record, "tradeId") else {
            return Ok(None);
        };
        let Some(trade_record) = self.store.get(&self.trade_collection, &trade_id).await? else {
            warn!(trade = %trade_id, "linked trade not found, keeping stored participant order");
            return Ok(None);
        };
        match normalize_trade_from(&trade_record, &self.trade_collection) {
            Ok(trade) => Ok(Some(trade)),
            Err(e) => {
                warn!(trade = %trade_id, error = %e, "linked trade unreadable, keeping stored participant order");
                Ok(None)
            }
        }
    }

    async fn normalize_all(&self, records: &[Document]) -> Result<Vec<NormalizedConversation>> {
        let mut trades: HashMap<String, Option<NormalizedTrade>> = HashMap::new();
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let linked = match raw::string_field(record, "tradeId") {
                Some(trade_id) => {
                    if !trades.contains_key(&trade_id) {
                        let trade = self.linked_trade(record).await?;
                        trades.insert(trade_id.clone(), trade);
                    }
                    trades.get(&trade_id).cloned().flatten()
                }
                None => None,
            };
            out.push(self.normalize_conversation_data(record, linked.as_ref())?);
        }
        Ok(out)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Option<NormalizedConversation>> {
        let Some(record) = self.store.get(&self.collection, id).await? else {
            return Ok(None);
        };
        let linked = self.linked_trade(&record).await?;
        self.normalize_conversation_data(&record, linked.as_ref())
            .map(Some)
    }

    pub async fn query_conversations(
        &self,
        clauses: Vec<QueryClause>,
        limit: usize,
    ) -> Result<Vec<NormalizedConversation>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = StoreQuery::new(clauses)
            .order_by("updatedAt", SortDirection::Descending)
            .limit(limit);
        let records = self.store.query(&self.collection, &query).await?;
        debug!(collection = %self.collection, count = records.len(), "conversations fetched");
        self.normalize_all(&records).await
    }

    /// Conversations the user takes part in, under any participant field.
    ///
    /// Records without an id are kept so normalization reports them.
    pub async fn get_user_conversations(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<NormalizedConversation>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let lookups = [
            QueryClause::array_contains("participantIds", user_id),
            QueryClause::new("participants.id", FilterOp::Eq, user_id),
            QueryClause::array_contains("participants", user_id),
            QueryClause::array_contains("legacyParticipants", user_id),
        ];

        let mut records: Vec<Document> = Vec::new();
        let mut seen = HashSet::new();
        for clause in lookups {
            let query = StoreQuery::new(vec![clause]).limit(limit);
            for record in self.store.query(&self.collection, &query).await? {
                let fresh = match raw::record_id(&record) {
                    Some(id) => seen.insert(id),
                    None => true,
                };
                if fresh {
                    records.push(record);
                }
            }
        }

        let mut conversations = self.normalize_all(&records).await?;
        conversations.retain(|c| c.participant_ids.iter().any(|p| p == user_id));
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations.truncate(limit);
        Ok(conversations)
    }

    /// Insert a conversation in the shape the current mode calls for
    pub async fn create_conversation(&self, conversation: NewConversation) -> Result<String> {
        let participants = conversation.participants(&self.collection)?;
        let now = DateTime::now();
        let migrating = self.mode.is_enabled();

        let document = if migrating {
            bson::to_document(&ConversationDoc {
                participant_ids: participants,
                trade_id: conversation.trade_id,
                title: conversation.title,
                kind: conversation.kind,
                schema_version: CURRENT_SCHEMA_VERSION.to_string(),
                created_at: now,
                updated_at: now,
            })
        } else {
            bson::to_document(&LegacyConversationDoc {
                participants: participants
                    .into_iter()
                    .map(|id| LegacyParticipantRef { id })
                    .collect(),
                trade_id: conversation.trade_id,
                title: conversation.title,
                kind: conversation.kind,
                created_at: now,
                updated_at: now,
            })
        }
        .map_err(|e| CompatError::validation(self.collection.as_str(), "<new>", e.to_string()))?;

        let id = self.store.insert(&self.collection, document).await?;
        info!(
            conversation_id = %id,
            schema = if migrating { "current" } else { "legacy" },
            "Conversation created"
        );
        Ok(id)
    }
}
