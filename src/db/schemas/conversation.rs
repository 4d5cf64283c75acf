//! Conversation document schemas

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for conversations
pub const CONVERSATION_COLLECTION: &str = "conversations";

/// Conversation as written in migration mode
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDoc {
    pub participant_ids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub schema_version: String,

    pub created_at: DateTime,

    pub updated_at: DateTime,
}

/// Participant entry of a legacy conversation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct LegacyParticipantRef {
    pub id: String,
}

/// Conversation as written before the migration
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LegacyConversationDoc {
    pub participants: Vec<LegacyParticipantRef>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub created_at: DateTime,

    pub updated_at: DateTime,
}

impl IntoIndexes for ConversationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "participantIds": 1 },
                Some(
                    IndexOptions::builder()
                        .name("participant_ids_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "tradeId": 1 },
                Some(
                    IndexOptions::builder()
                        .name("trade_id_index".to_string())
                        .sparse(true)
                        .build(),
                ),
            ),
        ]
    }
}
