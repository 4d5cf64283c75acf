//! Trade document schemas
//!
//! Current-schema trades store skills as `{name, level}` objects plus a
//! denormalized `skillsIndex`. Legacy trades store plain string arrays.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for trades
pub const TRADE_COLLECTION: &str = "trades";

/// `schemaVersion` stamped on current-schema writes
pub const CURRENT_SCHEMA_VERSION: &str = "2.0";

/// A structured skill entry
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Skill {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl Skill {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: None,
        }
    }

    pub fn with_level(name: impl Into<String>, level: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: Some(level.into()),
        }
    }
}

/// Trade as written in migration mode
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TradeDoc {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub creator_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,

    pub status: String,

    pub visibility: String,

    #[serde(default)]
    pub skills_offered: Vec<Skill>,

    #[serde(default)]
    pub skills_wanted: Vec<Skill>,

    /// Lower-cased union of offered and wanted names
    #[serde(default)]
    pub skills_index: Vec<String>,

    pub schema_version: String,

    pub created_at: DateTime,

    pub updated_at: DateTime,
}

/// Trade as written before the migration
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTradeDoc {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub creator_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,

    pub status: String,

    pub visibility: String,

    #[serde(default)]
    pub offered_skills: Vec<String>,

    #[serde(default)]
    pub requested_skills: Vec<String>,

    /// Flat list of every skill name on the trade
    #[serde(default)]
    pub skills: Vec<String>,

    pub created_at: DateTime,

    pub updated_at: DateTime,
}

impl IntoIndexes for TradeDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "creatorId": 1 },
                Some(
                    IndexOptions::builder()
                        .name("creator_id_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "participantId": 1 },
                Some(
                    IndexOptions::builder()
                        .name("participant_id_index".to_string())
                        .sparse(true)
                        .build(),
                ),
            ),
            // Multikey index for skill search
            (
                doc! { "skillsIndex": 1 },
                Some(
                    IndexOptions::builder()
                        .name("skills_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1, "visibility": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_visibility_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_doc_serializes_camel_case() {
        let trade = TradeDoc {
            title: "Guitar for React".into(),
            description: String::new(),
            category: None,
            creator_id: "u1".into(),
            participant_id: None,
            status: "open".into(),
            visibility: "public".into(),
            skills_offered: vec![Skill::with_level("Guitar", "expert")],
            skills_wanted: vec![Skill::new("React")],
            skills_index: vec!["guitar".into(), "react".into()],
            schema_version: CURRENT_SCHEMA_VERSION.into(),
            created_at: DateTime::now(),
            updated_at: DateTime::now(),
        };

        let doc = bson::to_document(&trade).unwrap();
        assert_eq!(doc.get_str("creatorId").unwrap(), "u1");
        assert!(!doc.contains_key("participantId"));
        let offered = doc.get_array("skillsOffered").unwrap();
        let first = offered[0].as_document().unwrap();
        assert_eq!(first.get_str("level").unwrap(), "expert");
        let wanted = doc.get_array("skillsWanted").unwrap();
        assert!(!wanted[0].as_document().unwrap().contains_key("level"));
    }

    #[test]
    fn test_indexes_declared() {
        let indexes = TradeDoc::into_indices();
        assert_eq!(indexes.len(), 4);
        assert!(indexes.iter().any(|(keys, _)| keys.contains_key("skillsIndex")));
    }
}
