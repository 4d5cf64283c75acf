//! Recognition of raw record shapes
//!
//! Every field that has changed shape across schema generations is parsed
//! into an explicit variant here, once. Normalization then matches on these
//! variants instead of probing optional fields ad hoc, so the policy for
//! which stored field feeds which clean field lives in this file alone.
//!
//! Trade skill fields:
//!
//! | stored field      | generation | side    |
//! |-------------------|------------|---------|
//! | `skillsOffered`   | current    | offered |
//! | `skillsWanted`    | current    | wanted  |
//! | `offeredSkills`   | legacy     | offered |
//! | `requestedSkills` | legacy     | wanted  |
//! | `skills`          | legacy     | both    |
//! | `skillsIndex`     | current    | both    |
//!
//! Conversation participants, first non-empty source wins:
//! `participantIds`, then `participants`, then `legacyParticipants`.

use bson::{Bson, DateTime, Document};
use serde::Serialize;
use tracing::debug;

use super::skills::SkillScope;
use crate::db::schemas::Skill;

/// One element of a stored skill array
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkillEntry {
    /// `{name, level}` object
    Object(Skill),
    /// Bare skill name
    Name(String),
}

/// How a single skill-bearing field is stored
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SkillField {
    #[default]
    Absent,
    /// Array of objects and/or plain strings
    List(Vec<SkillEntry>),
    /// Comma-separated string
    Delimited(String),
    /// Present but of a type no schema generation ever wrote
    Unrecognized(&'static str),
}

impl SkillField {
    pub fn parse(value: Option<&Bson>) -> Self {
        match value {
            None | Some(Bson::Null) | Some(Bson::Undefined) => SkillField::Absent,
            Some(Bson::String(s)) => SkillField::Delimited(s.clone()),
            Some(Bson::Array(items)) => {
                SkillField::List(items.iter().filter_map(parse_entry).collect())
            }
            Some(other) => SkillField::Unrecognized(bson_type_name(other)),
        }
    }

    /// Trimmed, non-empty skill entries in stored order
    pub fn skills(&self) -> Vec<Skill> {
        match self {
            SkillField::Absent | SkillField::Unrecognized(_) => Vec::new(),
            SkillField::List(entries) => entries
                .iter()
                .map(|entry| match entry {
                    SkillEntry::Object(skill) => skill.clone(),
                    SkillEntry::Name(name) => Skill::new(name.clone()),
                })
                .collect(),
            SkillField::Delimited(joined) => joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Skill::new)
                .collect(),
        }
    }

    pub fn is_present(&self) -> bool {
        !matches!(self, SkillField::Absent)
    }
}

fn parse_entry(item: &Bson) -> Option<SkillEntry> {
    match item {
        Bson::String(s) => non_empty(s).map(SkillEntry::Name),
        Bson::Document(d) => {
            let name = d.get_str("name").ok().and_then(non_empty)?;
            let level = d.get_str("level").ok().and_then(non_empty);
            Some(SkillEntry::Object(Skill { name, level }))
        }
        _ => None,
    }
}

/// All skill-bearing fields of a trade record
#[derive(Debug, Clone, Default)]
pub struct SkillSources {
    pub current_offered: SkillField,
    pub current_wanted: SkillField,
    pub legacy_offered: SkillField,
    pub legacy_wanted: SkillField,
    pub flat: SkillField,
    pub index: SkillField,
}

impl SkillSources {
    pub fn parse(record: &Document) -> Self {
        let sources = Self {
            current_offered: SkillField::parse(record.get("skillsOffered")),
            current_wanted: SkillField::parse(record.get("skillsWanted")),
            legacy_offered: SkillField::parse(record.get("offeredSkills")),
            legacy_wanted: SkillField::parse(record.get("requestedSkills")),
            flat: SkillField::parse(record.get("skills")),
            index: SkillField::parse(record.get("skillsIndex")),
        };
        for (name, field) in sources.named() {
            if let SkillField::Unrecognized(kind) = field {
                debug!(field = name, kind, "ignoring skill field of unexpected type");
            }
        }
        sources
    }

    fn named(&self) -> [(&'static str, &SkillField); 6] {
        [
            ("skillsOffered", &self.current_offered),
            ("skillsWanted", &self.current_wanted),
            ("offeredSkills", &self.legacy_offered),
            ("requestedSkills", &self.legacy_wanted),
            ("skills", &self.flat),
            ("skillsIndex", &self.index),
        ]
    }

    /// Fields that contribute to a scope, current generation first.
    /// Side-less fields only count when no scope is requested.
    pub fn fields(&self, scope: Option<SkillScope>) -> Vec<&SkillField> {
        match scope {
            Some(SkillScope::Offered) => vec![&self.current_offered, &self.legacy_offered],
            Some(SkillScope::Wanted) => vec![&self.current_wanted, &self.legacy_wanted],
            None => self.named().into_iter().map(|(_, field)| field).collect(),
        }
    }

    pub fn has_current_fields(&self) -> bool {
        self.current_offered.is_present() || self.current_wanted.is_present()
    }
}

/// Which schema generation a stored record was written by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    Legacy,
    Current,
}

impl SchemaVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::Legacy => "1.0",
            SchemaVersion::Current => crate::db::schemas::CURRENT_SCHEMA_VERSION,
        }
    }

    /// An explicit `schemaVersion` wins; otherwise the presence of
    /// current-schema fields decides.
    pub fn detect(record: &Document, has_current_fields: bool) -> Self {
        let major = match record.get("schemaVersion") {
            Some(Bson::String(s)) => s.split('.').next().and_then(|m| m.trim().parse::<u32>().ok()),
            Some(Bson::Int32(n)) => u32::try_from(*n).ok(),
            Some(Bson::Int64(n)) => u32::try_from(*n).ok(),
            Some(Bson::Double(n)) if *n >= 0.0 => Some(*n as u32),
            _ => None,
        };
        match major {
            Some(m) if m >= 2 => SchemaVersion::Current,
            Some(_) => SchemaVersion::Legacy,
            None if has_current_fields => SchemaVersion::Current,
            None => SchemaVersion::Legacy,
        }
    }
}

/// Where a conversation's participant list was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantSource {
    /// Current `participantIds` string array
    Ids(Vec<String>),
    /// `participants` array of `{id}` objects or strings
    Participants(Vec<String>),
    /// `legacyParticipants` string array
    Legacy(Vec<String>),
    Missing,
}

impl ParticipantSource {
    pub fn parse(record: &Document) -> Self {
        let ids = id_list(record.get("participantIds"));
        if !ids.is_empty() {
            return ParticipantSource::Ids(ids);
        }
        let participants = id_list(record.get("participants"));
        if !participants.is_empty() {
            return ParticipantSource::Participants(participants);
        }
        let legacy = id_list(record.get("legacyParticipants"));
        if !legacy.is_empty() {
            return ParticipantSource::Legacy(legacy);
        }
        ParticipantSource::Missing
    }

    /// Participant ids in stored order with repeats removed
    pub fn ids(&self) -> Vec<String> {
        let raw = match self {
            ParticipantSource::Ids(ids)
            | ParticipantSource::Participants(ids)
            | ParticipantSource::Legacy(ids) => ids.as_slice(),
            ParticipantSource::Missing => &[],
        };
        let mut out: Vec<String> = Vec::with_capacity(raw.len());
        for id in raw {
            if !out.contains(id) {
                out.push(id.clone());
            }
        }
        out
    }

    pub fn field_name(&self) -> Option<&'static str> {
        match self {
            ParticipantSource::Ids(_) => Some("participantIds"),
            ParticipantSource::Participants(_) => Some("participants"),
            ParticipantSource::Legacy(_) => Some("legacyParticipants"),
            ParticipantSource::Missing => None,
        }
    }
}

fn id_list(value: Option<&Bson>) -> Vec<String> {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Bson::String(s) => non_empty(s),
                Bson::Document(d) => d.get_str("id").ok().and_then(non_empty),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Record id: a string `id` field, else the store's `_id`
pub fn record_id(record: &Document) -> Option<String> {
    if let Some(id) = record.get_str("id").ok().and_then(non_empty) {
        return Some(id);
    }
    match record.get("_id") {
        Some(Bson::String(s)) => non_empty(s),
        Some(Bson::ObjectId(oid)) => Some(oid.to_hex()),
        _ => None,
    }
}

/// Trade creator: top-level `creatorId`, else `participants.creator`
pub fn creator_id(record: &Document) -> Option<String> {
    string_field(record, "creatorId").or_else(|| nested_party(record, "creator"))
}

/// Trade counterpart: top-level `participantId`, else `participants.participant`
pub fn participant_id(record: &Document) -> Option<String> {
    string_field(record, "participantId").or_else(|| nested_party(record, "participant"))
}

fn nested_party(record: &Document, key: &str) -> Option<String> {
    record
        .get_document("participants")
        .ok()
        .and_then(|p| string_field(p, key))
}

/// Trimmed, non-empty string field
pub fn string_field(record: &Document, key: &str) -> Option<String> {
    record.get_str(key).ok().and_then(non_empty)
}

/// Timestamps have been stored as BSON datetimes, epoch millis, RFC 3339
/// strings and `{seconds, nanoseconds}` documents. All are read at
/// millisecond precision.
pub fn timestamp_field(record: &Document, key: &str) -> Option<DateTime> {
    let value = record.get(key)?;
    let parsed = match value {
        Bson::DateTime(dt) => Some(*dt),
        Bson::Int64(ms) => Some(DateTime::from_millis(*ms)),
        Bson::Int32(ms) => Some(DateTime::from_millis(i64::from(*ms))),
        Bson::Double(ms) if ms.is_finite() => Some(DateTime::from_millis(*ms as i64)),
        Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| DateTime::from_chrono(dt.with_timezone(&chrono::Utc))),
        Bson::Document(d) => {
            let seconds = d
                .get_i64("seconds")
                .or_else(|_| d.get_i32("seconds").map(i64::from))
                .ok()?;
            let nanos = d
                .get_i64("nanoseconds")
                .or_else(|_| d.get_i32("nanoseconds").map(i64::from))
                .unwrap_or(0);
            seconds
                .checked_mul(1000)
                .and_then(|ms| ms.checked_add(nanos / 1_000_000))
                .map(DateTime::from_millis)
        }
        _ => None,
    };
    if parsed.is_none() {
        debug!(field = key, kind = bson_type_name(value), "unreadable timestamp ignored");
    }
    parsed
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "document",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::DateTime(_) => "datetime",
        Bson::ObjectId(_) => "objectId",
        _ => "other",
    }
}
