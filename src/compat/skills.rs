//! Skill normalization
//!
//! Collapses every stored skill shape into lower-cased, de-duplicated names.

use std::collections::BTreeSet;

use bson::Document;
use serde::{Deserialize, Serialize};

use super::raw::SkillSources;
use crate::db::schemas::Skill;

/// Side of a trade a skill belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillScope {
    Offered,
    Wanted,
}

/// Lower-cased skill names on a record, with no duplicates.
///
/// With a scope only that side's current and legacy fields count; without one
/// every skill field is unioned, including the flat `skills` field and the
/// `skillsIndex` search aid. Output is sorted.
pub fn normalized_skill_names(record: &Document, scope: Option<SkillScope>) -> Vec<String> {
    names_from_sources(&SkillSources::parse(record), scope)
}

pub(crate) fn names_from_sources(sources: &SkillSources, scope: Option<SkillScope>) -> Vec<String> {
    let names: BTreeSet<String> = sources
        .fields(scope)
        .into_iter()
        .flat_map(|field| field.skills())
        .map(|skill| skill.name.to_lowercase())
        .collect();
    names.into_iter().collect()
}

/// Structured skills for one side, de-duplicated case-insensitively.
///
/// The first occurrence wins, so a current-schema entry (which may carry a
/// level) shadows a legacy string of the same name.
pub(crate) fn skills_for_scope(sources: &SkillSources, scope: SkillScope) -> Vec<Skill> {
    let mut seen = BTreeSet::new();
    sources
        .fields(Some(scope))
        .into_iter()
        .flat_map(|field| field.skills())
        .filter(|skill| seen.insert(skill.name.to_lowercase()))
        .collect()
}
