//! Trade filter matching
//!
//! Pure predicates over raw trade records. None of them mutate the record.

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use super::raw::{self, SkillSources};
use super::skills::{names_from_sources, SkillScope};

/// Value of `visibility` that makes a trade publicly listed
pub const PUBLIC_VISIBILITY: &str = "public";

/// Filter criteria for trade listings. `None` or empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeFilters {
    /// Matches a skill on either side
    #[serde(default)]
    pub skills: Option<Vec<String>>,

    #[serde(default)]
    pub skills_offered: Option<Vec<String>>,

    #[serde(default)]
    pub skills_wanted: Option<Vec<String>>,

    #[serde(default)]
    pub creator_id: Option<String>,

    #[serde(default)]
    pub participant_id: Option<String>,
}

impl TradeFilters {
    pub fn has_skill_filters(&self) -> bool {
        [&self.skills, &self.skills_offered, &self.skills_wanted]
            .into_iter()
            .any(|terms| active_terms(terms).is_some())
    }
}

/// Non-empty filter list, lower-cased and trimmed
fn active_terms(terms: &Option<Vec<String>>) -> Option<Vec<String>> {
    let terms: Vec<String> = terms
        .as_ref()?
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    (!terms.is_empty()).then_some(terms)
}

fn overlaps(names: &[String], terms: &[String]) -> bool {
    names.iter().any(|name| terms.contains(name))
}

/// Every present skill filter must overlap its own scope.
///
/// A scoped filter is checked only against that side's skills, so a wanted
/// filter never matches on an offered skill even when the unscoped union
/// would.
pub fn matches_skill_filters(record: &Document, filters: &TradeFilters) -> bool {
    let sources = SkillSources::parse(record);
    let checks = [
        (&filters.skills, None),
        (&filters.skills_offered, Some(SkillScope::Offered)),
        (&filters.skills_wanted, Some(SkillScope::Wanted)),
    ];
    checks.into_iter().all(|(terms, scope)| match active_terms(terms) {
        Some(terms) => overlaps(&names_from_sources(&sources, scope), &terms),
        None => true,
    })
}

/// Skill filters plus exact creator / participant matches
pub fn matches_filters(record: &Document, filters: &TradeFilters) -> bool {
    if let Some(creator) = &filters.creator_id {
        if raw::creator_id(record).as_deref() != Some(creator.as_str()) {
            return false;
        }
    }
    if let Some(participant) = &filters.participant_id {
        if raw::participant_id(record).as_deref() != Some(participant.as_str()) {
            return false;
        }
    }
    matches_skill_filters(record, filters)
}

/// Case-insensitive substring search over title, description, category and
/// skill names. A blank term matches everything.
pub fn matches_search_term(record: &Document, term: &str) -> bool {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }

    let text_hit = ["title", "description", "category"].iter().any(|key| {
        record
            .get_str(key)
            .map(|value| value.to_lowercase().contains(&needle))
            .unwrap_or(false)
    });

    text_hit
        || names_from_sources(&SkillSources::parse(record), None)
            .iter()
            .any(|name| name.contains(&needle))
}

/// Whether a trade is listed publicly.
///
/// Records written before `visibility` existed have no value and are public.
/// Any explicit value other than exactly `public` hides the trade.
pub fn is_visible_to_public(record: &Document) -> bool {
    visibility_is_public(record.get("visibility"))
}

pub(crate) fn visibility_is_public(value: Option<&Bson>) -> bool {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => true,
        Some(Bson::String(s)) => s == PUBLIC_VISIBILITY,
        Some(_) => false,
    }
}
