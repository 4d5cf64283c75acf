//! Dual-schema compatibility layer
//!
//! Everything downstream consumes the normalized shapes produced here and
//! never branches on which stored fields are present.
//!
//! - **raw**: recognizes which legacy/current shape each field is stored in
//! - **skills**: canonical skill names
//! - **filters**: listing filters and the public-visibility rule
//! - **trade** / **chat**: the two compatibility services

pub mod chat;
pub mod filters;
pub mod raw;
pub mod skills;
pub mod trade;

pub use chat::{
    normalize_conversation, ChatCompatibilityService, NewConversation, NormalizedConversation,
};
pub use filters::{
    is_visible_to_public, matches_filters, matches_search_term, matches_skill_filters,
    TradeFilters, PUBLIC_VISIBILITY,
};
pub use raw::SchemaVersion;
pub use skills::{normalized_skill_names, SkillScope};
pub use trade::{
    normalize_trade, NewTrade, NormalizedTrade, TradeCompatibilityService, TradeStatus,
};
