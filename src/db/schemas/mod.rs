//! Document shapes written by the compatibility layer
//!
//! Each collection has a current-schema and a legacy-schema shape. Which one a
//! write produces depends on the registry's migration mode at call time.

mod conversation;
mod trade;

pub use conversation::{
    ConversationDoc, LegacyConversationDoc, LegacyParticipantRef, CONVERSATION_COLLECTION,
};
pub use trade::{LegacyTradeDoc, Skill, TradeDoc, CURRENT_SCHEMA_VERSION, TRADE_COLLECTION};
