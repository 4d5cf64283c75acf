//! trade-migration - dual-schema compatibility layer for trades and chat
//!
//! Trades and conversations are being migrated to a new storage schema while
//! both generations of records live side by side. This crate reads either
//! generation and hands callers one clean shape.
//!
//! ## Components
//!
//! - **Skill Normalizer**: canonical skill names from any skill field shape
//! - **Trade Filter Matcher**: scoped skill filters, search and visibility
//! - **Compatibility services**: normalized trade and conversation reads and
//!   mode-gated writes
//! - **Migration Registry**: owns the services and the migration mode flag

pub mod compat;
pub mod config;
pub mod db;
pub mod error;
pub mod registry;

pub use compat::{
    ChatCompatibilityService, NormalizedConversation, NormalizedTrade, TradeCompatibilityService,
    TradeFilters,
};
pub use config::{Args, MigrationModeSetting};
pub use error::{CompatError, Result, StoreError};
pub use registry::{MigrationRegistry, RegistryStatus, ServiceValidation};
