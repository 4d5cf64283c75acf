//! Configuration for trade-migration
//!
//! CLI arguments and environment variable handling using clap. The
//! `MIGRATION_MODE` value is interpreted in exactly one place,
//! [`MigrationModeSetting::parse`], and only at startup.

use clap::{Parser, Subcommand};

use crate::db::schemas::{CONVERSATION_COLLECTION, TRADE_COLLECTION};

/// Inspect and exercise the trade/chat schema compatibility layer
#[derive(Parser, Debug, Clone)]
#[command(name = "trade-migration")]
#[command(about = "Trade/chat schema compatibility layer for live migrations")]
pub struct Args {
    /// Document store configuration
    #[command(flatten)]
    pub store: StoreArgs,

    /// Migration mode: true/false, or a named mode such as PRODUCTION_MIGRATING
    #[arg(long, env = "MIGRATION_MODE")]
    pub migration_mode: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Create collection indexes before running the command
    #[arg(long, env = "ENSURE_INDEXES", default_value = "false")]
    pub ensure_indexes: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// MongoDB connection configuration
#[derive(Parser, Debug, Clone)]
pub struct StoreArgs {
    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "tradeya")]
    pub mongodb_db: String,

    /// Collection holding trade records
    #[arg(long, env = "TRADES_COLLECTION", default_value = TRADE_COLLECTION)]
    pub trades_collection: String,

    /// Collection holding conversation records
    #[arg(long, env = "CONVERSATIONS_COLLECTION", default_value = CONVERSATION_COLLECTION)]
    pub conversations_collection: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the registry status snapshot
    Status,

    /// Probe both compatibility services; exits non-zero on failure
    Validate,

    /// List normalized trades
    Trades {
        #[arg(long)]
        creator: Option<String>,

        #[arg(long)]
        participant: Option<String>,

        /// Skill on either side (repeatable)
        #[arg(long = "skill")]
        skills: Vec<String>,

        /// Offered skill (repeatable)
        #[arg(long = "offered")]
        offered: Vec<String>,

        /// Wanted skill (repeatable)
        #[arg(long = "wanted")]
        wanted: Vec<String>,

        /// Free-text search over title, description, category and skills
        #[arg(long)]
        search: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// List a user's normalized conversations
    Conversations {
        #[arg(long)]
        user: String,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

impl Args {
    pub fn migration_mode_setting(&self) -> MigrationModeSetting {
        MigrationModeSetting::parse(self.migration_mode.as_deref())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store.mongodb_db.trim().is_empty() {
            return Err("MONGODB_DB must not be empty".to_string());
        }
        if self.store.trades_collection.trim().is_empty()
            || self.store.conversations_collection.trim().is_empty()
        {
            return Err("Collection names must not be empty".to_string());
        }
        if self.store.trades_collection == self.store.conversations_collection {
            return Err("Trades and conversations must use different collections".to_string());
        }
        match &self.command {
            Command::Trades { limit: 0, .. } | Command::Conversations { limit: 0, .. } => {
                Err("--limit must be greater than zero".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Migration mode as read from configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationModeSetting {
    pub enabled: bool,
    /// Named mode kept for status reporting
    pub label: Option<String>,
}

impl MigrationModeSetting {
    /// Boolean-like values toggle the mode; any other non-empty value turns it
    /// on and is kept verbatim as the label.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Self::default();
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Self {
                enabled: true,
                label: None,
            },
            "false" | "0" | "no" | "off" => Self::default(),
            _ => Self {
                enabled: true,
                label: Some(raw.to_string()),
            },
        }
    }
}
