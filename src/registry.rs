//! Migration Registry
//!
//! Owns the two compatibility services and the migration mode flag. One
//! registry is built by the composition root and passed by reference to
//! whatever needs a service.
//!
//! ## States
//!
//! ```text
//! Uninitialized ──initialize──▶ Initialized(mode off) ◀──enable/disable──▶ Initialized(mode on)
//!       ▲                                   │
//!       └───────────────reset───────────────┘
//! ```
//!
//! Migration mode lives in a shared [`MigrationModeState`] that the services
//! consult at call time, so toggling it never rebuilds a service and works in
//! any state.

use std::sync::{Arc, PoisonError, RwLock};

use bson::doc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compat::{ChatCompatibilityService, TradeCompatibilityService};
use crate::config::MigrationModeSetting;
use crate::db::schemas::{CONVERSATION_COLLECTION, TRADE_COLLECTION};
use crate::db::DocumentStore;
use crate::error::{CompatError, Result};

// =============================================================================
// Migration mode
// =============================================================================

/// Point-in-time view of the migration mode
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModeSnapshot {
    pub enabled: bool,
    pub label: Option<String>,
}

/// Shared migration mode flag. Last write wins.
#[derive(Debug, Default)]
pub struct MigrationModeState {
    inner: RwLock<ModeSnapshot>,
}

impl MigrationModeState {
    pub fn is_enabled(&self) -> bool {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).enabled
    }

    pub fn label(&self) -> Option<String> {
        self.snapshot().label
    }

    pub fn snapshot(&self) -> ModeSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, enabled: bool, label: Option<String>) {
        let mut mode = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        mode.enabled = enabled;
        mode.label = if enabled { label } else { None };
    }
}

// =============================================================================
// Status and validation reports
// =============================================================================

/// Which services the registry currently holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceFlags {
    pub trades: bool,
    pub chat: bool,
}

/// Health snapshot for readiness checks and admin views
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub initialized: bool,
    pub migration_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode_label: Option<String>,
    pub services: ServiceFlags,
}

/// Outcome of probing both services with synthetic records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceValidation {
    pub trades: bool,
    pub chat: bool,
    pub errors: Vec<String>,
}

impl ServiceValidation {
    pub fn is_healthy(&self) -> bool {
        self.trades && self.chat && self.errors.is_empty()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Collections the services read and write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNames {
    pub trades: String,
    pub conversations: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            trades: TRADE_COLLECTION.to_string(),
            conversations: CONVERSATION_COLLECTION.to_string(),
        }
    }
}

struct RegistryServices {
    trades: Arc<TradeCompatibilityService>,
    chat: Arc<ChatCompatibilityService>,
    backend: &'static str,
}

pub struct MigrationRegistry {
    services: RwLock<Option<RegistryServices>>,
    mode: Arc<MigrationModeState>,
    collections: CollectionNames,
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::with_collections(CollectionNames::default())
    }

    pub fn with_collections(collections: CollectionNames) -> Self {
        Self {
            services: RwLock::new(None),
            mode: Arc::new(MigrationModeState::default()),
            collections,
        }
    }

    pub fn collections(&self) -> &CollectionNames {
        &self.collections
    }

    /// Build both services over `store`.
    ///
    /// Calling again once initialized is a no-op: the existing services and
    /// migration mode are kept. An unusable handle fails with
    /// [`CompatError::Initialization`] and leaves the registry uninitialized.
    pub fn initialize(&self, store: Arc<dyn DocumentStore>) -> Result<()> {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = services.as_ref() {
            debug!(backend = existing.backend, "Registry already initialized");
            return Ok(());
        }

        store.check_handle().map_err(|e| {
            warn!(backend = store.backend(), error = %e, "Rejected store handle");
            CompatError::Initialization(e.to_string())
        })?;

        let backend = store.backend();
        let trades = Arc::new(TradeCompatibilityService::new(
            store.clone(),
            self.mode.clone(),
            self.collections.trades.clone(),
        ));
        let chat = Arc::new(ChatCompatibilityService::new(
            store,
            self.mode.clone(),
            self.collections.conversations.clone(),
            self.collections.trades.clone(),
        ));
        *services = Some(RegistryServices {
            trades,
            chat,
            backend,
        });

        info!(
            backend,
            trades = %self.collections.trades,
            conversations = %self.collections.conversations,
            "Migration registry initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The trade service. Same instance on every call until [`reset`](Self::reset).
    pub fn trades(&self) -> Result<Arc<TradeCompatibilityService>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.trades.clone())
            .ok_or_else(|| {
                CompatError::NotInitialized(
                    "trade service requested before initialize()".to_string(),
                )
            })
    }

    /// The chat service. Same instance on every call until [`reset`](Self::reset).
    pub fn chat(&self) -> Result<Arc<ChatCompatibilityService>> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.chat.clone())
            .ok_or_else(|| {
                CompatError::NotInitialized(
                    "chat service requested before initialize()".to_string(),
                )
            })
    }

    /// Turn on dual-schema writes. The label is reported in status only.
    pub fn enable_migration_mode(&self, label: Option<&str>) {
        let label = label.map(str::trim).filter(|l| !l.is_empty()).map(String::from);
        info!(label = label.as_deref().unwrap_or("-"), "Migration mode enabled");
        self.mode.set(true, label);
    }

    pub fn disable_migration_mode(&self) {
        info!("Migration mode disabled");
        self.mode.set(false, None);
    }

    /// Apply the mode read from configuration at startup
    pub fn enable_migration_mode_from_config(&self, setting: &MigrationModeSetting) {
        if setting.enabled {
            self.enable_migration_mode(setting.label.as_deref());
        } else {
            self.disable_migration_mode();
        }
    }

    pub fn is_migration_mode(&self) -> bool {
        self.mode.is_enabled()
    }

    pub fn migration_mode_label(&self) -> Option<String> {
        self.mode.label()
    }

    /// Shared mode handle the services read from
    pub fn mode(&self) -> Arc<MigrationModeState> {
        self.mode.clone()
    }

    /// Back to the pristine uninitialized state: services dropped, mode off.
    /// Callers still holding a service `Arc` keep a working instance.
    pub fn reset(&self) {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *services = None;
        self.mode.set(false, None);
        info!("Migration registry reset");
    }

    /// Run each service's normalizer over a synthetic record.
    ///
    /// Errors are collected into the report instead of returned. The chat
    /// probe is linked to the trade probe so the participant order contract
    /// between the two services is checked as well.
    pub fn validate_services(&self) -> ServiceValidation {
        let mut report = ServiceValidation::default();

        let (trades, chat) = match (self.trades(), self.chat()) {
            (Ok(trades), Ok(chat)) => (trades, chat),
            (Err(e), _) | (_, Err(e)) => {
                report.errors.push(e.to_string());
                return report;
            }
        };

        let trade_probe = doc! {
            "id": "probe-trade",
            "creatorId": "probe-creator",
            "participantId": "probe-participant",
            "offeredSkills": "Probe",
            "skillsWanted": [ { "name": "Check" } ],
        };
        let linked = match trades.normalize_trade_data(&trade_probe) {
            Ok(trade) if trade.skills_index.len() == 2 => {
                report.trades = true;
                Some(trade)
            }
            Ok(trade) => {
                report
                    .errors
                    .push(format!("trades: expected 2 skills, got {:?}", trade.skills_index));
                None
            }
            Err(e) => {
                report.errors.push(format!("trades: {}", e));
                None
            }
        };

        let chat_probe = doc! {
            "id": "probe-conversation",
            "legacyParticipants": ["probe-participant", "probe-creator"],
            "tradeId": "probe-trade",
        };
        match chat.normalize_conversation_data(&chat_probe, linked.as_ref()) {
            Ok(conversation) => {
                report.chat = true;
                if let Some(trade) = &linked {
                    let expected = [Some(&trade.creator_id), trade.participant_id.as_ref()];
                    let actual = [
                        conversation.participant_ids.first(),
                        conversation.participant_ids.get(1),
                    ];
                    if expected != actual {
                        report.errors.push(format!(
                            "participant order {:?} does not follow linked trade",
                            conversation.participant_ids
                        ));
                    }
                }
            }
            Err(e) => report.errors.push(format!("chat: {}", e)),
        }

        if report.is_healthy() {
            debug!("Service validation passed");
        } else {
            warn!(errors = ?report.errors, "Service validation failed");
        }
        report
    }

    /// Side-effect free; safe in any state
    pub fn get_status(&self) -> RegistryStatus {
        let services = self.services.read().unwrap_or_else(PoisonError::into_inner);
        let mode = self.mode.snapshot();
        RegistryStatus {
            initialized: services.is_some(),
            migration_mode: mode.enabled,
            mode_label: mode.label,
            services: ServiceFlags {
                trades: services.is_some(),
                chat: services.is_some(),
            },
        }
    }
}
