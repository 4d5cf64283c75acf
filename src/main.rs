//! trade-migration - operator CLI for the trade/chat compatibility layer
//!
//! Reports registry status, probes the services, and lists normalized
//! records straight from MongoDB.

use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trade_migration::{
    compat::TradeFilters,
    config::{Args, Command},
    db::{
        schemas::{ConversationDoc, TradeDoc},
        DocumentStore, MongoStore,
    },
    registry::{CollectionNames, MigrationRegistry},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Logs go to stderr so command output stays parseable
    let log_level = args.log_level.clone();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("trade_migration={},info", log_level).into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            args.log_json
                .then(|| fmt::layer().json().with_writer(std::io::stderr)),
        )
        .with(
            (!args.log_json).then(|| fmt::layer().with_writer(std::io::stderr)),
        )
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let mode = args.migration_mode_setting();

    info!("======================================");
    info!("  trade-migration v{}", env!("CARGO_PKG_VERSION"));
    info!("  commit {} built {}", env!("GIT_COMMIT_SHORT"), env!("BUILD_TIMESTAMP"));
    info!("======================================");
    info!("MongoDB: {} / {}", args.store.mongodb_uri, args.store.mongodb_db);
    info!(
        "Collections: trades={} conversations={}",
        args.store.trades_collection, args.store.conversations_collection
    );
    info!(
        "Migration mode: {}",
        match (mode.enabled, mode.label.as_deref()) {
            (true, Some(label)) => label,
            (true, None) => "ON",
            (false, _) => "OFF",
        }
    );
    info!("======================================");

    let mongo = match MongoStore::connect(&args.store.mongodb_uri, &args.store.mongodb_db).await {
        Ok(store) => {
            info!("MongoDB connected successfully");
            store
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    if args.ensure_indexes {
        mongo
            .ensure_indexes::<TradeDoc>(&args.store.trades_collection)
            .await?;
        mongo
            .ensure_indexes::<ConversationDoc>(&args.store.conversations_collection)
            .await?;
    }

    let registry = MigrationRegistry::with_collections(CollectionNames {
        trades: args.store.trades_collection.clone(),
        conversations: args.store.conversations_collection.clone(),
    });
    let store: Arc<dyn DocumentStore> = Arc::new(mongo);
    registry.initialize(store)?;
    registry.enable_migration_mode_from_config(&mode);

    match args.command {
        Command::Status => {
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct StatusReport {
                version: &'static str,
                commit: &'static str,
                built: &'static str,
                #[serde(flatten)]
                registry: trade_migration::RegistryStatus,
            }
            print_json(&StatusReport {
                version: env!("CARGO_PKG_VERSION"),
                commit: env!("GIT_COMMIT_SHORT"),
                built: env!("BUILD_TIMESTAMP"),
                registry: registry.get_status(),
            })?;
        }
        Command::Validate => {
            let report = registry.validate_services();
            print_json(&report)?;
            if !report.is_healthy() {
                std::process::exit(2);
            }
        }
        Command::Trades {
            creator,
            participant,
            skills,
            offered,
            wanted,
            search,
            limit,
        } => {
            let trades = registry.trades()?;
            let non_empty = |list: Vec<String>| (!list.is_empty()).then_some(list);
            let criteria = TradeFilters {
                skills: non_empty(skills),
                skills_offered: non_empty(offered),
                skills_wanted: non_empty(wanted),
                creator_id: creator,
                participant_id: participant,
            };
            let results = trades
                .search_trades(&criteria, search.as_deref(), limit)
                .await?;
            info!(count = results.len(), "Trades listed");
            print_json(&results)?;
        }
        Command::Conversations { user, limit } => {
            let conversations = registry
                .chat()?
                .get_user_conversations(&user, limit)
                .await?;
            info!(count = conversations.len(), user = %user, "Conversations listed");
            print_json(&conversations)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
