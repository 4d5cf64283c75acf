//! Compatibility service integration tests
//!
//! Trades and conversations of both schema generations are seeded into the
//! in-memory store and read back through the registry's services.

use std::sync::Arc;

use bson::{doc, DateTime, Document};
use tokio_test::{assert_err, assert_ok};

use trade_migration::compat::{
    NewConversation, NewTrade, SchemaVersion, TradeFilters, TradeStatus,
};
use trade_migration::db::schemas::Skill;
use trade_migration::db::{DocumentStore, MemoryStore, QueryClause};
use trade_migration::registry::{CollectionNames, MigrationRegistry};
use trade_migration::{CompatError, StoreError};

fn at(millis: i64) -> DateTime {
    DateTime::from_millis(millis)
}

fn legacy_trade(id: &str, creator: &str, created: i64) -> Document {
    doc! {
        "_id": id,
        "title": "Guitar lessons for a logo",
        "creatorId": creator,
        "status": "open",
        "offeredSkills": ["Guitar"],
        "requestedSkills": "Logo Design, Branding",
        "createdAt": at(created),
    }
}

fn current_trade(id: &str, creator: &str, participant: &str, created: i64) -> Document {
    doc! {
        "id": id,
        "title": "Sourdough for bike repair",
        "creatorId": creator,
        "participantId": participant,
        "status": "in-progress",
        "visibility": "public",
        "skillsOffered": [ { "name": "Baking", "level": "expert" } ],
        "skillsWanted": [ { "name": "Bike Repair" } ],
        "skillsIndex": ["baking", "bike repair"],
        "schemaVersion": "2.0",
        "createdAt": at(created),
    }
}

async fn setup(records: Vec<(&str, Document)>) -> (Arc<MemoryStore>, MigrationRegistry) {
    let store = Arc::new(MemoryStore::new());
    for (collection, record) in records {
        store.insert(collection, record).await.unwrap();
    }
    let registry = MigrationRegistry::new();
    registry.initialize(store.clone()).unwrap();
    (store, registry)
}

// =============================================================================
// Trades
// =============================================================================

#[tokio::test]
async fn test_query_trades_reads_both_generations() {
    let (_, registry) = setup(vec![
        ("trades", legacy_trade("t1", "u1", 1_000)),
        ("trades", current_trade("t2", "u2", "u1", 2_000)),
    ])
    .await;

    let trades = assert_ok!(registry.trades());
    let results = assert_ok!(trades.query_trades(Vec::new(), 10).await);

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, "t2");
    assert_eq!(results[0].schema_version, SchemaVersion::Current);
    assert_eq!(results[0].status, TradeStatus::InProgress);
    assert_eq!(results[0].skills_offered, vec![Skill::with_level("Baking", "expert")]);

    assert_eq!(results[1].id, "t1");
    assert_eq!(results[1].schema_version, SchemaVersion::Legacy);
    assert_eq!(
        results[1].skills_wanted,
        vec![Skill::new("Logo Design"), Skill::new("Branding")]
    );
    assert!(results.iter().all(|t| t.compatibility_layer_used));
}

#[tokio::test]
async fn test_store_failure_reaches_caller_unchanged() {
    let (store, registry) = setup(vec![("trades", legacy_trade("t1", "u1", 1_000))]).await;
    store
        .fail_with(StoreError::Query("deadline exceeded".into()))
        .await;

    let trades = assert_ok!(registry.trades());
    let err = assert_err!(trades.query_trades(Vec::new(), 10).await);
    match &err {
        CompatError::Store(StoreError::Query(message)) => assert_eq!(message, "deadline exceeded"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_retryable());

    store.clear_failure().await;
    assert_eq!(assert_ok!(trades.query_trades(Vec::new(), 10).await).len(), 1);
}

#[tokio::test]
async fn test_malformed_record_fails_whole_batch() {
    let (_, registry) = setup(vec![
        ("trades", legacy_trade("t1", "u1", 1_000)),
        ("trades", doc! { "_id": "t2", "title": "orphan", "createdAt": at(2_000) }),
    ])
    .await;

    let err = assert_err!(assert_ok!(registry.trades()).query_trades(Vec::new(), 10).await);
    match err {
        CompatError::Validation { id, .. } => assert_eq!(id, "t2"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_query_trades_applies_clauses() {
    let (_, registry) = setup(vec![
        ("trades", legacy_trade("t1", "u1", 1_000)),
        ("trades", current_trade("t2", "u2", "u1", 2_000)),
        ("trades", current_trade("t3", "u3", "u4", 3_000)),
    ])
    .await;
    let trades = assert_ok!(registry.trades());

    let by_creator = assert_ok!(
        trades
            .query_trades(vec![QueryClause::eq("creatorId", "u3")], 10)
            .await
    );
    assert_eq!(by_creator.len(), 1);
    assert_eq!(by_creator[0].id, "t3");

    let limited = assert_ok!(trades.query_trades(Vec::new(), 2).await);
    assert_eq!(
        limited.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec!["t3", "t2"]
    );
}

#[tokio::test]
async fn test_get_trade_and_user_trades() {
    let (_, registry) = setup(vec![
        ("trades", legacy_trade("t1", "u1", 1_000)),
        ("trades", current_trade("t2", "u2", "u1", 2_000)),
        ("trades", current_trade("t3", "u3", "u4", 3_000)),
    ])
    .await;
    let trades = assert_ok!(registry.trades());

    let found = assert_ok!(trades.get_trade("t2").await).unwrap();
    assert_eq!(found.creator_id, "u2");
    assert!(assert_ok!(trades.get_trade("missing").await).is_none());

    let mine = assert_ok!(trades.get_user_trades("u1", 10).await);
    assert_eq!(
        mine.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec!["t2", "t1"]
    );
}

#[tokio::test]
async fn test_search_trades_respects_visibility_and_scopes() {
    let mut hidden = current_trade("t3", "u3", "u4", 3_000);
    hidden.insert("visibility", "private");
    let (_, registry) = setup(vec![
        ("trades", legacy_trade("t1", "u1", 1_000)),
        ("trades", current_trade("t2", "u2", "u1", 2_000)),
        ("trades", hidden),
    ])
    .await;
    let trades = assert_ok!(registry.trades());

    let all = assert_ok!(trades.search_trades(&TradeFilters::default(), None, 10).await);
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|t| t.id != "t3"));

    let wanted_branding = TradeFilters {
        skills_wanted: Some(vec!["branding".into()]),
        ..Default::default()
    };
    let results = assert_ok!(trades.search_trades(&wanted_branding, None, 10).await);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "t1");

    let offered_branding = TradeFilters {
        skills_offered: Some(vec!["branding".into()]),
        ..Default::default()
    };
    assert!(assert_ok!(trades.search_trades(&offered_branding, None, 10).await).is_empty());

    let text = assert_ok!(
        trades
            .search_trades(&TradeFilters::default(), Some("SOURDOUGH"), 10)
            .await
    );
    assert_eq!(text.len(), 1);
    assert_eq!(text[0].id, "t2");
}

#[tokio::test]
async fn test_create_trade_follows_migration_mode() {
    let (store, registry) = setup(Vec::new()).await;
    let trades = assert_ok!(registry.trades());
    let listing = || NewTrade {
        title: "Spanish for photography".into(),
        creator_id: "u7".into(),
        skills_offered: vec![Skill::new("Spanish")],
        skills_wanted: vec![Skill::with_level("Photography", "intermediate")],
        ..Default::default()
    };

    let legacy_id = assert_ok!(trades.create_trade(listing()).await);
    let stored = store.get("trades", &legacy_id).await.unwrap().unwrap();
    assert!(stored.contains_key("offeredSkills"));
    assert!(!stored.contains_key("skillsOffered"));
    assert!(!stored.contains_key("schemaVersion"));

    registry.enable_migration_mode(Some("PRODUCTION_MIGRATING"));
    let current_id = assert_ok!(trades.create_trade(listing()).await);
    let stored = store.get("trades", &current_id).await.unwrap().unwrap();
    assert!(stored.contains_key("skillsOffered"));
    assert_eq!(stored.get_str("schemaVersion").unwrap(), "2.0");

    let legacy = assert_ok!(trades.get_trade(&legacy_id).await).unwrap();
    let current = assert_ok!(trades.get_trade(&current_id).await).unwrap();
    assert_eq!(legacy.schema_version, SchemaVersion::Legacy);
    assert_eq!(current.schema_version, SchemaVersion::Current);
    assert_eq!(legacy.skills_index, current.skills_index);
    assert_eq!(legacy.status, TradeStatus::Open);
    assert!(current.is_visible_to_public());
}

#[tokio::test]
async fn test_create_trade_rejects_missing_creator() {
    let (store, registry) = setup(Vec::new()).await;
    let trades = assert_ok!(registry.trades());
    let err = assert_err!(
        trades
            .create_trade(NewTrade {
                title: "No owner".into(),
                ..Default::default()
            })
            .await
    );
    assert_eq!(err.user_message(), "This record could not be loaded");
    assert_eq!(store.count("trades").await, 0);
}

#[tokio::test]
async fn test_zero_limit_returns_nothing() {
    let (_, registry) = setup(vec![
        ("trades", legacy_trade("t1", "u1", 1_000)),
        (
            "conversations",
            doc! { "_id": "c1", "participantIds": ["u1", "u2"] },
        ),
    ])
    .await;
    let trades = assert_ok!(registry.trades());
    let chat = assert_ok!(registry.chat());

    assert!(assert_ok!(trades.query_trades(Vec::new(), 0).await).is_empty());
    assert!(assert_ok!(trades.get_user_trades("u1", 0).await).is_empty());
    assert!(assert_ok!(
        trades
            .search_trades(&TradeFilters::default(), None, 0)
            .await
    )
    .is_empty());
    assert!(assert_ok!(chat.query_conversations(Vec::new(), 0).await).is_empty());
    assert!(assert_ok!(chat.get_user_conversations("u1", 0).await).is_empty());

    let one = assert_ok!(trades.search_trades(&TradeFilters::default(), None, 1).await);
    assert_eq!(one.len(), 1);
}

#[tokio::test]
async fn test_query_trades_orders_mixed_timestamp_types() {
    let mut dated = legacy_trade("t1", "u1", 1_000);
    dated.insert("createdAt", at(1_000));
    let mut text = legacy_trade("t2", "u1", 0);
    text.insert("createdAt", "1970-01-01T00:00:02Z");
    let mut millis = legacy_trade("t3", "u1", 0);
    millis.insert("createdAt", 3_000i64);
    let mut undated = legacy_trade("t4", "u1", 0);
    undated.remove("createdAt");

    let (_, registry) = setup(vec![
        ("trades", undated),
        ("trades", dated),
        ("trades", text),
        ("trades", millis),
    ])
    .await;

    let results = assert_ok!(assert_ok!(registry.trades()).query_trades(Vec::new(), 10).await);
    assert_eq!(
        results.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        vec!["t3", "t2", "t1", "t4"]
    );
}

#[tokio::test]
async fn test_validation_errors_name_configured_collection() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert("trades_v2", doc! { "_id": "t1", "title": "no creator" })
        .await
        .unwrap();
    store
        .insert("conversations_v2", doc! { "_id": "c1", "participantIds": [] })
        .await
        .unwrap();

    let registry = MigrationRegistry::with_collections(CollectionNames {
        trades: "trades_v2".into(),
        conversations: "conversations_v2".into(),
    });
    assert_ok!(registry.initialize(store));

    let err = assert_err!(assert_ok!(registry.trades()).get_trade("t1").await);
    match err {
        CompatError::Validation { collection, id, .. } => {
            assert_eq!(collection, "trades_v2");
            assert_eq!(id, "t1");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let err = assert_err!(assert_ok!(registry.chat()).get_conversation("c1").await);
    assert!(err.to_string().contains("conversations_v2"), "{}", err);
}

#[tokio::test]
async fn test_overflowing_timestamp_does_not_fail_reads() {
    let mut record = current_trade("t1", "u1", "u2", 0);
    record.insert("createdAt", doc! { "seconds": i64::MAX / 10 });
    let (_, registry) = setup(vec![("trades", record)]).await;

    let trade = assert_ok!(assert_ok!(registry.trades()).get_trade("t1").await).unwrap();
    assert!(trade.created_at.is_none());
}

// =============================================================================
// Conversations
// =============================================================================

#[tokio::test]
async fn test_legacy_conversation_ordered_by_linked_trade() {
    let (_, registry) = setup(vec![
        ("trades", current_trade("t1", "u1", "u2", 1_000)),
        (
            "conversations",
            doc! {
                "_id": "c1",
                "participantIds": bson::Bson::Null,
                "legacyParticipants": ["u2", "u1"],
                "tradeId": "t1",
            },
        ),
    ])
    .await;

    let chat = assert_ok!(registry.chat());
    let conversation = assert_ok!(chat.get_conversation("c1").await).unwrap();
    assert_eq!(conversation.participant_ids, vec!["u1", "u2"]);
    assert_eq!(conversation.trade_id.as_deref(), Some("t1"));
    assert_eq!(conversation.schema_version, SchemaVersion::Legacy);
}

#[tokio::test]
async fn test_unreadable_linked_trade_keeps_stored_order() {
    let (_, registry) = setup(vec![
        ("trades", doc! { "_id": "t1", "title": "no creator" }),
        (
            "conversations",
            doc! { "_id": "c1", "participantIds": ["u2", "u1"], "tradeId": "t1" },
        ),
        (
            "conversations",
            doc! { "_id": "c2", "participantIds": ["u3", "u1"], "tradeId": "gone" },
        ),
    ])
    .await;

    let chat = assert_ok!(registry.chat());
    let c1 = assert_ok!(chat.get_conversation("c1").await).unwrap();
    assert_eq!(c1.participant_ids, vec!["u2", "u1"]);
    let c2 = assert_ok!(chat.get_conversation("c2").await).unwrap();
    assert_eq!(c2.participant_ids, vec!["u3", "u1"]);
}

#[tokio::test]
async fn test_user_conversations_across_participant_shapes() {
    let (_, registry) = setup(vec![
        (
            "conversations",
            doc! { "_id": "c1", "participantIds": ["u1", "u2"], "updatedAt": at(1_000) },
        ),
        (
            "conversations",
            doc! { "_id": "c2", "participants": [ { "id": "u3" }, { "id": "u1" } ], "updatedAt": at(3_000) },
        ),
        (
            "conversations",
            doc! { "_id": "c3", "legacyParticipants": ["u1", "u4"], "updatedAt": at(2_000) },
        ),
        (
            "conversations",
            doc! { "_id": "c4", "participants": ["u1", "u5"], "updatedAt": at(4_000) },
        ),
        (
            "conversations",
            doc! { "_id": "c5", "participantIds": ["u8", "u9"], "updatedAt": at(5_000) },
        ),
    ])
    .await;

    let chat = assert_ok!(registry.chat());
    let conversations = assert_ok!(chat.get_user_conversations("u1", 10).await);
    assert_eq!(
        conversations.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        vec!["c4", "c2", "c3", "c1"]
    );

    let first_two = assert_ok!(chat.get_user_conversations("u1", 2).await);
    assert_eq!(first_two.len(), 2);
}

#[tokio::test]
async fn test_create_conversation_follows_migration_mode() {
    let (store, registry) = setup(Vec::new()).await;
    let chat = assert_ok!(registry.chat());
    let conversation = || NewConversation {
        participant_ids: vec!["u1".into(), "u2".into(), "u1".into()],
        trade_id: Some("t1".into()),
        ..Default::default()
    };

    let legacy_id = assert_ok!(chat.create_conversation(conversation()).await);
    let stored = store.get("conversations", &legacy_id).await.unwrap().unwrap();
    assert!(stored.contains_key("participants"));
    assert!(!stored.contains_key("participantIds"));

    registry.enable_migration_mode(None);
    let current_id = assert_ok!(chat.create_conversation(conversation()).await);
    let stored = store.get("conversations", &current_id).await.unwrap().unwrap();
    assert_eq!(stored.get_array("participantIds").unwrap().len(), 2);

    for id in [legacy_id, current_id] {
        let read = assert_ok!(chat.get_conversation(&id).await).unwrap();
        assert_eq!(read.participant_ids, vec!["u1", "u2"]);
    }

    let err = assert_err!(chat.create_conversation(NewConversation::default()).await);
    assert!(matches!(err, CompatError::Validation { .. }));
}

#[tokio::test]
async fn test_chat_store_failure_propagates() {
    let (store, registry) = setup(vec![(
        "conversations",
        doc! { "_id": "c1", "participantIds": ["u1"] },
    )])
    .await;
    store
        .fail_with(StoreError::Unavailable("primary stepped down".into()))
        .await;

    let chat = assert_ok!(registry.chat());
    let err = assert_err!(chat.get_user_conversations("u1", 10).await);
    assert!(matches!(err, CompatError::Store(StoreError::Unavailable(_))));

    // The registry itself is unaffected
    assert!(registry.is_initialized());
    assert_ok!(registry.trades());
}

#[tokio::test]
async fn test_user_conversations_surface_records_without_id() {
    let (_, registry) = setup(vec![
        ("conversations", doc! { "_id": 7, "participantIds": ["u1", "u2"] }),
        ("conversations", doc! { "_id": 8, "participantIds": ["u1", "u3"] }),
    ])
    .await;

    let chat = assert_ok!(registry.chat());
    let err = assert_err!(chat.get_user_conversations("u1", 10).await);
    match err {
        CompatError::Validation { reason, .. } => assert_eq!(reason, "missing id"),
        other => panic!("unexpected error: {:?}", other),
    }
}
