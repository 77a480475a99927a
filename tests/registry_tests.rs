mod common;

use battleship_sessions::{
    Action, BroadcastBus, Event, FinishReason, MemorySessionStore, RulesConfig, SessionError, SessionRegistry,
    Side, SubscriptionError,
};
use common::{place, row, test_config};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

async fn wait_archived(registry: &SessionRegistry, id: &String) -> battleship_sessions::GameSummary {
    for _ in 0..100 {
        if let Ok(summary) = registry.summary(id).await {
            if registry.active_count() == 0 {
                return summary;
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("session {} was never archived", id);
}

#[tokio::test]
async fn create_list_join() {
    let registry = SessionRegistry::in_memory(test_config());
    let b = registry.create("bob", "beta", RulesConfig::default());
    let a = registry.create("alice", "alpha", RulesConfig::default());
    assert_ne!(a.session_id, b.session_id);

    let names: Vec<String> = registry.list_open().into_iter().map(|i| i.name).collect();
    assert_eq!(names, vec!["alpha", "beta"]);

    let handle = registry.join(&a.session_id, "carol").await.unwrap();
    assert_eq!(handle.players(), &["alice".to_string(), "carol".to_string()]);
    assert_eq!(handle.side_of("carol"), Some(Side::B));
    assert_eq!(handle.version().await, 0);
    assert_eq!(registry.active_count(), 1);
    assert_eq!(registry.list_open(), vec![b]);

    // The registry hands out the live handle.
    let same = registry.get(&a.session_id).await.unwrap();
    assert!(Arc::ptr_eq(&handle, &same));
}

#[tokio::test]
async fn join_errors() {
    let registry = SessionRegistry::in_memory(test_config());
    let info = registry.create("alice", "g", RulesConfig::default());

    assert!(matches!(
        registry.join(&info.session_id, "alice").await,
        Err(SessionError::NotAPlayer(_))
    ));
    // Still open after the refused self-join.
    assert_eq!(registry.list_open().len(), 1);

    registry.join(&info.session_id, "bob").await.unwrap();
    assert!(matches!(
        registry.join(&info.session_id, "carol").await,
        Err(SessionError::SessionFull(_))
    ));
    assert!(matches!(
        registry.join(&"nope".to_string(), "carol").await,
        Err(SessionError::SessionNotFound(_))
    ));
    assert!(matches!(
        registry.get(&"nope".to_string()).await,
        Err(SessionError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn join_announces_game_started() {
    let registry = SessionRegistry::in_memory(test_config());
    let info = registry.create("alice", "g", RulesConfig::default());
    let mut sub = registry.bus().subscribe(&info.session_id).await.unwrap();
    registry.join(&info.session_id, "bob").await.unwrap();

    let delta = sub.recv().await.unwrap();
    assert_eq!(delta.version, 0);
    match &delta.events[..] {
        [Event::GameStarted { players, first, .. }] => {
            assert_eq!(players, &["alice".to_string(), "bob".to_string()]);
            assert_eq!(*first, Side::A);
        }
        other => panic!("unexpected events {:?}", other),
    }
}

#[tokio::test]
async fn another_registry_adopts_from_the_shared_store() {
    let store = Arc::new(MemorySessionStore::new());
    let bus = Arc::new(BroadcastBus::new(64));
    let first = SessionRegistry::new(store.clone(), bus.clone(), test_config());
    let second = SessionRegistry::new(store, bus, test_config());

    let info = first.create("alice", "g", RulesConfig::default());
    let handle = first.join(&info.session_id, "bob").await.unwrap();
    handle
        .submit_action("alice", place("carrier", row(0, 5)))
        .await
        .unwrap();

    assert_eq!(second.active_count(), 0);
    let adopted = second.get(&info.session_id).await.unwrap();
    assert_eq!(second.active_count(), 1);
    assert_eq!(adopted.version().await, 1);
    assert!(!Arc::ptr_eq(&handle, &adopted));

    // Both owners keep writing and the store stays consistent.
    adopted
        .submit_action("bob", place("carrier", row(0, 5)))
        .await
        .unwrap();
    let accepted = handle
        .submit_action("alice", place("destroyer", row(9, 2)))
        .await
        .unwrap();
    assert_eq!(accepted.delta.version, 3);
}

#[tokio::test]
async fn finished_sessions_are_archived() {
    let registry = SessionRegistry::in_memory(test_config());
    let info = registry.create("alice", "g", RulesConfig::default());
    let id = info.session_id.clone();
    let mut sub = registry.bus().subscribe(&id).await.unwrap();
    let handle = registry.join(&id, "bob").await.unwrap();

    handle.submit_action("bob", Action::Surrender).await.unwrap();
    let summary = wait_archived(&registry, &id).await;
    assert_eq!(summary.winner, Some(Side::A));
    assert_eq!(summary.reason, Some(FinishReason::Surrender));

    assert_eq!(sub.recv().await.unwrap().version, 0);
    assert!(sub.recv().await.unwrap().finished().is_some());
    assert_eq!(sub.recv().await.unwrap_err(), SubscriptionError::Closed);

    // Still resumable until the finished TTL passes, but not re-registered.
    let late = registry.get(&id).await.unwrap();
    assert!(late.finished().is_cancelled());
    assert_eq!(late.resume("alice").await.unwrap().summary, summary);
    assert_eq!(registry.active_count(), 0);

    assert_eq!(registry.archive(&id).await, None);
}

#[tokio::test(start_paused = true)]
async fn finished_snapshot_expires_after_ttl() {
    let mut config = test_config();
    config.finished_ttl = Duration::from_secs(30);
    let registry = SessionRegistry::in_memory(config);
    let info = registry.create("alice", "g", RulesConfig::default());
    let handle = registry.join(&info.session_id, "bob").await.unwrap();
    handle.submit_action("alice", Action::Surrender).await.unwrap();
    wait_archived(&registry, &info.session_id).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(matches!(
        registry.get(&info.session_id).await,
        Err(SessionError::SessionNotFound(_))
    ));
    // The summary outlives the snapshot.
    assert!(registry.summary(&info.session_id).await.is_ok());
}

#[tokio::test]
async fn late_subscribers_to_a_finished_session_leave_no_topic_behind() {
    let bus = Arc::new(BroadcastBus::new(64));
    let registry = SessionRegistry::new(Arc::new(MemorySessionStore::new()), bus.clone(), test_config());
    let info = registry.create("alice", "g", RulesConfig::default());
    let handle = registry.join(&info.session_id, "bob").await.unwrap();
    handle.submit_action("alice", Action::Surrender).await.unwrap();
    wait_archived(&registry, &info.session_id).await;
    for _ in 0..100 {
        if bus.topic_count() == 0 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(bus.topic_count(), 0);

    let late = registry.get(&info.session_id).await.unwrap();
    let mut sub = late.subscribe().await.unwrap();
    assert_eq!(sub.recv().await.unwrap_err(), SubscriptionError::Closed);
    assert_eq!(bus.topic_count(), 0);
    // The snapshot is still there to read.
    assert_eq!(late.resume("bob").await.unwrap().summary.winner, Some(Side::B));
}

#[tokio::test]
async fn host_can_withdraw_an_open_session() {
    let bus = Arc::new(BroadcastBus::new(64));
    let registry = SessionRegistry::new(Arc::new(MemorySessionStore::new()), bus.clone(), test_config());
    let info = registry.create("alice", "g", RulesConfig::default());
    let mut sub = registry.bus().subscribe(&info.session_id).await.unwrap();

    assert!(!registry.withdraw(&info.session_id, "bob").await);
    assert_eq!(registry.list_open().len(), 1);

    assert!(registry.withdraw(&info.session_id, "alice").await);
    assert!(registry.list_open().is_empty());
    assert_eq!(sub.recv().await.unwrap_err(), SubscriptionError::Closed);
    assert_eq!(bus.topic_count(), 0);
    assert!(matches!(
        registry.join(&info.session_id, "bob").await,
        Err(SessionError::SessionNotFound(_))
    ));

    // Once a guest is seated there is nothing left to withdraw.
    let info = registry.create("alice", "g2", RulesConfig::default());
    registry.join(&info.session_id, "bob").await.unwrap();
    assert!(!registry.withdraw(&info.session_id, "alice").await);
    assert_eq!(registry.active_count(), 1);
}
