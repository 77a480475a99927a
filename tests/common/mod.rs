#![allow(dead_code)]

use battleship_sessions::{
    Action, BroadcastBus, Coord, EventBus, MemorySessionStore, RetryPolicy, RulesConfig, ServerConfig,
    SessionHandle, SessionState, SessionStore, Side,
};
use std::sync::Arc;
use tokio::time::Duration;

/// Classic fleet laid out on the even rows, every ship flush left. No two
/// ships touch, so the layout is legal with or without the adjacency rule.
pub fn classic_layout() -> Vec<(&'static str, Vec<Coord>)> {
    vec![
        ("carrier", row(0, 5)),
        ("battleship", row(2, 4)),
        ("cruiser", row(4, 3)),
        ("submarine", row(6, 3)),
        ("destroyer", row(8, 2)),
    ]
}

pub fn row(r: u8, len: u8) -> Vec<Coord> {
    (0..len).map(|c| Coord::new(r, c)).collect()
}

pub fn place(ship: &str, cells: Vec<Coord>) -> Action {
    Action::PlaceShip {
        ship: ship.to_string(),
        cells,
    }
}

pub fn fire(r: u8, c: u8) -> Action {
    Action::Fire(Coord::new(r, c))
}

pub fn new_state(config: RulesConfig) -> SessionState {
    SessionState::new("s-1".into(), ["alice".into(), "bob".into()], config, Side::A)
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        save_retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
        },
        ..ServerConfig::default()
    }
}

pub struct Fixture {
    pub store: Arc<dyn SessionStore>,
    pub bus: Arc<dyn EventBus>,
    pub config: Arc<ServerConfig>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemorySessionStore::new()))
    }

    pub fn with_store(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            bus: Arc::new(BroadcastBus::new(64)),
            config: Arc::new(test_config()),
        }
    }

    pub async fn launch(&self, config: RulesConfig) -> Arc<SessionHandle> {
        let handle = SessionHandle::create(
            new_state(config),
            self.store.clone(),
            self.bus.clone(),
            self.config.clone(),
        );
        handle.launch().await;
        handle
    }
}

/// Place the classic layout for both players through the handle.
pub async fn place_fleets(handle: &SessionHandle) {
    for player in ["alice", "bob"] {
        for (ship, cells) in classic_layout() {
            handle.submit_action(player, place(ship, cells)).await.unwrap();
        }
    }
}
