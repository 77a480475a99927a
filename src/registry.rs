//! Lobby and active-session repository owned by the server process.

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};

use crate::bus::{BroadcastBus, EventBus};
use crate::common::{PlayerId, SessionId, Side};
use crate::config::{FirstMove, RulesConfig, ServerConfig};
use crate::error::{SessionError, StoreError};
use crate::rules::GameSummary;
use crate::session::{SessionHandle, SessionState};
use crate::store::{MemorySessionStore, SessionStore};

/// A session waiting for its second player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub name: String,
    pub host: PlayerId,
    pub config: RulesConfig,
}

struct Shared {
    open: DashMap<SessionId, SessionInfo>,
    active: DashMap<SessionId, Arc<SessionHandle>>,
    store: Arc<dyn SessionStore>,
    bus: Arc<dyn EventBus>,
    config: Arc<ServerConfig>,
}

/// Cheap to clone; every clone sees the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<Shared>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, bus: Arc<dyn EventBus>, config: ServerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                open: DashMap::new(),
                active: DashMap::new(),
                store,
                bus,
                config: Arc::new(config),
            }),
        }
    }

    /// Registry backed by the in-process store and bus.
    pub fn in_memory(config: ServerConfig) -> Self {
        let bus = BroadcastBus::new(config.bus_capacity);
        Self::new(Arc::new(MemorySessionStore::new()), Arc::new(bus), config)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.shared.store)
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.shared.bus)
    }

    /// Open a session hosted by `host`. It becomes playable once someone
    /// joins.
    pub fn create(&self, host: &str, name: &str, config: RulesConfig) -> SessionInfo {
        let session_id = format!("{:016x}", rand::rng().random::<u64>());
        let info = SessionInfo {
            session_id: session_id.clone(),
            name: name.to_string(),
            host: host.to_string(),
            config,
        };
        self.shared.open.insert(session_id, info.clone());
        log::info!("session {} '{}' opened by {}", info.session_id, name, host);
        info
    }

    /// Sessions still waiting for a guest.
    pub fn list_open(&self) -> Vec<SessionInfo> {
        let mut open: Vec<SessionInfo> = self.shared.open.iter().map(|e| e.value().clone()).collect();
        open.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.session_id.cmp(&b.session_id)));
        open
    }

    /// Take an open session off the lobby. Only its host may do so. Returns
    /// false when it is gone already, e.g. because a guest just joined.
    pub async fn withdraw(&self, session_id: &SessionId, host: &str) -> bool {
        if self
            .shared
            .open
            .remove_if(session_id, |_, info| info.host == host)
            .is_none()
        {
            return false;
        }
        self.shared.bus.close(session_id).await;
        log::info!("session {} withdrawn by {}", session_id, host);
        true
    }

    /// Seat `guest` opposite the host and start the match at version 0.
    pub async fn join(&self, session_id: &SessionId, guest: &str) -> Result<Arc<SessionHandle>, SessionError> {
        let info = match self
            .shared
            .open
            .remove_if(session_id, |_, info| info.host != guest)
        {
            Some((_, info)) => info,
            None if self.shared.open.contains_key(session_id) => {
                return Err(SessionError::NotAPlayer(guest.to_string()))
            }
            None if self.shared.active.contains_key(session_id) => {
                return Err(SessionError::SessionFull(session_id.clone()))
            }
            None => return Err(SessionError::SessionNotFound(session_id.clone())),
        };

        let starting = match info.config.first_move {
            FirstMove::Creator => Side::A,
            FirstMove::Random => {
                if rand::rng().random() {
                    Side::A
                } else {
                    Side::B
                }
            }
        };
        let state = SessionState::new(
            info.session_id.clone(),
            [info.host.clone(), guest.to_string()],
            info.config,
            starting,
        );
        let handle = SessionHandle::create(
            state,
            self.store(),
            self.bus(),
            Arc::clone(&self.shared.config),
        );
        self.shared.active.insert(session_id.clone(), Arc::clone(&handle));
        self.watch_finish(&handle);
        handle.launch().await;
        log::info!(
            "session {}: {} joined {}, {:?} moves first",
            session_id,
            guest,
            info.host,
            starting
        );
        Ok(handle)
    }

    /// Local handle for `session_id`, adopting it from the store when this
    /// process does not own it yet. Finished sessions are returned without
    /// being re-registered.
    pub async fn get(&self, session_id: &SessionId) -> Result<Arc<SessionHandle>, SessionError> {
        if let Some(handle) = self.shared.active.get(session_id) {
            return Ok(Arc::clone(handle.value()));
        }
        let adopted = SessionHandle::adopt(
            session_id,
            self.store(),
            self.bus(),
            Arc::clone(&self.shared.config),
        )
        .await
        .map_err(|e| match e {
            SessionError::Store(StoreError::NotFound(id)) => SessionError::SessionNotFound(id),
            other => other,
        })?;
        if adopted.finished().is_cancelled() {
            return Ok(adopted);
        }
        let handle = Arc::clone(
            self.shared
                .active
                .entry(session_id.clone())
                .or_insert_with(|| Arc::clone(&adopted))
                .value(),
        );
        if Arc::ptr_eq(&handle, &adopted) {
            self.watch_finish(&handle);
            // Whoever owned it before took the connections along.
            handle.arm_absent();
        }
        Ok(handle)
    }

    /// Drop a session from the active set. The snapshot lingers in the store
    /// for `finished_ttl`, the summary stays.
    pub async fn archive(&self, session_id: &SessionId) -> Option<GameSummary> {
        archive(&self.shared, session_id).await
    }

    /// Summary of an archived session.
    pub async fn summary(&self, session_id: &SessionId) -> Result<GameSummary, SessionError> {
        Ok(self.shared.store.summary(session_id).await?)
    }

    pub fn active_count(&self) -> usize {
        self.shared.active.len()
    }

    fn watch_finish(&self, handle: &Arc<SessionHandle>) {
        let finished = handle.finished();
        let session_id = handle.id().clone();
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            finished.cancelled().await;
            if let Some(shared) = shared.upgrade() {
                archive(&shared, &session_id).await;
            }
        });
    }
}

async fn archive(shared: &Shared, session_id: &SessionId) -> Option<GameSummary> {
    let (_, handle) = shared.active.remove(session_id)?;
    let summary = handle.summary().await;
    if let Err(e) = shared.store.archive(session_id, summary.clone()).await {
        log::warn!("session {}: archive failed: {}", session_id, e);
    }
    if let Err(e) = shared.store.expire(session_id, shared.config.finished_ttl).await {
        log::debug!("session {}: expire after archive: {}", session_id, e);
    }
    shared.bus.close(session_id).await;
    log::info!(
        "session {} archived: winner {:?} by {:?} after {} turns",
        session_id,
        summary.winner,
        summary.reason,
        summary.turns
    );
    Some(summary)
}
