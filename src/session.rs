//! A live match: two boards, one rules engine and the serialized path every
//! mutation takes through persistence and fanout.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::board::{Board, BoardView};
use crate::bus::{EventBus, Subscription};
use crate::common::{PlayerId, SessionId, Side};
use crate::config::{RulesConfig, ServerConfig};
use crate::delta::{Delta, Event};
use crate::error::{IllegalShotReason, RulesError, SessionError, StoreError};
use crate::rules::{Action, FinishReason, GameSummary, Phase, RulesEngine, TurnState};
use crate::store::SessionStore;

/// Full authoritative state of a session. This is what the store persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    pub players: [PlayerId; 2],
    pub boards: [Board; 2],
    pub rules: RulesEngine,
    /// 0 at creation, +1 per accepted action.
    pub version: u64,
}

/// A change to apply under the session lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Act(Side, Action),
    /// The side ran out its disconnect grace period.
    Forfeit(Side),
}

impl SessionState {
    pub fn new(id: SessionId, players: [PlayerId; 2], config: RulesConfig, starting: Side) -> Self {
        let boards = [
            Board::new(config.no_adjacent_ships),
            Board::new(config.no_adjacent_ships),
        ];
        Self {
            id,
            players,
            boards,
            rules: RulesEngine::new(config, starting),
            version: 0,
        }
    }

    pub fn side_of(&self, player: &str) -> Option<Side> {
        side_of(&self.players, player)
    }

    /// Apply `mutation`, bumping the version when something changed.
    /// `Ok(None)` means it was a no-op.
    pub fn mutate(&mut self, mutation: &Mutation) -> Result<Option<Vec<Event>>, RulesError> {
        let events = match mutation {
            Mutation::Act(side, action) => self.rules.apply(&mut self.boards, *side, action)?,
            Mutation::Forfeit(side) => match self.rules.forfeit(*side, FinishReason::Timeout) {
                Some(events) => events,
                None => return Ok(None),
            },
        };
        self.version += 1;
        Ok(Some(events))
    }

    /// State as `viewer` may see it. Spectators (`None`) see both boards
    /// redacted.
    pub fn snapshot_for(&self, viewer: Option<Side>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            version: self.version,
            viewer,
            players: self.players.clone(),
            config: *self.rules.config(),
            turn: self.rules.turn(),
            boards: [
                self.boards[0].view(viewer == Some(Side::A)),
                self.boards[1].view(viewer == Some(Side::B)),
            ],
            summary: self.rules.summary().clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

fn side_of(players: &[PlayerId; 2], player: &str) -> Option<Side> {
    if players[0] == player {
        Some(Side::A)
    } else if players[1] == player {
        Some(Side::B)
    } else {
        None
    }
}

/// Redacted state returned by `resume`. `boards` is indexed by side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub version: u64,
    pub viewer: Option<Side>,
    pub players: [PlayerId; 2],
    pub config: RulesConfig,
    pub turn: TurnState,
    pub boards: [BoardView; 2],
    pub summary: GameSummary,
}

/// Whether an accepted action reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistence {
    Persisted,
    /// Save retries ran out. The action stands in memory only.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub delta: Delta,
    pub persistence: Persistence,
}

struct Inner {
    state: SessionState,
    /// Version last written to the store, `None` if nothing is stored.
    persisted: Option<u64>,
}

#[derive(Default)]
struct Presence {
    connections: [usize; 2],
    idle_timers: [Option<CancellationToken>; 2],
}

/// Shared handle to one session. All mutations are totally ordered by an
/// async mutex held across persistence and publication, so subscribers see
/// deltas in version order.
pub struct SessionHandle {
    id: SessionId,
    players: [PlayerId; 2],
    inner: Mutex<Inner>,
    presence: StdMutex<Presence>,
    finished: CancellationToken,
    store: Arc<dyn SessionStore>,
    bus: Arc<dyn EventBus>,
    config: Arc<ServerConfig>,
}

impl SessionHandle {
    fn from_state(
        state: SessionState,
        persisted: Option<u64>,
        store: Arc<dyn SessionStore>,
        bus: Arc<dyn EventBus>,
        config: Arc<ServerConfig>,
    ) -> Arc<Self> {
        let finished = CancellationToken::new();
        if state.rules.is_finished() {
            finished.cancel();
        }
        Arc::new(Self {
            id: state.id.clone(),
            players: state.players.clone(),
            inner: Mutex::new(Inner { state, persisted }),
            presence: StdMutex::new(Presence::default()),
            finished,
            store,
            bus,
            config,
        })
    }

    /// Handle for a fresh session at version 0. Nothing is persisted or
    /// published until [`SessionHandle::launch`].
    pub fn create(
        state: SessionState,
        store: Arc<dyn SessionStore>,
        bus: Arc<dyn EventBus>,
        config: Arc<ServerConfig>,
    ) -> Arc<Self> {
        Self::from_state(state, None, store, bus, config)
    }

    /// Persist version 0 and publish `GameStarted`. Sides with no
    /// connection yet start on the grace clock.
    pub async fn launch(self: &Arc<Self>) {
        self.arm_absent();
        let mut inner = self.inner.lock().await;
        if let Err(e) = self.write(&inner).await {
            log::error!(
                "PersistenceDegraded: session {} created but not persisted: {}",
                self.id,
                e
            );
        } else {
            inner.persisted = Some(inner.state.version);
        }
        let started = Event::GameStarted {
            players: inner.state.players.clone(),
            config: *inner.state.rules.config(),
            first: inner.state.rules.starting(),
        };
        let delta = Delta::new(self.id.clone(), inner.state.version, vec![started]);
        self.publish(delta).await;
    }

    /// Take over a session from the store, e.g. after another process owning
    /// it went away.
    pub async fn adopt(
        id: &SessionId,
        store: Arc<dyn SessionStore>,
        bus: Arc<dyn EventBus>,
        config: Arc<ServerConfig>,
    ) -> Result<Arc<Self>, SessionError> {
        let stored = store.load(id).await?;
        let state = SessionState::decode(&stored.bytes)?;
        log::info!("adopted session {} at version {}", id, stored.version);
        Ok(Self::from_state(state, Some(stored.version), store, bus, config))
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn players(&self) -> &[PlayerId; 2] {
        &self.players
    }

    pub fn side_of(&self, player: &str) -> Option<Side> {
        side_of(&self.players, player)
    }

    /// Cancelled once the game reaches the finished phase.
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }

    pub async fn version(&self) -> u64 {
        self.inner.lock().await.state.version
    }

    pub async fn summary(&self) -> GameSummary {
        self.inner.lock().await.state.rules.summary().clone()
    }

    /// Subscribe to this session's deltas. A finished session publishes
    /// nothing more, so its subscription is closed from the start.
    pub async fn subscribe(&self) -> Result<Subscription, SessionError> {
        if self.finished.is_cancelled() {
            return Ok(Subscription::closed(self.id.clone()));
        }
        self.bus
            .subscribe(&self.id)
            .await
            .map_err(|e| SessionError::Store(StoreError::Backend(e.to_string())))
    }

    /// Apply `action` for `player`. Rejections leave the session untouched.
    pub async fn submit_action(&self, player: &str, action: Action) -> Result<Accepted, SessionError> {
        let side = self
            .side_of(player)
            .ok_or_else(|| SessionError::NotAPlayer(player.to_string()))?;
        let mut inner = self.inner.lock().await;
        if let Phase::Finished {
            winner,
            reason: FinishReason::Timeout,
        } = inner.state.rules.turn().phase
        {
            if winner != side {
                return Err(SessionError::ActionTimeout);
            }
        }
        self.commit(&mut inner, Mutation::Act(side, action))
            .await?
            .ok_or(SessionError::Rules(RulesError::IllegalShot(
                IllegalShotReason::GameOver,
            )))
    }

    /// Hand `side` a timeout loss. `Ok(None)` if the game was already over.
    pub async fn forfeit(&self, side: Side) -> Result<Option<Accepted>, SessionError> {
        let mut inner = self.inner.lock().await;
        self.commit(&mut inner, Mutation::Forfeit(side)).await
    }

    /// Current state redacted for `player`.
    pub async fn resume(&self, player: &str) -> Result<SessionSnapshot, SessionError> {
        let side = self
            .side_of(player)
            .ok_or_else(|| SessionError::NotAPlayer(player.to_string()))?;
        Ok(self.inner.lock().await.state.snapshot_for(Some(side)))
    }

    /// Current state with both boards redacted.
    pub async fn spectate(&self) -> SessionSnapshot {
        self.inner.lock().await.state.snapshot_for(None)
    }

    async fn commit(
        &self,
        inner: &mut Inner,
        mutation: Mutation,
    ) -> Result<Option<Accepted>, SessionError> {
        let Some(mut events) = inner.state.mutate(&mutation)? else {
            return Ok(None);
        };

        let mut persistence = Persistence::Persisted;
        let mut conflicts = 0;
        loop {
            match self.write(inner).await {
                Ok(()) => {
                    inner.persisted = Some(inner.state.version);
                    break;
                }
                Err(StoreError::VersionConflict { expected, found })
                    if conflicts < self.config.conflict_retries =>
                {
                    conflicts += 1;
                    log::warn!(
                        "session {}: version conflict (expected {:?}, found {:?}), retry {}",
                        self.id,
                        expected,
                        found,
                        conflicts
                    );
                    match self.reconcile(inner, &mutation, found).await {
                        Ok(Reconciled::Retry) => {}
                        Ok(Reconciled::Rebased(rebased)) => events = rebased,
                        Ok(Reconciled::Dropped) => return Ok(None),
                        Err(e @ SessionError::Rules(_)) => return Err(e),
                        Err(e) => {
                            log::error!(
                                "PersistenceDegraded: session {} version {} kept in memory: {}",
                                self.id,
                                inner.state.version,
                                e
                            );
                            persistence = Persistence::Degraded;
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::error!(
                        "PersistenceDegraded: session {} version {} kept in memory: {}",
                        self.id,
                        inner.state.version,
                        e
                    );
                    persistence = Persistence::Degraded;
                    break;
                }
            }
        }

        let delta = Delta::new(self.id.clone(), inner.state.version, events);
        self.publish(delta.clone()).await;
        if delta.finished().is_some() {
            self.disarm_all();
            self.finished.cancel();
        }
        Ok(Some(Accepted { delta, persistence }))
    }

    /// After a conflict either realign the expected version or rebase the
    /// mutation on the stored state, which is authoritative.
    async fn reconcile(
        &self,
        inner: &mut Inner,
        mutation: &Mutation,
        found: Option<u64>,
    ) -> Result<Reconciled, SessionError> {
        let Some(found) = found else {
            // Record gone, e.g. reaped. Recreate it from memory.
            inner.persisted = None;
            return Ok(Reconciled::Retry);
        };
        let stored = self.store.load(&self.id).await?;
        if stored.version + 1 < inner.state.version {
            // The store lags behind our own unpersisted actions.
            inner.persisted = Some(found);
            return Ok(Reconciled::Retry);
        }
        let mut remote = SessionState::decode(&stored.bytes)?;
        let result = remote.mutate(mutation);
        inner.state = remote;
        inner.persisted = Some(stored.version);
        match result {
            Ok(Some(events)) => Ok(Reconciled::Rebased(events)),
            Ok(None) => Ok(Reconciled::Dropped),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the current state, retrying backend failures with backoff.
    /// Conflicts return immediately.
    async fn write(&self, inner: &Inner) -> Result<(), StoreError> {
        let bytes = inner
            .state
            .encode()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let version = inner.state.version;
        let policy = self.config.save_retry;
        let mut attempt = 1;
        loop {
            let result = if inner.persisted == version.checked_sub(1) {
                self.store.save(&self.id, bytes.clone(), version).await
            } else {
                self.store
                    .replace(&self.id, bytes.clone(), inner.persisted, version)
                    .await
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e @ StoreError::VersionConflict { .. }) => return Err(e),
                Err(e) if attempt >= policy.max_attempts => return Err(e),
                Err(e) => {
                    let wait = policy.backoff(attempt);
                    log::warn!(
                        "session {}: save attempt {} failed: {}; retrying in {:?}",
                        self.id,
                        attempt,
                        e,
                        wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn publish(&self, delta: Delta) {
        let version = delta.version;
        if let Err(e) = self.bus.publish(delta).await {
            log::warn!("session {}: publish of version {} failed: {}", self.id, version, e);
        }
    }

    fn presence(&self) -> MutexGuard<'_, Presence> {
        self.presence.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A connection for `side` came up. Disarms its idle timer.
    pub async fn attach(&self, side: Side) {
        {
            let mut presence = self.presence();
            presence.connections[side.index()] += 1;
            if let Some(timer) = presence.idle_timers[side.index()].take() {
                timer.cancel();
                log::debug!("session {}: {:?} reconnected within grace", self.id, side);
            }
        }
        if let Err(e) = self.store.cancel_expiry(&self.id).await {
            log::warn!("session {}: cancel expiry failed: {}", self.id, e);
        }
    }

    /// A connection for `side` went away. When it was the last one and the
    /// game is still on, `side` forfeits unless it reattaches within the
    /// grace period.
    pub async fn detach(self: &Arc<Self>, side: Side) {
        if self.finished.is_cancelled() {
            return;
        }
        let (timer, abandoned) = {
            let mut presence = self.presence();
            let count = &mut presence.connections[side.index()];
            *count = count.saturating_sub(1);
            if *count > 0 {
                return;
            }
            let token = CancellationToken::new();
            if let Some(old) = presence.idle_timers[side.index()].replace(token.clone()) {
                old.cancel();
            }
            (token, presence.connections == [0, 0])
        };

        self.spawn_idle_timer(side, timer);

        if abandoned {
            if let Err(e) = self.store.expire(&self.id, self.config.abandoned_ttl).await {
                log::warn!("session {}: expire failed: {}", self.id, e);
            }
        }
    }

    /// Start the grace clock for every side that has no connection and no
    /// running timer. Used when a session comes up with nobody attached,
    /// after a launch or an adoption.
    pub fn arm_absent(self: &Arc<Self>) {
        if self.finished.is_cancelled() {
            return;
        }
        for side in [Side::A, Side::B] {
            let timer = {
                let mut presence = self.presence();
                if presence.connections[side.index()] > 0 || presence.idle_timers[side.index()].is_some() {
                    continue;
                }
                let token = CancellationToken::new();
                presence.idle_timers[side.index()] = Some(token.clone());
                token
            };
            log::debug!("session {}: {:?} not connected, grace clock running", self.id, side);
            self.spawn_idle_timer(side, timer);
        }
    }

    fn spawn_idle_timer(self: &Arc<Self>, side: Side, timer: CancellationToken) {
        let handle = Arc::clone(self);
        let grace = self.config.idle_turn_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = handle.finished.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    if handle.connections(side) > 0 {
                        return;
                    }
                    log::info!("session {}: {:?} idle past grace, forfeiting", handle.id, side);
                    if let Err(e) = handle.forfeit(side).await {
                        log::warn!("session {}: timeout forfeit failed: {}", handle.id, e);
                    }
                }
            }
        });
    }

    /// Number of live connections for `side`.
    pub fn connections(&self, side: Side) -> usize {
        self.presence().connections[side.index()]
    }

    fn disarm_all(&self) {
        let mut presence = self.presence();
        for timer in presence.idle_timers.iter_mut() {
            if let Some(timer) = timer.take() {
                timer.cancel();
            }
        }
    }
}

enum Reconciled {
    Retry,
    Rebased(Vec<Event>),
    Dropped,
}
