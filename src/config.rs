//! Ruleset and server configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::roster::RosterVariant;

/// How the turn passes between players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FiringOrder {
    /// One shot per turn regardless of outcome.
    #[default]
    Alternating,
    /// Keep firing while shots hit; the first miss passes the turn.
    UntilMiss,
}

/// Who fires first once both fleets are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FirstMove {
    /// The session creator.
    #[default]
    Creator,
    /// Drawn once when the session is created, then fixed.
    Random,
}

/// Rules a session is played with. Immutable once the session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    pub roster: RosterVariant,
    pub firing_order: FiringOrder,
    pub salvo_mode: bool,
    pub no_adjacent_ships: bool,
    pub first_move: FirstMove,
}

/// Invalid server configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid configuration: {reason}")]
pub struct ConfigError {
    pub reason: String,
}

/// Exponential backoff used when a snapshot save fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Backoff to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Per-process configuration of the session service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// How long a side may stay disconnected during a live game before it
    /// forfeits.
    pub idle_turn_grace: Duration,
    /// Reclamation delay for sessions whose players have all disconnected.
    pub abandoned_ttl: Duration,
    /// How long a finished game's snapshot lingers in the store before it
    /// is archived.
    pub finished_ttl: Duration,
    pub save_retry: RetryPolicy,
    /// Reload-and-reapply attempts after a `VersionConflict`.
    pub conflict_retries: u32,
    pub max_frame_size: u32,
    /// Buffered deltas per session topic before slow subscribers lag.
    pub bus_capacity: usize,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_turn_grace.is_zero() {
            return Err(ConfigError {
                reason: "idle_turn_grace must be > 0".to_string(),
            });
        }
        if self.abandoned_ttl.is_zero() {
            return Err(ConfigError {
                reason: "abandoned_ttl must be > 0".to_string(),
            });
        }
        if self.save_retry.max_attempts == 0 {
            return Err(ConfigError {
                reason: "save_retry.max_attempts must be > 0".to_string(),
            });
        }
        if self.save_retry.initial_backoff > self.save_retry.max_backoff {
            return Err(ConfigError {
                reason: "save_retry.initial_backoff must not exceed max_backoff".to_string(),
            });
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError {
                reason: "max_frame_size must be > 0".to_string(),
            });
        }
        if self.bus_capacity == 0 {
            return Err(ConfigError {
                reason: "bus_capacity must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            idle_turn_grace: Duration::from_secs(60),
            abandoned_ttl: Duration::from_secs(600),
            finished_ttl: Duration::from_secs(30),
            save_retry: RetryPolicy::default(),
            conflict_retries: 3,
            max_frame_size: 1_000_000,
            bus_capacity: 256,
        }
    }
}
