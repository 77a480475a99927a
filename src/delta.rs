//! State changes broadcast to the subscribers of a session.

use serde::{Deserialize, Serialize};

use crate::common::{Coord, PlayerId, SessionId, ShotOutcome, Side};
use crate::config::RulesConfig;
use crate::rules::{FinishReason, GameSummary};

/// One observable change inside a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Version 0 of every session.
    GameStarted {
        players: [PlayerId; 2],
        config: RulesConfig,
        first: Side,
    },
    /// `cells` is `None` in every copy except the owner's.
    ShipPlaced {
        side: Side,
        ship: String,
        cells: Option<Vec<Coord>>,
    },
    FleetReady {
        side: Side,
    },
    ShotResult {
        shooter: Side,
        coord: Coord,
        outcome: ShotOutcome,
        /// Shots the shooter has left in the current turn.
        shots_left: u32,
    },
    TurnChanged {
        actor: Side,
        shots_left: u32,
    },
    GameFinished {
        winner: Side,
        reason: FinishReason,
        summary: GameSummary,
    },
}

/// Everything one accepted action changed, stamped with the version it
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub session_id: SessionId,
    pub version: u64,
    pub events: Vec<Event>,
}

impl Delta {
    pub fn new(session_id: SessionId, version: u64, events: Vec<Event>) -> Self {
        Self {
            session_id,
            version,
            events,
        }
    }

    /// Copy of this delta safe to send to `viewer`. `None` is a spectator.
    pub fn view_for(&self, viewer: Option<Side>) -> Delta {
        let events = self
            .events
            .iter()
            .map(|event| match event {
                Event::ShipPlaced { side, ship, .. } if viewer != Some(*side) => Event::ShipPlaced {
                    side: *side,
                    ship: ship.clone(),
                    cells: None,
                },
                other => other.clone(),
            })
            .collect();
        Delta {
            session_id: self.session_id.clone(),
            version: self.version,
            events,
        }
    }

    /// The final event, if this delta ended the game.
    pub fn finished(&self) -> Option<(Side, FinishReason)> {
        self.events.iter().find_map(|e| match e {
            Event::GameFinished { winner, reason, .. } => Some((*winner, *reason)),
            _ => None,
        })
    }
}
