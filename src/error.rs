use serde::{Deserialize, Serialize};

use crate::common::{Coord, SessionId};

/// Reasons a ship placement is refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum PlacementError {
    #[error("ship {ship} needs {expected} cells, got {actual}")]
    LengthMismatch {
        ship: String,
        expected: usize,
        actual: usize,
    },
    #[error("cells do not form a straight unbroken line")]
    NotContiguous,
    #[error("cell {0} is off the board")]
    OutOfBounds(Coord),
    #[error("cell {0} is already taken by another ship")]
    Overlap(Coord),
    #[error("cell {0} touches another ship")]
    Adjacent(Coord),
    #[error("ship type {0} is not part of this roster")]
    UnknownShip(String),
    #[error("all ships of type {0} are already placed")]
    ShipLimitExceeded(String),
    #[error("ships can only be placed during the placement phase")]
    PlacementClosed,
}

/// Why a shot was refused without touching any board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum IllegalShotReason {
    #[error("fleets are not placed yet")]
    NotFiringPhase,
    #[error("it is not your turn")]
    NotYourTurn,
    #[error("the game is over")]
    GameOver,
    #[error("target is off the board")]
    OutOfBounds,
    #[error("target is next to a destroyed ship")]
    ExcludedCell,
}

/// Rules violations. These are purely local: nothing is mutated and the
/// action is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RulesError {
    #[error("invalid placement: {0}")]
    InvalidPlacement(#[from] PlacementError),
    #[error("cell {0} was already fired upon")]
    DuplicateShot(Coord),
    #[error("illegal shot: {0}")]
    IllegalShot(#[from] IllegalShotReason),
}

/// Errors reported by a [`crate::store::SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("version conflict: expected stored version {expected:?}, found {found:?}")]
    VersionConflict {
        expected: Option<u64>,
        found: Option<u64>,
    },
    #[error("session {0} not found")]
    NotFound(SessionId),
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error("session {0} not found")]
    SessionNotFound(SessionId),
    #[error("player {0} is not seated in this session")]
    NotAPlayer(String),
    #[error("session {0} already has two players")]
    SessionFull(SessionId),
    #[error("turn grace period elapsed; the game was forfeited")]
    ActionTimeout,
    #[error("{0} has no open cell left to fire at")]
    NoTarget(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// Wire form of a rejected request, sent only to the submitting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RejectReason {
    #[error(transparent)]
    Rules(RulesError),
    #[error("session not found")]
    SessionNotFound,
    #[error("not a player of this session")]
    NotAPlayer,
    #[error("session is full")]
    SessionFull,
    #[error("turn grace period elapsed")]
    ActionTimeout,
    #[error("request not allowed: {0}")]
    Protocol(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl From<&SessionError> for RejectReason {
    fn from(err: &SessionError) -> Self {
        match err {
            SessionError::Rules(e) => RejectReason::Rules(e.clone()),
            SessionError::SessionNotFound(_) | SessionError::Store(StoreError::NotFound(_)) => {
                RejectReason::SessionNotFound
            }
            SessionError::NotAPlayer(_) => RejectReason::NotAPlayer,
            SessionError::SessionFull(_) => RejectReason::SessionFull,
            SessionError::ActionTimeout => RejectReason::ActionTimeout,
            other => RejectReason::Unavailable(other.to_string()),
        }
    }
}
