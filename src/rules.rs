//! Rules engine: turn order, salvo accounting, shot legality and win
//! detection over a pair of boards.
//!
//! The engine never suspends and never mutates anything when it returns an
//! error, so a caller holding the session lock can apply an action and
//! either commit the produced events or drop them.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::board::Board;
use crate::common::{Coord, Grid, ShotOutcome, Side};
use crate::config::{FiringOrder, RulesConfig};
use crate::delta::Event;
use crate::error::{IllegalShotReason, PlacementError, RulesError};
use crate::roster::Roster;

/// A player action. Every variant is handled by [`RulesEngine::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    PlaceShip { ship: String, cells: Vec<Coord> },
    Fire(Coord),
    Surrender,
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    FleetDestroyed,
    Surrender,
    /// The loser stayed disconnected past the turn grace period.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Placement,
    Firing,
    Finished { winner: Side, reason: FinishReason },
}

/// Whose turn it is and how many shots they have left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnState {
    pub phase: Phase,
    pub actor: Side,
    pub shots_left: u32,
}

/// Running statistics of a match, kept after the session is archived.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSummary {
    pub shots: [u32; 2],
    pub hits: [u32; 2],
    pub ships_sunk: [u32; 2],
    pub turns: u32,
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub winner: Option<Side>,
    pub reason: Option<FinishReason>,
}

/// Seconds since the unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesEngine {
    config: RulesConfig,
    roster: Roster,
    starting: Side,
    turn: TurnState,
    /// Cells of each side's board that may no longer be targeted.
    excluded: [Grid; 2],
    summary: GameSummary,
}

impl RulesEngine {
    /// New engine in the placement phase. `starting` fires first once both
    /// fleets are complete.
    pub fn new(config: RulesConfig, starting: Side) -> Self {
        Self {
            roster: config.roster.roster(),
            config,
            starting,
            turn: TurnState {
                phase: Phase::Placement,
                actor: starting,
                shots_left: 0,
            },
            excluded: [Grid::new(); 2],
            summary: GameSummary {
                started_at: unix_now(),
                ..GameSummary::default()
            },
        }
    }

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn starting(&self) -> Side {
        self.starting
    }

    pub fn turn(&self) -> TurnState {
        self.turn
    }

    pub fn summary(&self) -> &GameSummary {
        &self.summary
    }

    /// Cells on `side`'s board excluded from targeting.
    pub fn excluded(&self, side: Side) -> Grid {
        self.excluded[side.index()]
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.turn.phase, Phase::Finished { .. })
    }

    /// Validate and apply `action` by `actor`. On error nothing changes.
    pub fn apply(
        &mut self,
        boards: &mut [Board; 2],
        actor: Side,
        action: &Action,
    ) -> Result<Vec<Event>, RulesError> {
        match action {
            Action::PlaceShip { ship, cells } => self.place(boards, actor, ship, cells),
            Action::Fire(coord) => self.fire(boards, actor, *coord),
            Action::Surrender => {
                if self.is_finished() {
                    return Err(IllegalShotReason::GameOver.into());
                }
                Ok(vec![self.finish(actor.other(), FinishReason::Surrender)])
            }
        }
    }

    /// End the game against `loser`. Returns `None` if it is already over.
    pub fn forfeit(&mut self, loser: Side, reason: FinishReason) -> Option<Vec<Event>> {
        if self.is_finished() {
            return None;
        }
        Some(vec![self.finish(loser.other(), reason)])
    }

    fn place(
        &mut self,
        boards: &mut [Board; 2],
        actor: Side,
        name: &str,
        cells: &[Coord],
    ) -> Result<Vec<Event>, RulesError> {
        if self.turn.phase != Phase::Placement {
            return Err(PlacementError::PlacementClosed.into());
        }
        let ship_type = self
            .roster
            .find(name)
            .cloned()
            .ok_or_else(|| PlacementError::UnknownShip(name.to_string()))?;
        let board = &mut boards[actor.index()];
        if board.placed_count(name) >= self.roster.count_of(name) {
            return Err(PlacementError::ShipLimitExceeded(name.to_string()).into());
        }
        board.place(ship_type, cells)?;

        let placed = board.ships().last().map(|s| s.cells().to_vec()).unwrap_or_default();
        let mut events = vec![Event::ShipPlaced {
            side: actor,
            ship: name.to_string(),
            cells: Some(placed),
        }];
        if board.all_placed(&self.roster) {
            events.push(Event::FleetReady { side: actor });
            if boards[actor.other().index()].all_placed(&self.roster) {
                let shots_left = self.allotment(boards, self.starting);
                self.turn = TurnState {
                    phase: Phase::Firing,
                    actor: self.starting,
                    shots_left,
                };
                self.summary.turns = 1;
                events.push(Event::TurnChanged {
                    actor: self.starting,
                    shots_left,
                });
            }
        }
        Ok(events)
    }

    fn fire(
        &mut self,
        boards: &mut [Board; 2],
        actor: Side,
        coord: Coord,
    ) -> Result<Vec<Event>, RulesError> {
        match self.turn.phase {
            Phase::Placement => return Err(IllegalShotReason::NotFiringPhase.into()),
            Phase::Finished { .. } => return Err(IllegalShotReason::GameOver.into()),
            Phase::Firing => {}
        }
        if actor != self.turn.actor {
            return Err(IllegalShotReason::NotYourTurn.into());
        }
        if !coord.in_bounds() {
            return Err(IllegalShotReason::OutOfBounds.into());
        }
        let defender = actor.other();
        if boards[defender.index()].was_shot(coord) {
            return Err(RulesError::DuplicateShot(coord));
        }
        if self.excluded[defender.index()].contains(coord) {
            return Err(IllegalShotReason::ExcludedCell.into());
        }

        let outcome = boards[defender.index()].receive_shot(coord)?;
        let me = actor.index();
        self.summary.shots[me] += 1;
        if !outcome.is_miss() {
            self.summary.hits[me] += 1;
        }
        if let ShotOutcome::Kill { cells, .. } = &outcome {
            self.summary.ships_sunk[me] += 1;
            if self.config.no_adjacent_ships {
                if let Ok(ship) = Grid::from_coords(cells.iter().copied()) {
                    self.excluded[defender.index()] |= ship.dilate();
                }
            }
        }

        if boards[defender.index()].is_defeated() {
            let mut events = vec![Event::ShotResult {
                shooter: actor,
                coord,
                outcome,
                shots_left: 0,
            }];
            events.push(self.finish(actor, FinishReason::FleetDestroyed));
            return Ok(events);
        }

        let keep_turn = if self.config.salvo_mode {
            self.turn.shots_left = self.turn.shots_left.saturating_sub(1);
            self.turn.shots_left > 0
        } else {
            match self.config.firing_order {
                FiringOrder::Alternating => false,
                FiringOrder::UntilMiss => !outcome.is_miss(),
            }
        };
        if !keep_turn {
            self.turn.shots_left = 0;
        }

        let mut events = vec![Event::ShotResult {
            shooter: actor,
            coord,
            outcome,
            shots_left: self.turn.shots_left,
        }];
        if !keep_turn {
            let next = defender;
            let shots_left = self.allotment(boards, next);
            self.turn.actor = next;
            self.turn.shots_left = shots_left;
            self.summary.turns += 1;
            events.push(Event::TurnChanged {
                actor: next,
                shots_left,
            });
        }
        Ok(events)
    }

    /// Shots `side` gets at the start of its turn.
    fn allotment(&self, boards: &[Board; 2], side: Side) -> u32 {
        if self.config.salvo_mode {
            boards[side.index()].ships_alive().max(1) as u32
        } else {
            1
        }
    }

    fn finish(&mut self, winner: Side, reason: FinishReason) -> Event {
        self.turn = TurnState {
            phase: Phase::Finished { winner, reason },
            actor: winner,
            shots_left: 0,
        };
        self.summary.winner = Some(winner);
        self.summary.reason = Some(reason);
        self.summary.finished_at = Some(unix_now());
        Event::GameFinished {
            winner,
            reason,
            summary: self.summary.clone(),
        }
    }
}
