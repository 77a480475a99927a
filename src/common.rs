//! Common value types shared by the board, rules and session layers.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::bitboard::BitBoard;

/// Side length of the square grid.
pub const BOARD_SIZE: usize = 10;

/// Grid-sized bitboard used for ship masks, shots and exclusions.
pub type Grid = BitBoard<u128, BOARD_SIZE>;

/// Stable identity of a player, resolved from the transport connection.
pub type PlayerId = String;

/// Identifier of a game session.
pub type SessionId = String;

/// A cell on the grid, `(row, column)`, zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coord {
    pub row: u8,
    pub col: u8,
}

impl Coord {
    pub const fn new(row: u8, col: u8) -> Self {
        Self { row, col }
    }

    /// True when the coordinate lies on a `BOARD_SIZE` grid.
    pub fn in_bounds(&self) -> bool {
        (self.row as usize) < BOARD_SIZE && (self.col as usize) < BOARD_SIZE
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

impl From<(u8, u8)> for Coord {
    fn from((row, col): (u8, u8)) -> Self {
        Coord::new(row, col)
    }
}

/// Seat of a player inside a session. `A` is the session creator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }

    /// Index into two-element per-side arrays.
    pub fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }
}

/// Result of a shot against a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotOutcome {
    /// Shot missed all ships.
    Miss,
    /// Shot hit a ship that is still afloat.
    Hit,
    /// Shot destroyed a ship, carrying its type and full cell layout.
    Kill { ship: String, cells: Vec<Coord> },
}

impl ShotOutcome {
    pub fn is_miss(&self) -> bool {
        matches!(self, ShotOutcome::Miss)
    }
}
