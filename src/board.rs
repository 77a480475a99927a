//! Per-player board: ship placement, received shots and redacted views.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::common::{Coord, Grid, ShotOutcome, BOARD_SIZE};
use crate::error::{IllegalShotReason, PlacementError, RulesError};
use crate::roster::Roster;
use crate::ship::{line_cells, Orientation, Ship, ShipType};

/// One ship as seen by a viewer of the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipView {
    pub ship: String,
    pub cells: Vec<Coord>,
    pub sunk: bool,
}

/// Board as presented to a viewer. The opponent's copy lists only sunk
/// ships in `fleet`; the owner's copy lists every ship.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoardView {
    pub fleet: Vec<ShipView>,
    pub hits: Vec<Coord>,
    pub misses: Vec<Coord>,
    pub ships_alive: usize,
}

/// Main board state: ship placements and shots received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    ships: Vec<Ship>,
    occupied: Grid,
    shots: Grid,
    no_adjacent: bool,
}

impl Board {
    /// Create an empty board. With `no_adjacent` set, ships may not touch,
    /// not even diagonally.
    pub fn new(no_adjacent: bool) -> Self {
        Board {
            ships: Vec::new(),
            occupied: Grid::new(),
            shots: Grid::new(),
            no_adjacent,
        }
    }

    /// Placed ships in placement order.
    pub fn ships(&self) -> &[Ship] {
        &self.ships
    }

    /// Board occupancy mask of all ships.
    pub fn occupied(&self) -> Grid {
        self.occupied
    }

    /// Every coordinate that has been fired upon.
    pub fn shots(&self) -> Grid {
        self.shots
    }

    /// Shots that landed on a ship.
    pub fn hits(&self) -> Grid {
        self.shots & self.occupied
    }

    /// Shots that landed in open water.
    pub fn misses(&self) -> Grid {
        self.shots & !self.occupied
    }

    /// Place a ship of `ship_type` on `cells`. Nothing changes on error.
    pub fn place(&mut self, ship_type: ShipType, cells: &[Coord]) -> Result<(), PlacementError> {
        let ship = Ship::new(ship_type, cells)?;
        let mask = ship.mask();
        if let Some(taken) = (mask & self.occupied).coords().next() {
            return Err(PlacementError::Overlap(taken));
        }
        if self.no_adjacent {
            if let Some(near) = (mask.dilate() & self.occupied).coords().next() {
                return Err(PlacementError::Adjacent(near));
            }
        }
        self.occupied |= mask;
        self.ships.push(ship);
        Ok(())
    }

    /// Number of placed ships of the named type.
    pub fn placed_count(&self, name: &str) -> usize {
        self.ships
            .iter()
            .filter(|s| s.ship_type().name() == name)
            .count()
    }

    /// True when every ship type in the roster is placed exactly as many
    /// times as the roster lists it.
    pub fn all_placed(&self, roster: &Roster) -> bool {
        self.ships.len() == roster.len()
            && roster
                .items()
                .iter()
                .all(|t| self.placed_count(t.name()) == roster.count_of(t.name()))
    }

    /// True if `coord` was already fired upon.
    pub fn was_shot(&self, coord: Coord) -> bool {
        self.shots.contains(coord)
    }

    /// Apply a shot at `coord` and report the outcome. A repeated coordinate
    /// is rejected with `DuplicateShot` and leaves the board untouched.
    pub fn receive_shot(&mut self, coord: Coord) -> Result<ShotOutcome, RulesError> {
        if !coord.in_bounds() {
            return Err(IllegalShotReason::OutOfBounds.into());
        }
        if self.was_shot(coord) {
            return Err(RulesError::DuplicateShot(coord));
        }
        let _ = self.shots.insert(coord);

        for ship in self.ships.iter_mut() {
            if ship.register_hit(coord) {
                if ship.is_sunk() {
                    return Ok(ShotOutcome::Kill {
                        ship: ship.ship_type().name().to_string(),
                        cells: ship.cells().to_vec(),
                    });
                }
                return Ok(ShotOutcome::Hit);
            }
        }
        Ok(ShotOutcome::Miss)
    }

    /// Returns `true` when every ship has been destroyed.
    pub fn is_defeated(&self) -> bool {
        self.ships.iter().all(Ship::is_sunk)
    }

    /// Number of ships still afloat.
    pub fn ships_alive(&self) -> usize {
        self.ships.iter().filter(|s| !s.is_sunk()).count()
    }

    /// View of this board. Unless `reveal` is set, ships that are still
    /// afloat are left out so their layout stays hidden.
    pub fn view(&self, reveal: bool) -> BoardView {
        let fleet = self
            .ships
            .iter()
            .filter(|s| reveal || s.is_sunk())
            .map(|s| ShipView {
                ship: s.ship_type().name().to_string(),
                cells: s.cells().to_vec(),
                sunk: s.is_sunk(),
            })
            .collect();
        BoardView {
            fleet,
            hits: self.hits().coords().collect(),
            misses: self.misses().coords().collect(),
            ships_alive: self.ships_alive(),
        }
    }

    /// Returns random cells for `ship_type` that can be placed on this board
    /// as it currently stands.
    pub fn random_placement<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        ship_type: &ShipType,
    ) -> Result<Vec<Coord>, PlacementError> {
        let len = ship_type.length();
        if len == 0 || len > BOARD_SIZE {
            return Err(PlacementError::LengthMismatch {
                ship: ship_type.name().to_string(),
                expected: len,
                actual: 0,
            });
        }
        let blocked = if self.no_adjacent {
            self.occupied.dilate()
        } else {
            self.occupied
        };
        let mut attempts = 0;
        while attempts < 500 {
            attempts += 1;
            let orient = if rng.random() {
                Orientation::Horizontal
            } else {
                Orientation::Vertical
            };
            let (max_r, max_c) = match orient {
                Orientation::Vertical => (BOARD_SIZE - len, BOARD_SIZE - 1),
                Orientation::Horizontal => (BOARD_SIZE - 1, BOARD_SIZE - len),
            };
            let r = rng.random_range(0..=max_r) as u8;
            let c = rng.random_range(0..=max_c) as u8;
            let cells = line_cells(Coord::new(r, c), orient, len);
            if cells.iter().all(|cell| !blocked.contains(*cell)) {
                return Ok(cells);
            }
        }
        Err(PlacementError::Overlap(Coord::new(0, 0)))
    }

    /// Place every ship in `roster` at random, starting from an empty board.
    pub fn autoplace<R: Rng + ?Sized>(&mut self, rng: &mut R, roster: &Roster) -> Result<(), PlacementError> {
        for _ in 0..16 {
            let mut board = Board::new(self.no_adjacent);
            let placed = roster.items().iter().try_for_each(|ship_type| {
                let cells = board.random_placement(rng, ship_type)?;
                board.place(ship_type.clone(), &cells)
            });
            if placed.is_ok() {
                *self = board;
                return Ok(());
            }
        }
        Err(PlacementError::Overlap(Coord::new(0, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::RosterVariant;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn adjacency_rule_rejects_touching_ships() {
        let mut board = Board::new(true);
        board
            .place(ShipType::new("destroyer", 2), &[Coord::new(0, 0), Coord::new(0, 1)])
            .unwrap();
        let err = board
            .place(ShipType::new("destroyer", 2), &[Coord::new(1, 2), Coord::new(2, 2)])
            .unwrap_err();
        assert!(matches!(err, PlacementError::Adjacent(_)));
        assert_eq!(board.ships().len(), 1);
    }

    #[test]
    fn autoplace_respects_no_adjacent() {
        let roster = RosterVariant::Russian.roster();
        let mut rng = SmallRng::seed_from_u64(7);
        let mut board = Board::new(true);
        board.autoplace(&mut rng, &roster).unwrap();
        assert!(board.all_placed(&roster));
        for (i, a) in board.ships().iter().enumerate() {
            for b in board.ships().iter().skip(i + 1) {
                assert!(!a.mask().dilate().intersects(&b.mask()));
            }
        }
    }

    #[test]
    fn opponent_view_hides_afloat_ships() {
        let mut board = Board::new(false);
        board
            .place(ShipType::new("destroyer", 2), &[Coord::new(0, 0), Coord::new(0, 1)])
            .unwrap();
        board
            .place(ShipType::new("cruiser", 3), &[Coord::new(5, 5), Coord::new(6, 5), Coord::new(7, 5)])
            .unwrap();
        board.receive_shot(Coord::new(0, 0)).unwrap();
        board.receive_shot(Coord::new(0, 1)).unwrap();
        board.receive_shot(Coord::new(5, 5)).unwrap();

        let view = board.view(false);
        assert_eq!(view.fleet.len(), 1);
        assert_eq!(view.fleet[0].ship, "destroyer");
        assert_eq!(view.hits.len(), 3);
        assert_eq!(view.ships_alive, 1);

        let own = board.view(true);
        assert_eq!(own.fleet.len(), 2);
    }
}
