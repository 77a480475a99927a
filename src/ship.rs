//! Ship definitions and placement geometry.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::common::{Coord, Grid};
use crate::error::PlacementError;

/// Orientation of a ship on the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

/// Type of ship: name and length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShipType {
    name: String,
    length: usize,
}

impl ShipType {
    /// Create a new ship type.
    pub fn new(name: impl Into<String>, length: usize) -> Self {
        Self {
            name: name.into(),
            length,
        }
    }

    /// Ship's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ship's length.
    pub fn length(&self) -> usize {
        self.length
    }
}

/// Cells covered by a ship of `length` starting at `origin` and extending
/// right (horizontal) or down (vertical). Cells may run off the board; the
/// caller validates bounds.
pub fn line_cells(origin: Coord, orientation: Orientation, length: usize) -> Vec<Coord> {
    (0..length)
        .map(|i| {
            let i = i as u8;
            match orientation {
                Orientation::Horizontal => Coord::new(origin.row, origin.col.saturating_add(i)),
                Orientation::Vertical => Coord::new(origin.row.saturating_add(i), origin.col),
            }
        })
        .collect()
}

/// A ship placed on the board, with hits tracked in a `Grid`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    ship_type: ShipType,
    cells: Vec<Coord>,
    mask: Grid,
    hits: Grid,
}

impl Ship {
    /// Validate `cells` against `ship_type` and build the placed ship.
    ///
    /// Cells must match the type's length, lie on the board and form one
    /// unbroken row or column. They are stored sorted, top-left first.
    pub fn new(ship_type: ShipType, cells: &[Coord]) -> Result<Self, PlacementError> {
        if cells.len() != ship_type.length() {
            return Err(PlacementError::LengthMismatch {
                ship: ship_type.name().to_string(),
                expected: ship_type.length(),
                actual: cells.len(),
            });
        }
        if let Some(bad) = cells.iter().find(|c| !c.in_bounds()) {
            return Err(PlacementError::OutOfBounds(*bad));
        }

        let mut sorted = cells.to_vec();
        sorted.sort();
        if sorted.is_empty() {
            return Err(PlacementError::NotContiguous);
        }
        let same_row = sorted.iter().all(|c| c.row == sorted[0].row);
        let same_col = sorted.iter().all(|c| c.col == sorted[0].col);
        let contiguous = sorted.windows(2).all(|w| {
            if same_row {
                w[1].col == w[0].col + 1
            } else {
                w[1].row == w[0].row + 1
            }
        });
        if !(same_row || same_col) || !contiguous {
            return Err(PlacementError::NotContiguous);
        }

        let mask = Grid::from_coords(sorted.iter().copied())
            .map_err(|_| PlacementError::NotContiguous)?;
        Ok(Ship {
            ship_type,
            cells: sorted,
            mask,
            hits: Grid::new(),
        })
    }

    /// Register a shot at `coord`. Returns `true` if it hit this ship.
    pub fn register_hit(&mut self, coord: Coord) -> bool {
        if self.mask.contains(coord) {
            let _ = self.hits.insert(coord);
            true
        } else {
            false
        }
    }

    /// Check if the ship is destroyed (every occupied cell hit).
    pub fn is_sunk(&self) -> bool {
        self.hits == self.mask
    }

    /// Ship's type.
    pub fn ship_type(&self) -> &ShipType {
        &self.ship_type
    }

    /// Occupied cells, ordered.
    pub fn cells(&self) -> &[Coord] {
        &self.cells
    }

    /// Cells hit so far.
    pub fn hits(&self) -> Grid {
        self.hits
    }

    /// Occupancy mask of the ship on the board.
    pub fn mask(&self) -> Grid {
        self.mask
    }
}

impl fmt::Debug for Ship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ship {{ name: \"{}\", cells: {:?}, hits: {} }}",
            self.ship_type.name(),
            self.cells,
            self.hits.count_ones(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_line_is_accepted_in_any_order() {
        let def = ShipType::new("cruiser", 3);
        let ship = Ship::new(
            def,
            &[Coord::new(4, 2), Coord::new(2, 2), Coord::new(3, 2)],
        )
        .unwrap();
        assert_eq!(
            ship.cells(),
            &[Coord::new(2, 2), Coord::new(3, 2), Coord::new(4, 2)]
        );
    }

    #[test]
    fn gaps_and_diagonals_are_rejected() {
        let def = ShipType::new("cruiser", 3);
        let gap = [Coord::new(0, 0), Coord::new(0, 1), Coord::new(0, 3)];
        assert_eq!(
            Ship::new(def.clone(), &gap).unwrap_err(),
            PlacementError::NotContiguous
        );
        let diagonal = [Coord::new(0, 0), Coord::new(1, 1), Coord::new(2, 2)];
        assert_eq!(
            Ship::new(def, &diagonal).unwrap_err(),
            PlacementError::NotContiguous
        );
    }

    #[test]
    fn register_hit_and_sunk() {
        let def = ShipType::new("destroyer", 2);
        let mut ship = Ship::new(def, &line_cells(Coord::new(1, 1), Orientation::Horizontal, 2))
            .unwrap();
        assert!(!ship.is_sunk());
        assert!(ship.register_hit(Coord::new(1, 1)));
        assert!(!ship.is_sunk());
        assert!(!ship.register_hit(Coord::new(0, 0)));
        assert!(ship.register_hit(Coord::new(1, 2)));
        assert!(ship.is_sunk());
    }
}
