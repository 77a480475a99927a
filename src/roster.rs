//! Fleet catalogs for the supported ruleset variants.

use serde::{Deserialize, Serialize};

use crate::ship::ShipType;

/// Named fleet composition a session is played with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RosterVariant {
    /// Carrier, battleship, cruiser, submarine, destroyer.
    #[default]
    Classic,
    /// Ten ships from a four-deck battleship down to four single-cell frigates.
    Russian,
}

impl RosterVariant {
    /// Build the roster for this variant.
    pub fn roster(self) -> Roster {
        match self {
            RosterVariant::Classic => Roster::new(
                "classic",
                [
                    ("carrier", 5),
                    ("battleship", 4),
                    ("cruiser", 3),
                    ("submarine", 3),
                    ("destroyer", 2),
                ],
            ),
            RosterVariant::Russian => Roster::new(
                "russian",
                [
                    ("battleship", 4),
                    ("cruiser", 3),
                    ("cruiser", 3),
                    ("destroyer", 2),
                    ("destroyer", 2),
                    ("destroyer", 2),
                    ("frigate", 1),
                    ("frigate", 1),
                    ("frigate", 1),
                    ("frigate", 1),
                ],
            ),
        }
    }
}

/// Ordered list of ship types a fleet must contain. A type may appear more
/// than once; each appearance is one ship to place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    name: String,
    items: Vec<ShipType>,
}

impl Roster {
    pub fn new<'a, I>(name: &str, items: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, usize)>,
    {
        Self {
            name: name.to_string(),
            items: items
                .into_iter()
                .map(|(n, len)| ShipType::new(n, len))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn items(&self) -> &[ShipType] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ship type with the given name, if the roster has one.
    pub fn find(&self, name: &str) -> Option<&ShipType> {
        self.items.iter().find(|t| t.name() == name)
    }

    /// How many ships of type `name` the fleet contains.
    pub fn count_of(&self, name: &str) -> usize {
        self.items.iter().filter(|t| t.name() == name).count()
    }

    /// Total number of ship segments in the fleet.
    pub fn total_cells(&self) -> usize {
        self.items.iter().map(ShipType::length).sum()
    }
}
