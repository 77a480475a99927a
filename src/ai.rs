// Computer opponent: probability-density shot selection and a driver that
// plays one side of a session like any remote client would.

use rand::rngs::SmallRng;
use rand::Rng;
use std::sync::Arc;
use tokio::time::Duration;

use crate::board::{Board, BoardView};
use crate::bus::SubscriptionError;
use crate::common::{Coord, Grid, PlayerId, Side, BOARD_SIZE};
use crate::error::SessionError;
use crate::roster::Roster;
use crate::rules::{Action, GameSummary, Phase};
use crate::session::{SessionHandle, SessionSnapshot};
use crate::ship::Orientation;

const GRID_SIZE: usize = BOARD_SIZE;

/// Probability matrix over the grid, indexed `[row][col]`.
pub type Pdf = [[f64; GRID_SIZE]; GRID_SIZE];

/// What a shooter knows about the opponent's board.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpponentView {
    /// Hits on ships that are still afloat.
    pub hits: Grid,
    /// Cells no ship can occupy and no shot should target.
    pub blocked: Grid,
    /// Lengths of the ships still afloat.
    pub remaining: Vec<usize>,
}

impl OpponentView {
    /// Build from a redacted board. Sunk ships are removed from `remaining`
    /// and their cells (plus their ring with `no_adjacent`) become blocked.
    pub fn from_board(view: &BoardView, roster: &Roster, no_adjacent: bool) -> Self {
        let hits = Grid::from_coords(view.hits.iter().copied()).unwrap_or_default();
        let misses = Grid::from_coords(view.misses.iter().copied()).unwrap_or_default();
        let mut sunk = Grid::new();
        let mut remaining: Vec<(String, usize)> = roster
            .items()
            .iter()
            .map(|t| (t.name().to_string(), t.length()))
            .collect();
        for ship in view.fleet.iter().filter(|s| s.sunk) {
            sunk |= Grid::from_coords(ship.cells.iter().copied()).unwrap_or_default();
            if let Some(pos) = remaining.iter().position(|(name, _)| *name == ship.ship) {
                remaining.remove(pos);
            }
        }
        let mut blocked = misses | sunk;
        if no_adjacent {
            blocked |= sunk.dilate();
        }
        Self {
            hits: hits & !sunk,
            blocked,
            remaining: remaining.into_iter().map(|(_, len)| len).collect(),
        }
    }

    /// True if a shot at `coord` is worth taking.
    pub fn is_open(&self, coord: Coord) -> bool {
        coord.in_bounds() && !self.blocked.contains(coord) && !self.hits.contains(coord)
    }
}

/// Narrow interface to a targeting strategy.
pub trait ShotSelector: Send {
    /// Pick the next cell to fire at. `history` lists this shooter's earlier
    /// shots, including rejected ones. `None` when no cell is left open.
    fn choose_shot(&mut self, view: &OpponentView, history: &[Coord]) -> Option<Coord>;
}

/// Compute a probability density over all open squares given the known
/// hits, the blocked cells and the lengths of the remaining enemy ships.
/// Each entry sums the relative likelihood of a ship segment occupying that
/// coordinate.
pub fn calc_pdf(hits: &Grid, blocked: &Grid, remaining_lengths: &[usize]) -> Pdf {
    let mut matrix = [[0.0f64; GRID_SIZE]; GRID_SIZE];

    for &len in remaining_lengths.iter() {
        if len == 0 || len > GRID_SIZE {
            continue;
        }

        for orient in [Orientation::Horizontal, Orientation::Vertical] {
            let (max_row, max_col) = match orient {
                Orientation::Vertical => (GRID_SIZE - len + 1, GRID_SIZE),
                Orientation::Horizontal => (GRID_SIZE, GRID_SIZE - len + 1),
            };
            let cell = |r: usize, c: usize, k: usize| match orient {
                Orientation::Vertical => (r + k, c),
                Orientation::Horizontal => (r, c + k),
            };
            for r in 0..max_row {
                for c in 0..max_col {
                    let mut valid = true;
                    let mut n_hits = 0usize;
                    for k in 0..len {
                        let (rr, cc) = cell(r, c, k);
                        if blocked.get(rr, cc).unwrap_or(true) {
                            valid = false;
                            break;
                        }
                        if hits.get(rr, cc).unwrap_or(false) {
                            n_hits += 1;
                        }
                    }
                    if !valid {
                        continue;
                    }

                    // Placements through known hits dominate so the search
                    // closes in on a wounded ship.
                    const HIT_BIAS: f64 = 10.0;
                    let weight = HIT_BIAS.powi(n_hits as i32);
                    for k in 0..len {
                        let (rr, cc) = cell(r, c, k);
                        if !hits.get(rr, cc).unwrap_or(true) {
                            matrix[rr][cc] += weight;
                        }
                    }
                }
            }
        }
    }

    normalize(matrix)
}

fn normalize(mut matrix: Pdf) -> Pdf {
    let total: f64 = matrix.iter().flatten().sum();
    if total == 0.0 {
        return matrix;
    }
    for v in matrix.iter_mut().flatten() {
        *v /= total;
    }
    matrix
}

/// Sample a coordinate from a probability matrix using a temperature
/// parameter. Returns `None` when the matrix is all zero.
pub fn sample_pdf<R: Rng + ?Sized>(pdf: &Pdf, temperature: f64, rng: &mut R) -> Option<Coord> {
    let mut adjusted = [[0.0f64; GRID_SIZE]; GRID_SIZE];
    let mut total = 0.0;
    for r in 0..GRID_SIZE {
        for c in 0..GRID_SIZE {
            let v = pdf[r][c].powf(1.0 / temperature);
            adjusted[r][c] = v;
            total += v;
        }
    }
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let threshold: f64 = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    let mut last = None;
    for r in 0..GRID_SIZE {
        for c in 0..GRID_SIZE {
            if adjusted[r][c] <= 0.0 {
                continue;
            }
            cumulative += adjusted[r][c];
            last = Some(Coord::new(r as u8, c as u8));
            if threshold < cumulative {
                return last;
            }
        }
    }
    last
}

/// Default selector: samples the placement-density matrix. Lower
/// temperature hones in on the most likely cells.
pub struct ProbabilitySelector {
    rng: SmallRng,
    temperature: f64,
}

impl ProbabilitySelector {
    pub fn new(rng: SmallRng) -> Self {
        Self {
            rng,
            temperature: 0.5,
        }
    }

    pub fn with_temperature(rng: SmallRng, temperature: f64) -> Self {
        Self { rng, temperature }
    }
}

impl ShotSelector for ProbabilitySelector {
    fn choose_shot(&mut self, view: &OpponentView, history: &[Coord]) -> Option<Coord> {
        let mut blocked = view.blocked;
        for coord in history {
            let _ = blocked.insert(*coord);
        }
        let pdf = calc_pdf(&view.hits, &blocked, &view.remaining);
        if let Some(coord) = sample_pdf(&pdf, self.temperature, &mut self.rng) {
            return Some(coord);
        }
        // Nothing fits any remaining ship: fall back to any open cell.
        let open: Vec<Coord> = (0..GRID_SIZE as u8)
            .flat_map(|r| (0..GRID_SIZE as u8).map(move |c| Coord::new(r, c)))
            .filter(|c| view.is_open(*c) && !blocked.contains(*c))
            .collect();
        if open.is_empty() {
            return None;
        }
        Some(open[self.rng.random_range(0..open.len())])
    }
}

/// Plays one seat of a session through the same path as remote players:
/// `submit_action` for moves, a bus subscription for wakeups.
pub struct AiPlayer<S: ShotSelector = ProbabilitySelector> {
    player: PlayerId,
    selector: S,
    rng: SmallRng,
    think_time: Duration,
}

impl<S: ShotSelector> AiPlayer<S> {
    pub fn new(player: impl Into<PlayerId>, selector: S, rng: SmallRng) -> Self {
        Self {
            player: player.into(),
            selector,
            rng,
            think_time: Duration::ZERO,
        }
    }

    /// Pause before every shot.
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn player(&self) -> &PlayerId {
        &self.player
    }

    /// Play until the game is over and return its summary.
    pub async fn run(mut self, handle: Arc<SessionHandle>) -> Result<GameSummary, SessionError> {
        let side = handle
            .side_of(&self.player)
            .ok_or_else(|| SessionError::NotAPlayer(self.player.clone()))?;
        handle.attach(side).await;
        let result = self.play(&handle, side).await;
        handle.detach(side).await;
        result
    }

    async fn play(&mut self, handle: &Arc<SessionHandle>, side: Side) -> Result<GameSummary, SessionError> {
        let mut subscription = handle.subscribe().await?;
        let mut history: Vec<Coord> = Vec::new();
        let mut closed = false;

        loop {
            let snapshot = handle.resume(&self.player).await?;
            match snapshot.turn.phase {
                Phase::Finished { .. } => return Ok(snapshot.summary),
                Phase::Placement => {
                    if snapshot.boards[side.index()].fleet.len() < self.roster(&snapshot).len() {
                        self.place_fleet(handle, &snapshot, side).await?;
                        continue;
                    }
                }
                Phase::Firing if snapshot.turn.actor == side => {
                    if !self.think_time.is_zero() {
                        tokio::time::sleep(self.think_time).await;
                    }
                    let roster = self.roster(&snapshot);
                    let view = OpponentView::from_board(
                        &snapshot.boards[side.other().index()],
                        &roster,
                        snapshot.config.no_adjacent_ships,
                    );
                    let Some(target) = self.selector.choose_shot(&view, &history) else {
                        log::warn!("{} has no open cell left on session {}", self.player, handle.id());
                        return Err(SessionError::NoTarget(self.player.clone()));
                    };
                    history.push(target);
                    match handle.submit_action(&self.player, Action::Fire(target)).await {
                        Ok(_) => {}
                        Err(SessionError::Rules(e)) => {
                            log::debug!("{} shot at {} rejected: {}", self.player, target, e);
                        }
                        Err(e) => return Err(e),
                    }
                    continue;
                }
                Phase::Firing => {}
            }

            if closed {
                return Err(SessionError::SessionNotFound(handle.id().clone()));
            }
            match subscription.recv().await {
                Ok(_) | Err(SubscriptionError::Lagged(_)) => {}
                Err(SubscriptionError::Closed) => closed = true,
            }
        }
    }

    fn roster(&self, snapshot: &SessionSnapshot) -> Roster {
        snapshot.config.roster.roster()
    }

    /// Place whatever part of the fleet is still missing at random.
    async fn place_fleet(
        &mut self,
        handle: &Arc<SessionHandle>,
        snapshot: &SessionSnapshot,
        side: Side,
    ) -> Result<(), SessionError> {
        let roster = self.roster(snapshot);
        let placed = &snapshot.boards[side.index()].fleet;
        let mut board = Board::new(snapshot.config.no_adjacent_ships);
        let mut pending = Vec::new();
        if placed.is_empty() {
            board
                .autoplace(&mut self.rng, &roster)
                .map_err(crate::error::RulesError::from)?;
            for ship in board.ships() {
                pending.push((ship.ship_type().name().to_string(), ship.cells().to_vec()));
            }
        } else {
            for ship in placed {
                if let Some(ship_type) = roster.find(&ship.ship) {
                    board
                        .place(ship_type.clone(), &ship.cells)
                        .map_err(crate::error::RulesError::from)?;
                }
            }
            for ship_type in roster.items() {
                if board.placed_count(ship_type.name()) >= roster.count_of(ship_type.name()) {
                    continue;
                }
                let cells = board
                    .random_placement(&mut self.rng, ship_type)
                    .map_err(crate::error::RulesError::from)?;
                board
                    .place(ship_type.clone(), &cells)
                    .map_err(crate::error::RulesError::from)?;
                pending.push((ship_type.name().to_string(), cells));
            }
        }
        for (ship, cells) in pending {
            handle
                .submit_action(&self.player, Action::PlaceShip { ship, cells })
                .await?;
        }
        Ok(())
    }
}
