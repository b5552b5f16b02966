use serde::{Deserialize, Serialize};

use crate::UserId;

/// Identifier for a game, assigned by the store at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub u64);

impl std::fmt::Display for GameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a game.
///
/// Transitions are monotonic: Waiting -> InProgress -> {Completed, Cancelled}.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Waiting,
    InProgress,
    Completed,
    Cancelled,
}

impl GameStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameStatus::Completed | GameStatus::Cancelled)
    }
}

/// One seated player: board position and whether they have left the game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub user: UserId,
    pub position: u16,
    pub absent: bool,
}

impl Seat {
    pub fn new(user: UserId) -> Self {
        Self {
            user,
            position: 0,
            absent: false,
        }
    }
}

/// Authoritative state of one game.
///
/// Owned exclusively by a single session actor for its in-memory lifetime;
/// seats are kept in join order and the turn index walks them circularly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: GameId,
    pub stake: u64,
    pub status: GameStatus,
    pub seats: Vec<Seat>,
    pub turn: usize,
    pub winner: Option<UserId>,
    pub move_count: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Game {
    pub fn new(id: GameId, stake: u64, now: u64) -> Self {
        Self {
            id,
            stake,
            status: GameStatus::Waiting,
            seats: Vec::new(),
            turn: 0,
            winner: None,
            move_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn seat(&self, user: UserId) -> Option<&Seat> {
        self.seats.iter().find(|seat| seat.user == user)
    }

    pub fn seat_mut(&mut self, user: UserId) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|seat| seat.user == user)
    }

    pub fn is_seated(&self, user: UserId) -> bool {
        self.seat(user).is_some()
    }

    pub fn active_seats(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter().filter(|seat| !seat.absent)
    }

    /// Total escrowed value. Zero until stakes are escrowed at the
    /// Waiting -> InProgress transition.
    pub fn pot(&self) -> u64 {
        if self.status == GameStatus::Waiting {
            0
        } else {
            self.stake * self.seats.len() as u64
        }
    }

    /// The user whose turn it is, when play is live.
    pub fn turn_user(&self) -> Option<UserId> {
        if self.status != GameStatus::InProgress {
            return None;
        }
        self.seats.get(self.turn).map(|seat| seat.user)
    }

    /// Advance the turn index circularly, skipping absent players. Leaves
    /// the index untouched when no active seat remains.
    pub fn advance_turn(&mut self) {
        if self.seats.is_empty() {
            return;
        }
        for _ in 0..self.seats.len() {
            self.turn = (self.turn + 1) % self.seats.len();
            if !self.seats[self.turn].absent {
                return;
            }
        }
    }
}

/// A single recorded roll. Append-only audit record; immutable once written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoneRoll {
    pub game: GameId,
    pub user: UserId,
    /// Strictly increasing from 1 per game.
    pub sequence: u64,
    pub value: u8,
    /// Board position after the roll was applied.
    pub position: u16,
    pub at: u64,
}
