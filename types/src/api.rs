//! Wire messages exchanged with clients and admin tooling.
//!
//! Realtime frames are JSON in both directions: clients send [`Command`]
//! frames, the server pushes [`ServerMessage`] frames. HTTP bodies reuse the
//! same DTOs.

use serde::{Deserialize, Serialize};

use crate::{Game, GameId, GameStatus, Seat, StoneRoll, UserId, WithdrawalRequest};

/// A player command delivered by the realtime transport.
///
/// The `user` id is supplied by the authentication layer and trusted here;
/// the core performs no credential checks of its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub game: GameId,
    pub user: UserId,
    pub kind: CommandKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Join,
    Roll,
    Abandon,
}

/// Immutable view of a game, handed to the fan-out after every successful
/// command and broadcast to all subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub id: GameId,
    pub status: GameStatus,
    pub stake: u64,
    pub pot: u64,
    pub seats: Vec<Seat>,
    pub turn: Option<UserId>,
    pub winner: Option<UserId>,
    pub last_roll: Option<StoneRoll>,
    pub updated_at: u64,
}

impl GameSnapshot {
    pub fn of(game: &Game, last_roll: Option<StoneRoll>) -> Self {
        Self {
            id: game.id,
            status: game.status,
            stake: game.stake,
            pot: game.pot(),
            seats: game.seats.clone(),
            turn: game.turn_user(),
            winner: game.winner,
            last_roll,
            updated_at: game.updated_at,
        }
    }
}

/// Frames pushed to realtime subscribers. Errors are only ever sent to the
/// socket that submitted the failing command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot(GameSnapshot),
    Error { message: String },
}

/// Request to open a new game. Stake defaults to the configured value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGame {
    #[serde(default)]
    pub stake: Option<u64>,
}

/// Registration body for a new platform account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterUser {
    pub name: String,
    #[serde(default)]
    pub admin: bool,
}

/// User-facing withdrawal request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestWithdrawal {
    pub user: UserId,
    pub amount: u64,
    pub account_number: String,
    pub bank_code: String,
}

/// Admin approve/reject body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminAction {
    pub admin: UserId,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Recipient account resolution passthrough.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveAccount {
    pub account_number: String,
    pub bank_code: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAccount {
    pub account_name: String,
}

/// Withdrawal listing entry. `needs_review` flags Submitted requests whose
/// verification attempts exceeded the review threshold and therefore wait
/// on manual action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalView {
    #[serde(flatten)]
    pub request: WithdrawalRequest,
    pub needs_review: bool,
}
