//! Per-game authoritative state machine.
//!
//! One `GameMachine` owns one game for its in-memory lifetime. Commands
//! mutate a scratch copy, money moves first, persistence second, and only
//! then does the machine adopt the new state, so any failure leaves the
//! machine exactly where it was and the command safe to retry. The ledger
//! and store operations involved are idempotent by construction (escrow
//! keys, settlement pairing, roll sequence numbers), which is what makes
//! the retry sound.

use thiserror::Error;
use tracing::{debug, info};

use stonerace_types::{
    api::{CommandKind, GameSnapshot},
    Game, GameId, GameStatus, Seat, StoneRoll, UserId,
};

use crate::board::{BoardConfig, StoneRng};
use crate::ledger::{Ledger, LedgerError, SettleKind};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("game is full")]
    GameFull,
    #[error("already joined this game")]
    AlreadyJoined,
    #[error("not seated in this game")]
    NotJoined,
    #[error("not your turn")]
    NotYourTurn,
    #[error("game does not accept this command while {status:?}")]
    WrongStatus { status: GameStatus },
    #[error("unknown user {user}")]
    UnknownUser { user: UserId },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("storage: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl GameError {
    fn storage<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Storage(Box::new(err))
    }
}

pub struct GameMachine<S: Store> {
    game: Game,
    last_roll: Option<StoneRoll>,
    config: BoardConfig,
    seed: u64,
    ledger: Ledger<S>,
    store: S,
}

impl<S: Store> GameMachine<S> {
    /// Open a new game and persist its Waiting state.
    pub async fn create(
        store: S,
        ledger: Ledger<S>,
        config: BoardConfig,
        seed: u64,
        stake: Option<u64>,
        now: u64,
    ) -> Result<Self, GameError> {
        let id = store.next_game_id().await.map_err(GameError::storage)?;
        let game = Game::new(id, stake.unwrap_or(config.stake), now);
        store
            .put_game(game.clone())
            .await
            .map_err(GameError::storage)?;
        info!(game = %id, stake = game.stake, "game created");
        Ok(Self {
            game,
            last_roll: None,
            config,
            seed,
            ledger,
            store,
        })
    }

    /// Rehydrate a persisted game; None when the id is unknown.
    pub async fn load(
        store: S,
        ledger: Ledger<S>,
        config: BoardConfig,
        seed: u64,
        id: GameId,
    ) -> Result<Option<Self>, GameError> {
        let Some(game) = store.game(id).await.map_err(GameError::storage)? else {
            return Ok(None);
        };
        let last_roll = store
            .rolls(id)
            .await
            .map_err(GameError::storage)?
            .into_iter()
            .last();
        Ok(Some(Self {
            game,
            last_roll,
            config,
            seed,
            ledger,
            store,
        }))
    }

    pub fn id(&self) -> GameId {
        self.game.id
    }

    pub fn status(&self) -> GameStatus {
        self.game.status
    }

    pub fn turn_user(&self) -> Option<UserId> {
        self.game.turn_user()
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot::of(&self.game, self.last_roll.clone())
    }

    /// Dispatch a transport command.
    pub async fn apply(
        &mut self,
        kind: CommandKind,
        user: UserId,
        now: u64,
    ) -> Result<GameSnapshot, GameError> {
        match kind {
            CommandKind::Join => self.join(user, now).await,
            CommandKind::Roll => self.roll(user, now).await,
            CommandKind::Abandon => self.abandon(user, now).await,
        }
    }

    /// Seat a player. Filling the roster escrows every player's stake
    /// (all or nothing) and starts play.
    pub async fn join(&mut self, user: UserId, now: u64) -> Result<GameSnapshot, GameError> {
        if self.game.status != GameStatus::Waiting {
            return Err(GameError::WrongStatus {
                status: self.game.status,
            });
        }
        if self.game.is_seated(user) {
            return Err(GameError::AlreadyJoined);
        }
        if self.game.seats.len() >= self.config.roster_size {
            return Err(GameError::GameFull);
        }
        // The account must exist before money can move on its behalf.
        self.store
            .user(user)
            .await
            .map_err(GameError::storage)?
            .ok_or(GameError::UnknownUser { user })?;

        let mut game = self.game.clone();
        game.seats.push(Seat::new(user));
        game.updated_at = now;

        let started = game.seats.len() == self.config.roster_size;
        if started {
            let roster: Vec<UserId> = game.seats.iter().map(|seat| seat.user).collect();
            self.ledger
                .escrow_roster(game.id, game.stake, &roster, now)
                .await?;
            game.status = GameStatus::InProgress;
            game.turn = 0;
        }

        self.store
            .put_game(game.clone())
            .await
            .map_err(GameError::storage)?;
        debug!(game = %game.id, %user, "player joined");
        if started {
            info!(game = %game.id, pot = game.pot(), "roster full, play started");
        }
        self.game = game;
        Ok(self.snapshot())
    }

    /// Roll the stone for the player whose turn it is.
    pub async fn roll(&mut self, user: UserId, now: u64) -> Result<GameSnapshot, GameError> {
        if self.game.status != GameStatus::InProgress {
            return Err(GameError::WrongStatus {
                status: self.game.status,
            });
        }
        let Some(seat) = self.game.seat(user) else {
            return Err(GameError::NotJoined);
        };
        if seat.absent {
            return Err(GameError::NotJoined);
        }
        if self.game.turn_user() != Some(user) {
            return Err(GameError::NotYourTurn);
        }

        let mut game = self.game.clone();
        let sequence = game.move_count + 1;
        let value = StoneRng::new(self.seed, game.id, sequence).draw(&self.config.stone_faces);
        let Some(seat) = game.seat_mut(user) else {
            return Err(GameError::NotJoined);
        };
        let position = seat.position.saturating_add(value as u16);
        seat.position = position;
        game.move_count = sequence;
        game.updated_at = now;

        let roll = StoneRoll {
            game: game.id,
            user,
            sequence,
            value,
            position,
            at: now,
        };

        let won = position >= self.config.target_position;
        if won {
            game.status = GameStatus::Completed;
            game.winner = Some(user);
            let pot = game.stake * game.seats.len() as u64;
            let entries: Vec<(UserId, SettleKind, u64)> = game
                .seats
                .iter()
                .map(|seat| {
                    if seat.user == user {
                        (seat.user, SettleKind::Win, pot)
                    } else {
                        (seat.user, SettleKind::Loss, 0)
                    }
                })
                .collect();
            // Money first: a settlement failure aborts the roll entirely.
            self.ledger.settle_game(game.id, &entries, now).await?;
        } else {
            game.advance_turn();
        }

        self.store
            .append_roll(roll.clone())
            .await
            .map_err(GameError::storage)?;
        self.store
            .put_game(game.clone())
            .await
            .map_err(GameError::storage)?;

        debug!(game = %game.id, %user, sequence, value, position, "stone rolled");
        if won {
            info!(game = %game.id, winner = %user, pot = game.pot(), "game completed");
        }
        self.game = game;
        self.last_roll = Some(roll);
        Ok(self.snapshot())
    }

    /// Mark a player absent. In the lobby this frees the seat; mid-game it
    /// cancels and refunds once fewer than two active players remain.
    pub async fn abandon(&mut self, user: UserId, now: u64) -> Result<GameSnapshot, GameError> {
        match self.game.status {
            GameStatus::Waiting => {
                if !self.game.is_seated(user) {
                    return Err(GameError::NotJoined);
                }
                // No stake has moved yet; just free the seat.
                let mut game = self.game.clone();
                game.seats.retain(|seat| seat.user != user);
                game.updated_at = now;
                self.store
                    .put_game(game.clone())
                    .await
                    .map_err(GameError::storage)?;
                debug!(game = %game.id, %user, "left the lobby");
                self.game = game;
                Ok(self.snapshot())
            }
            GameStatus::InProgress => {
                let Some(seat) = self.game.seat(user) else {
                    return Err(GameError::NotJoined);
                };
                if seat.absent {
                    // Already recorded; nothing further to do.
                    return Ok(self.snapshot());
                }

                let mut game = self.game.clone();
                if let Some(seat) = game.seat_mut(user) {
                    seat.absent = true;
                }
                game.updated_at = now;

                let remaining = game.active_seats().count();
                if remaining < 2 {
                    game.status = GameStatus::Cancelled;
                    // Every escrow is still open at this point; refund all
                    // of them, the leaver's included.
                    let entries: Vec<(UserId, SettleKind, u64)> = game
                        .seats
                        .iter()
                        .map(|seat| (seat.user, SettleKind::Release, game.stake))
                        .collect();
                    self.ledger.settle_game(game.id, &entries, now).await?;
                } else if game.seats[game.turn].absent {
                    game.advance_turn();
                }

                self.store
                    .put_game(game.clone())
                    .await
                    .map_err(GameError::storage)?;
                if game.status == GameStatus::Cancelled {
                    info!(game = %game.id, "cancelled, stakes refunded");
                } else {
                    debug!(game = %game.id, %user, "player abandoned");
                }
                self.game = game;
                Ok(self.snapshot())
            }
            status => Err(GameError::WrongStatus { status }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{fund, seeded_store};
    use crate::store::Memory;

    const NOW: u64 = 1_000;
    const SEED: u64 = 42;

    fn config(target: u16) -> BoardConfig {
        BoardConfig {
            roster_size: 2,
            target_position: target,
            stone_faces: vec![1, 2, 3, 4, 5, 6],
            stake: 100,
        }
    }

    async fn two_player_setup() -> (Memory, Ledger<Memory>) {
        let store = seeded_store(&[(1, "alice"), (2, "bob")]).await;
        fund(&store, UserId(1), 1_000).await;
        fund(&store, UserId(2), 1_000).await;
        let ledger = Ledger::new(store.clone());
        (store, ledger)
    }

    async fn started_game(target: u16) -> (GameMachine<Memory>, Ledger<Memory>) {
        let (store, ledger) = two_player_setup().await;
        let mut machine = GameMachine::create(
            store,
            ledger.clone(),
            config(target),
            SEED,
            None,
            NOW,
        )
        .await
        .unwrap();
        machine.join(UserId(1), NOW).await.unwrap();
        machine.join(UserId(2), NOW).await.unwrap();
        (machine, ledger)
    }

    #[tokio::test]
    async fn test_join_escrows_when_roster_fills() {
        let (store, ledger) = two_player_setup().await;
        let mut machine =
            GameMachine::create(store, ledger.clone(), config(20), SEED, None, NOW)
                .await
                .unwrap();

        let snapshot = machine.join(UserId(1), NOW).await.unwrap();
        assert_eq!(snapshot.status, GameStatus::Waiting);
        assert_eq!(ledger.available(UserId(1)).await.unwrap(), 1_000);

        let snapshot = machine.join(UserId(2), NOW).await.unwrap();
        assert_eq!(snapshot.status, GameStatus::InProgress);
        assert_eq!(snapshot.pot, 200);
        assert_eq!(snapshot.turn, Some(UserId(1)));
        assert_eq!(ledger.available(UserId(1)).await.unwrap(), 900);
        assert_eq!(ledger.available(UserId(2)).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn test_join_rejections() {
        let (machine_store, ledger) = two_player_setup().await;
        let mut machine =
            GameMachine::create(machine_store, ledger, config(20), SEED, None, NOW)
                .await
                .unwrap();

        machine.join(UserId(1), NOW).await.unwrap();
        assert!(matches!(
            machine.join(UserId(1), NOW).await,
            Err(GameError::AlreadyJoined)
        ));
        assert!(matches!(
            machine.join(UserId(77), NOW).await,
            Err(GameError::UnknownUser { .. })
        ));

        machine.join(UserId(2), NOW).await.unwrap();
        // Roster is full and play started.
        assert!(matches!(
            machine.join(UserId(2), NOW).await,
            Err(GameError::WrongStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_rejected_when_a_player_cannot_cover_the_stake() {
        let store = seeded_store(&[(1, "alice"), (2, "bob")]).await;
        fund(&store, UserId(1), 1_000).await;
        fund(&store, UserId(2), 10).await;
        let ledger = Ledger::new(store.clone());
        let mut machine =
            GameMachine::create(store, ledger.clone(), config(20), SEED, None, NOW)
                .await
                .unwrap();

        machine.join(UserId(1), NOW).await.unwrap();
        let err = machine.join(UserId(2), NOW).await.unwrap_err();
        assert!(matches!(
            err,
            GameError::Ledger(LedgerError::InsufficientFunds { .. })
        ));

        // The failed join left no seat and no escrow behind.
        assert_eq!(machine.status(), GameStatus::Waiting);
        assert_eq!(machine.snapshot().seats.len(), 1);
        assert_eq!(ledger.available(UserId(1)).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_roll_enforces_turn_order() {
        let (mut machine, _) = started_game(1_000).await;

        assert!(matches!(
            machine.roll(UserId(2), NOW).await,
            Err(GameError::NotYourTurn)
        ));
        assert!(matches!(
            machine.roll(UserId(77), NOW).await,
            Err(GameError::NotJoined)
        ));

        let snapshot = machine.roll(UserId(1), NOW).await.unwrap();
        assert_eq!(snapshot.turn, Some(UserId(2)));
        let roll = snapshot.last_roll.unwrap();
        assert_eq!(roll.sequence, 1);
        assert!(roll.value >= 1 && roll.value <= 6);
        assert_eq!(roll.position, roll.value as u16);
    }

    #[tokio::test]
    async fn test_turn_cycles_through_roster() {
        let (mut machine, _) = started_game(1_000).await;

        for expected in [UserId(1), UserId(2), UserId(1), UserId(2)] {
            assert_eq!(machine.turn_user(), Some(expected));
            machine.roll(expected, NOW).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_winning_roll_settles_the_pot() {
        // Target 1: the first roll always wins.
        let (mut machine, ledger) = started_game(1).await;

        let snapshot = machine.roll(UserId(1), NOW).await.unwrap();
        assert_eq!(snapshot.status, GameStatus::Completed);
        assert_eq!(snapshot.winner, Some(UserId(1)));

        assert_eq!(ledger.balance_view(UserId(1)).await.unwrap().balance, 1_100);
        assert_eq!(ledger.balance_view(UserId(2)).await.unwrap().balance, 900);

        // The finished game accepts nothing further.
        assert!(matches!(
            machine.roll(UserId(2), NOW).await,
            Err(GameError::WrongStatus { .. })
        ));
    }

    #[tokio::test]
    async fn test_moves_are_recorded_append_only() {
        let (mut machine, _) = started_game(1_000).await;
        machine.roll(UserId(1), NOW).await.unwrap();
        machine.roll(UserId(2), NOW + 1).await.unwrap();

        let rolls = machine.store.rolls(machine.id()).await.unwrap();
        assert_eq!(rolls.len(), 2);
        assert_eq!(rolls[0].sequence, 1);
        assert_eq!(rolls[1].sequence, 2);
        assert_eq!(rolls[0].user, UserId(1));
        assert_eq!(rolls[1].user, UserId(2));
    }

    #[tokio::test]
    async fn test_abandon_mid_game_cancels_and_refunds() {
        let (mut machine, ledger) = started_game(1_000).await;
        machine.roll(UserId(1), NOW).await.unwrap();

        let snapshot = machine.abandon(UserId(2), NOW).await.unwrap();
        assert_eq!(snapshot.status, GameStatus::Cancelled);
        assert_eq!(snapshot.winner, None);

        // Both stakes returned in full.
        assert_eq!(ledger.available(UserId(1)).await.unwrap(), 1_000);
        assert_eq!(ledger.available(UserId(2)).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_abandon_in_lobby_frees_the_seat() {
        let (store, ledger) = two_player_setup().await;
        let mut machine =
            GameMachine::create(store, ledger, config(20), SEED, None, NOW)
                .await
                .unwrap();

        machine.join(UserId(1), NOW).await.unwrap();
        let snapshot = machine.abandon(UserId(1), NOW).await.unwrap();
        assert_eq!(snapshot.status, GameStatus::Waiting);
        assert!(snapshot.seats.is_empty());
    }

    #[tokio::test]
    async fn test_load_rehydrates_persisted_state() {
        let (mut machine, ledger) = started_game(1_000).await;
        machine.roll(UserId(1), NOW).await.unwrap();
        let id = machine.id();
        let store = machine.store.clone();

        let loaded = GameMachine::load(store.clone(), ledger.clone(), config(1_000), SEED, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.snapshot(), machine.snapshot());

        let missing = GameMachine::load(store, ledger, config(1_000), SEED, GameId(404))
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
