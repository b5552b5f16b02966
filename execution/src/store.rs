//! Durable storage boundary.
//!
//! The surrounding deployment chooses the storage engine; the engine code
//! only relies on this trait. [`Memory`] keeps everything in process and
//! backs tests and local runs.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use stonerace_types::{
    Game, GameId, StoneRoll, Transaction, User, UserId, WithdrawalId, WithdrawalRequest,
};

/// Persistence operations the engine needs. Implementations must be cheap
/// to clone (a handle, not the data).
pub trait Store: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn user(&self, id: UserId) -> impl Future<Output = Result<Option<User>, Self::Error>> + Send;
    fn put_user(&self, user: User) -> impl Future<Output = Result<(), Self::Error>> + Send;
    fn next_user_id(&self) -> impl Future<Output = Result<UserId, Self::Error>> + Send;

    fn game(&self, id: GameId) -> impl Future<Output = Result<Option<Game>, Self::Error>> + Send;
    fn put_game(&self, game: Game) -> impl Future<Output = Result<(), Self::Error>> + Send;
    fn next_game_id(&self) -> impl Future<Output = Result<GameId, Self::Error>> + Send;

    /// Append a roll record. Re-appending an existing (game, sequence) pair
    /// must be a no-op so an interrupted command can be retried safely.
    fn append_roll(&self, roll: StoneRoll) -> impl Future<Output = Result<(), Self::Error>> + Send;
    fn rolls(&self, game: GameId)
        -> impl Future<Output = Result<Vec<StoneRoll>, Self::Error>> + Send;

    fn append_transaction(
        &self,
        tx: Transaction,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
    /// A user's ledger entries in append order.
    fn transactions(
        &self,
        user: UserId,
    ) -> impl Future<Output = Result<Vec<Transaction>, Self::Error>> + Send;
    fn transaction_by_key(
        &self,
        user: UserId,
        key: String,
    ) -> impl Future<Output = Result<Option<Transaction>, Self::Error>> + Send;

    fn withdrawal(
        &self,
        id: WithdrawalId,
    ) -> impl Future<Output = Result<Option<WithdrawalRequest>, Self::Error>> + Send;
    fn put_withdrawal(
        &self,
        request: WithdrawalRequest,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
    fn withdrawals(
        &self,
    ) -> impl Future<Output = Result<Vec<WithdrawalRequest>, Self::Error>> + Send;
}

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    next_user: u64,
    games: HashMap<GameId, Game>,
    next_game: u64,
    rolls: HashMap<GameId, Vec<StoneRoll>>,
    transactions: Vec<Transaction>,
    withdrawals: HashMap<WithdrawalId, WithdrawalRequest>,
}

/// In-process store for tests and local runs.
#[derive(Clone, Default)]
pub struct Memory {
    inner: Arc<RwLock<Inner>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Store for Memory {
    type Error = Infallible;

    async fn user(&self, id: UserId) -> Result<Option<User>, Self::Error> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn put_user(&self, user: User) -> Result<(), Self::Error> {
        self.write().users.insert(user.id, user);
        Ok(())
    }

    async fn next_user_id(&self) -> Result<UserId, Self::Error> {
        let mut inner = self.write();
        inner.next_user += 1;
        Ok(UserId(inner.next_user))
    }

    async fn game(&self, id: GameId) -> Result<Option<Game>, Self::Error> {
        Ok(self.read().games.get(&id).cloned())
    }

    async fn put_game(&self, game: Game) -> Result<(), Self::Error> {
        self.write().games.insert(game.id, game);
        Ok(())
    }

    async fn next_game_id(&self) -> Result<GameId, Self::Error> {
        let mut inner = self.write();
        inner.next_game += 1;
        Ok(GameId(inner.next_game))
    }

    async fn append_roll(&self, roll: StoneRoll) -> Result<(), Self::Error> {
        let mut inner = self.write();
        let rolls = inner.rolls.entry(roll.game).or_default();
        if rolls.iter().any(|existing| existing.sequence == roll.sequence) {
            return Ok(());
        }
        rolls.push(roll);
        Ok(())
    }

    async fn rolls(&self, game: GameId) -> Result<Vec<StoneRoll>, Self::Error> {
        Ok(self.read().rolls.get(&game).cloned().unwrap_or_default())
    }

    async fn append_transaction(&self, tx: Transaction) -> Result<(), Self::Error> {
        self.write().transactions.push(tx);
        Ok(())
    }

    async fn transactions(&self, user: UserId) -> Result<Vec<Transaction>, Self::Error> {
        Ok(self
            .read()
            .transactions
            .iter()
            .filter(|tx| tx.user == user)
            .cloned()
            .collect())
    }

    async fn transaction_by_key(
        &self,
        user: UserId,
        key: String,
    ) -> Result<Option<Transaction>, Self::Error> {
        Ok(self
            .read()
            .transactions
            .iter()
            .find(|tx| tx.user == user && tx.idempotency_key == key)
            .cloned())
    }

    async fn withdrawal(&self, id: WithdrawalId) -> Result<Option<WithdrawalRequest>, Self::Error> {
        Ok(self.read().withdrawals.get(&id).cloned())
    }

    async fn put_withdrawal(&self, request: WithdrawalRequest) -> Result<(), Self::Error> {
        self.write().withdrawals.insert(request.id, request);
        Ok(())
    }

    async fn withdrawals(&self) -> Result<Vec<WithdrawalRequest>, Self::Error> {
        let mut all: Vec<WithdrawalRequest> = self.read().withdrawals.values().cloned().collect();
        all.sort_by_key(|request| request.created_at);
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stonerace_types::{TxId, TxKind};

    #[tokio::test]
    async fn test_roll_append_is_idempotent_per_sequence() {
        let store = Memory::new();
        let roll = StoneRoll {
            game: GameId(1),
            user: UserId(1),
            sequence: 1,
            value: 4,
            position: 4,
            at: 0,
        };

        store.append_roll(roll.clone()).await.unwrap();
        store.append_roll(roll).await.unwrap();

        assert_eq!(store.rolls(GameId(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_transaction_lookup_by_key() {
        let store = Memory::new();
        let tx = Transaction {
            id: TxId::generate(),
            user: UserId(1),
            kind: TxKind::AdminAdjustment,
            amount: 500,
            game: None,
            withdrawal: None,
            at: 0,
            idempotency_key: "seed".into(),
        };
        store.append_transaction(tx.clone()).await.unwrap();

        let found = store
            .transaction_by_key(UserId(1), "seed".into())
            .await
            .unwrap();
        assert_eq!(found, Some(tx));

        let missing = store
            .transaction_by_key(UserId(2), "seed".into())
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_id_sequences_are_monotonic() {
        let store = Memory::new();
        assert_eq!(store.next_game_id().await.unwrap(), GameId(1));
        assert_eq!(store.next_game_id().await.unwrap(), GameId(2));
        assert_eq!(store.next_user_id().await.unwrap(), UserId(1));
    }
}
