//! Atomic balance and transaction bookkeeping.
//!
//! The transaction log is ground truth; every balance is a derived sum.
//! Holds (game escrow, withdrawal holds) debit available funds the moment
//! they are recorded and are excluded from the displayed balance until a
//! settlement entry closes them.
//!
//! Concurrency discipline: all mutating operations for one user serialize
//! through that user's critical section. Multi-user settlements acquire
//! the involved locks in ascending user-id order, so two settlements can
//! never deadlock each other.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use stonerace_types::{
    BalanceView, GameId, Transaction, TxId, TxKind, UserId, WithdrawalId,
};

use crate::store::Store;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient funds for {user}: available {available}, requested {requested}")]
    InsufficientFunds {
        user: UserId,
        available: i64,
        requested: i64,
    },
    #[error("no open escrow for {user} in game {game}")]
    MissingEscrow { user: UserId, game: GameId },
    #[error("escrow for {user} in game {game} already settled")]
    EscrowAlreadySettled { user: UserId, game: GameId },
    #[error("release amount does not match escrow for {user} in game {game}")]
    ReleaseMismatch { user: UserId, game: GameId },
    #[error("no hold recorded for withdrawal {withdrawal}")]
    MissingHold { withdrawal: WithdrawalId },
    #[error("hold for withdrawal {withdrawal} already resolved")]
    HoldAlreadyResolved { withdrawal: WithdrawalId },
    #[error("{user} is not an admin")]
    NotAuthorized { user: UserId },
    #[error("unknown user {user}")]
    UnknownUser { user: UserId },
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("storage: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    fn storage<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Storage(Box::new(err))
    }
}

/// How a game escrow settles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleKind {
    /// Stake returned on cancellation.
    Release,
    /// Winner paid the pot.
    Win,
    /// Escrow consumed; the stake stays in the pot.
    Loss,
}

impl SettleKind {
    fn tx_kind(self) -> TxKind {
        match self {
            SettleKind::Release => TxKind::Release,
            SettleKind::Win => TxKind::Win,
            SettleKind::Loss => TxKind::Loss,
        }
    }
}

/// Sum of a user's hold entries that no later entry has settled. Hold
/// amounts are negative in the log, so the result is a positive magnitude.
fn held_amount(txs: &[Transaction]) -> i64 {
    let mut held = 0;
    for tx in txs {
        let open = match tx.kind {
            TxKind::Escrow => !txs
                .iter()
                .any(|other| other.kind.closes_escrow() && other.game == tx.game),
            TxKind::WithdrawalHold => !txs
                .iter()
                .any(|other| other.kind.closes_withdrawal_hold() && other.withdrawal == tx.withdrawal),
            _ => false,
        };
        if open {
            held -= tx.amount;
        }
    }
    held
}

pub struct Ledger<S: Store> {
    store: S,
    locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl<S: Store> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: Store> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Lazily created critical section for one user's ledger entries.
    async fn user_lock(&self, user: UserId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Derived wallet projection for a user.
    pub async fn balance_view(&self, user: UserId) -> Result<BalanceView, LedgerError> {
        let txs = self
            .store
            .transactions(user)
            .await
            .map_err(LedgerError::storage)?;
        let available: i64 = txs.iter().map(|tx| tx.amount).sum();
        let held = held_amount(&txs);
        Ok(BalanceView {
            balance: available + held,
            held,
            available,
        })
    }

    /// Spendable funds: the plain sum of every entry.
    pub async fn available(&self, user: UserId) -> Result<i64, LedgerError> {
        Ok(self.balance_view(user).await?.available)
    }

    /// A user's ledger entries in append order.
    pub async fn transactions(&self, user: UserId) -> Result<Vec<Transaction>, LedgerError> {
        self.store
            .transactions(user)
            .await
            .map_err(LedgerError::storage)
    }

    /// Place a stake hold against a game. Idempotent: a replay with the
    /// same key returns the original entry and changes nothing.
    pub async fn escrow(
        &self,
        user: UserId,
        amount: u64,
        game: GameId,
        key: String,
        now: u64,
    ) -> Result<Transaction, LedgerError> {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;
        self.hold_locked(user, amount, TxKind::Escrow, Some(game), None, key, now)
            .await
    }

    /// Place a withdrawal hold. Same idempotency contract as [`escrow`].
    ///
    /// [`escrow`]: Self::escrow
    pub async fn hold_for_withdrawal(
        &self,
        user: UserId,
        amount: u64,
        withdrawal: WithdrawalId,
        key: String,
        now: u64,
    ) -> Result<Transaction, LedgerError> {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;
        self.hold_locked(
            user,
            amount,
            TxKind::WithdrawalHold,
            None,
            Some(withdrawal),
            key,
            now,
        )
        .await
    }

    /// Caller must hold the user's critical section.
    async fn hold_locked(
        &self,
        user: UserId,
        amount: u64,
        kind: TxKind,
        game: Option<GameId>,
        withdrawal: Option<WithdrawalId>,
        key: String,
        now: u64,
    ) -> Result<Transaction, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if let Some(existing) = self
            .store
            .transaction_by_key(user, key.clone())
            .await
            .map_err(LedgerError::storage)?
        {
            debug!(%user, key, "replayed hold, returning original entry");
            return Ok(existing);
        }

        let txs = self
            .store
            .transactions(user)
            .await
            .map_err(LedgerError::storage)?;
        let available: i64 = txs.iter().map(|tx| tx.amount).sum();
        let requested = amount as i64;
        if available < requested {
            return Err(LedgerError::InsufficientFunds {
                user,
                available,
                requested,
            });
        }

        let tx = Transaction {
            id: TxId::generate(),
            user,
            kind,
            amount: -requested,
            game,
            withdrawal,
            at: now,
            idempotency_key: key,
        };
        self.store
            .append_transaction(tx.clone())
            .await
            .map_err(LedgerError::storage)?;
        debug!(%user, ?kind, amount, "hold recorded");
        Ok(tx)
    }

    /// Escrow the stake of every seated player, all or nothing.
    ///
    /// Every balance is checked before any entry is written, under all the
    /// involved user locks, so a shortfall rejects the whole roster with
    /// nothing applied. Entries already written by an interrupted earlier
    /// attempt are recognized by key and skipped, making retries converge.
    pub async fn escrow_roster(
        &self,
        game: GameId,
        stake: u64,
        users: &[UserId],
        now: u64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        if stake == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let mut ordered = users.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        // Ascending user-id order, the fixed global lock order.
        let mut guards = Vec::with_capacity(ordered.len());
        for user in &ordered {
            guards.push(self.user_lock(*user).await.lock_owned().await);
        }

        for user in &ordered {
            let key = escrow_key(game, *user);
            if self
                .store
                .transaction_by_key(*user, key)
                .await
                .map_err(LedgerError::storage)?
                .is_some()
            {
                continue;
            }
            let available = self.available(*user).await?;
            if available < stake as i64 {
                return Err(LedgerError::InsufficientFunds {
                    user: *user,
                    available,
                    requested: stake as i64,
                });
            }
        }

        let mut applied = Vec::with_capacity(ordered.len());
        for user in &ordered {
            let tx = self
                .hold_locked(
                    *user,
                    stake,
                    TxKind::Escrow,
                    Some(game),
                    None,
                    escrow_key(game, *user),
                    now,
                )
                .await?;
            applied.push(tx);
        }
        info!(%game, stake, players = ordered.len(), "roster stakes escrowed");
        Ok(applied)
    }

    /// Settle every escrow of a finished or cancelled game in one call.
    ///
    /// Each entry pairs with the user's open escrow for the game (verified
    /// by lookup, not by trust) and nothing is written unless every entry
    /// is applicable. A full replay (every escrow already closed by the
    /// same kind) is a no-op success so interrupted settlements can be
    /// retried; a partial or conflicting replay is an integrity error.
    pub async fn settle_game(
        &self,
        game: GameId,
        entries: &[(UserId, SettleKind, u64)],
        now: u64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut ordered: Vec<UserId> = entries.iter().map(|(user, _, _)| *user).collect();
        ordered.sort_unstable();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for user in &ordered {
            guards.push(self.user_lock(*user).await.lock_owned().await);
        }

        let mut replayed = 0;
        for (user, kind, credit) in entries {
            let txs = self
                .store
                .transactions(*user)
                .await
                .map_err(LedgerError::storage)?;
            let escrow = txs
                .iter()
                .find(|tx| tx.kind == TxKind::Escrow && tx.game == Some(game))
                .ok_or(LedgerError::MissingEscrow { user: *user, game })?;
            if let Some(closing) = txs
                .iter()
                .find(|tx| tx.kind.closes_escrow() && tx.game == Some(game))
            {
                if closing.kind == kind.tx_kind() && closing.amount == *credit as i64 {
                    replayed += 1;
                    continue;
                }
                return Err(LedgerError::EscrowAlreadySettled { user: *user, game });
            }
            if *kind == SettleKind::Release && *credit as i64 != -escrow.amount {
                return Err(LedgerError::ReleaseMismatch { user: *user, game });
            }
        }
        if replayed == entries.len() {
            debug!(%game, "settlement already applied");
            return Ok(Vec::new());
        }
        if replayed != 0 {
            // Some escrows closed, some open: a prior run cannot have done
            // this, so the log has been tampered with or corrupted.
            let (user, _, _) = entries[0];
            return Err(LedgerError::EscrowAlreadySettled { user, game });
        }

        let mut applied = Vec::with_capacity(entries.len());
        for (user, kind, credit) in entries {
            let tx = Transaction {
                id: TxId::generate(),
                user: *user,
                kind: kind.tx_kind(),
                amount: *credit as i64,
                game: Some(game),
                withdrawal: None,
                at: now,
                idempotency_key: settle_key(game, *user),
            };
            self.store
                .append_transaction(tx.clone())
                .await
                .map_err(LedgerError::storage)?;
            applied.push(tx);
        }
        info!(%game, entries = applied.len(), "game settled");
        Ok(applied)
    }

    /// Convert a withdrawal hold into a permanent debit. Replays are no-op
    /// successes; a hold already refunded is an integrity error.
    pub async fn settle_withdrawal(
        &self,
        user: UserId,
        withdrawal: WithdrawalId,
        now: u64,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.close_withdrawal_hold(user, withdrawal, TxKind::WithdrawalSettled, now)
            .await
    }

    /// Release a withdrawal hold back to the wallet. Replays are no-op
    /// successes; a hold already settled is an integrity error.
    pub async fn refund_withdrawal(
        &self,
        user: UserId,
        withdrawal: WithdrawalId,
        now: u64,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.close_withdrawal_hold(user, withdrawal, TxKind::WithdrawalRefund, now)
            .await
    }

    async fn close_withdrawal_hold(
        &self,
        user: UserId,
        withdrawal: WithdrawalId,
        kind: TxKind,
        now: u64,
    ) -> Result<Option<Transaction>, LedgerError> {
        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;

        let txs = self
            .store
            .transactions(user)
            .await
            .map_err(LedgerError::storage)?;
        let hold = txs
            .iter()
            .find(|tx| tx.kind == TxKind::WithdrawalHold && tx.withdrawal == Some(withdrawal))
            .ok_or(LedgerError::MissingHold { withdrawal })?;
        if let Some(closing) = txs
            .iter()
            .find(|tx| tx.kind.closes_withdrawal_hold() && tx.withdrawal == Some(withdrawal))
        {
            if closing.kind == kind {
                return Ok(None);
            }
            return Err(LedgerError::HoldAlreadyResolved { withdrawal });
        }

        // Settling keeps the held debit; refunding credits it back.
        let amount = match kind {
            TxKind::WithdrawalRefund => -hold.amount,
            _ => 0,
        };
        let tx = Transaction {
            id: TxId::generate(),
            user,
            kind,
            amount,
            game: None,
            withdrawal: Some(withdrawal),
            at: now,
            idempotency_key: format!("{}-{withdrawal}", withdrawal_key_prefix(kind)),
        };
        self.store
            .append_transaction(tx.clone())
            .await
            .map_err(LedgerError::storage)?;
        info!(%user, %withdrawal, ?kind, "withdrawal hold closed");
        Ok(Some(tx))
    }

    /// Admin-only direct balance change, always logged. The adjustment may
    /// not push available funds below zero.
    pub async fn adjust(
        &self,
        admin: UserId,
        user: UserId,
        amount: i64,
        reason: &str,
        now: u64,
    ) -> Result<Transaction, LedgerError> {
        let admin_user = self
            .store
            .user(admin)
            .await
            .map_err(LedgerError::storage)?
            .ok_or(LedgerError::UnknownUser { user: admin })?;
        if !admin_user.is_admin {
            return Err(LedgerError::NotAuthorized { user: admin });
        }
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        self.store
            .user(user)
            .await
            .map_err(LedgerError::storage)?
            .ok_or(LedgerError::UnknownUser { user })?;

        let lock = self.user_lock(user).await;
        let _guard = lock.lock().await;

        let available = self.available(user).await?;
        if available + amount < 0 {
            return Err(LedgerError::InsufficientFunds {
                user,
                available,
                requested: -amount,
            });
        }

        let tx = Transaction {
            id: TxId::generate(),
            user,
            kind: TxKind::AdminAdjustment,
            amount,
            game: None,
            withdrawal: None,
            at: now,
            idempotency_key: format!("adjust-{}", TxId::generate()),
        };
        self.store
            .append_transaction(tx.clone())
            .await
            .map_err(LedgerError::storage)?;
        info!(%admin, %user, amount, reason, "admin adjustment applied");
        Ok(tx)
    }
}

fn escrow_key(game: GameId, user: UserId) -> String {
    format!("escrow-{game}-{user}")
}

fn settle_key(game: GameId, user: UserId) -> String {
    format!("settle-{game}-{user}")
}

fn withdrawal_key_prefix(kind: TxKind) -> &'static str {
    match kind {
        TxKind::WithdrawalRefund => "refund",
        _ => "settle-withdrawal",
    }
}
