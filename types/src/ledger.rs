use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{GameId, UserId, WithdrawalId};

/// Identifier for a ledger transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub Uuid);

impl TxId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of ledger entries.
///
/// Escrow and WithdrawalHold are holds: their (negative) amount is excluded
/// from the displayed balance until a matching settlement entry closes them,
/// but always counts against available funds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Escrow,
    Release,
    Win,
    Loss,
    WithdrawalHold,
    WithdrawalSettled,
    WithdrawalRefund,
    AdminAdjustment,
}

impl TxKind {
    pub fn is_hold(&self) -> bool {
        matches!(self, TxKind::Escrow | TxKind::WithdrawalHold)
    }

    /// Whether an entry of this kind settles a prior game escrow.
    pub fn closes_escrow(&self) -> bool {
        matches!(self, TxKind::Release | TxKind::Win | TxKind::Loss)
    }

    /// Whether an entry of this kind settles a prior withdrawal hold.
    pub fn closes_withdrawal_hold(&self) -> bool {
        matches!(self, TxKind::WithdrawalSettled | TxKind::WithdrawalRefund)
    }
}

/// An append-only ledger entry. The transaction log is the source of truth
/// for every balance; no balance is ever stored independently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub user: UserId,
    pub kind: TxKind,
    /// Signed amount in minor currency units.
    pub amount: i64,
    pub game: Option<GameId>,
    pub withdrawal: Option<WithdrawalId>,
    pub at: u64,
    pub idempotency_key: String,
}

/// Derived wallet projection.
///
/// `available` is the spendable sum of all entries; `balance` adds back
/// holds that have not yet settled; `held` is the difference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub balance: i64,
    pub held: i64,
    pub available: i64,
}
