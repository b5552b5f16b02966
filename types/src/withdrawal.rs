use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Identifier for a withdrawal request. Doubles as the idempotency key sent
/// to the payment provider, so a resubmission can never create a second
/// transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WithdrawalId(pub Uuid);

impl WithdrawalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a withdrawal request:
/// Pending -> {Approved -> Submitted -> {Settled, Failed}, Rejected}.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Submitted,
    Settled,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Rejected | WithdrawalStatus::Settled | WithdrawalStatus::Failed
        )
    }
}

/// Destination bank account for a transfer, with the provider-resolved
/// account name captured at request time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankRecipient {
    pub account_number: String,
    pub bank_code: String,
    pub account_name: String,
}

/// A user's request to move wallet funds out through the payment provider.
///
/// Created by user action; transitioned only by admin action or provider
/// reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user: UserId,
    /// Minor currency units; held against the wallet from request time.
    pub amount: u64,
    pub recipient: BankRecipient,
    pub status: WithdrawalStatus,
    /// The provider's identifier for the transfer. None until submitted.
    pub provider_ref: Option<String>,
    /// Indeterminate verification outcomes observed so far.
    pub verify_attempts: u32,
    pub reason: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl WithdrawalRequest {
    pub fn new(
        id: WithdrawalId,
        user: UserId,
        amount: u64,
        recipient: BankRecipient,
        now: u64,
    ) -> Self {
        Self {
            id,
            user,
            amount,
            recipient,
            status: WithdrawalStatus::Pending,
            provider_ref: None,
            verify_attempts: 0,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
