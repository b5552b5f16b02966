//! Admin-gated withdrawal pipeline.
//!
//! Drives each request through
//! Pending -> {Approved -> Submitted -> {Settled, Failed}, Rejected}.
//! The wallet hold is recorded before the provider is ever contacted and
//! resolved only after the provider answers, so no ledger lock is held
//! across a network call and a slow provider cannot stall anything else.

use thiserror::Error;
use tracing::{debug, info, warn};

use stonerace_types::{
    api::WithdrawalView, BankRecipient, UserId, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};

use crate::gateway::{Gateway, GatewayError, TransferStatus};
use crate::ledger::{Ledger, LedgerError};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("withdrawal {id} not found")]
    NotFound { id: WithdrawalId },
    #[error("{user} is not an admin")]
    NotAuthorized { user: UserId },
    #[error("unknown user {user}")]
    UnknownUser { user: UserId },
    #[error("withdrawal {id} is {status:?}; command not applicable")]
    InvalidStatus {
        id: WithdrawalId,
        status: WithdrawalStatus,
    },
    #[error("amount must be positive")]
    InvalidAmount,
    #[error("could not resolve recipient account: {0}")]
    AccountResolution(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("storage: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl WithdrawalError {
    fn storage<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Storage(Box::new(err))
    }
}

pub struct WithdrawalPipeline<S: Store, G: Gateway> {
    store: S,
    ledger: Ledger<S>,
    gateway: G,
    /// Indeterminate verifications tolerated before a request is flagged
    /// for manual review.
    review_attempts: u32,
}

impl<S: Store, G: Gateway> Clone for WithdrawalPipeline<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            gateway: self.gateway.clone(),
            review_attempts: self.review_attempts,
        }
    }
}

impl<S: Store, G: Gateway> WithdrawalPipeline<S, G> {
    pub fn new(store: S, ledger: Ledger<S>, gateway: G, review_attempts: u32) -> Self {
        Self {
            store,
            ledger,
            gateway,
            review_attempts,
        }
    }

    async fn load(&self, id: WithdrawalId) -> Result<WithdrawalRequest, WithdrawalError> {
        self.store
            .withdrawal(id)
            .await
            .map_err(WithdrawalError::storage)?
            .ok_or(WithdrawalError::NotFound { id })
    }

    async fn require_admin(&self, user: UserId) -> Result<(), WithdrawalError> {
        let account = self
            .store
            .user(user)
            .await
            .map_err(WithdrawalError::storage)?
            .ok_or(WithdrawalError::UnknownUser { user })?;
        if !account.is_admin {
            return Err(WithdrawalError::NotAuthorized { user });
        }
        Ok(())
    }

    /// Open a withdrawal: resolve the destination, place the hold, record
    /// the Pending request.
    pub async fn request(
        &self,
        user: UserId,
        amount: u64,
        account_number: String,
        bank_code: String,
        now: u64,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        if amount == 0 {
            return Err(WithdrawalError::InvalidAmount);
        }
        self.store
            .user(user)
            .await
            .map_err(WithdrawalError::storage)?
            .ok_or(WithdrawalError::UnknownUser { user })?;

        // Resolve the destination before any money moves.
        let account_name = self
            .gateway
            .resolve_account(account_number.clone(), bank_code.clone())
            .await
            .map_err(|err| WithdrawalError::AccountResolution(err.to_string()))?;

        let id = WithdrawalId::generate();
        let recipient = BankRecipient {
            account_number,
            bank_code,
            account_name,
        };
        self.ledger
            .hold_for_withdrawal(user, amount, id, format!("withdrawal-{id}"), now)
            .await?;

        let request = WithdrawalRequest::new(id, user, amount, recipient, now);
        if let Err(err) = self.store.put_withdrawal(request.clone()).await {
            // The request never existed; put the money back.
            self.ledger.refund_withdrawal(user, id, now).await?;
            return Err(WithdrawalError::storage(err));
        }
        info!(withdrawal = %id, %user, amount, "withdrawal requested");
        Ok(request)
    }

    /// Approve and submit to the provider. Accepts Pending requests and
    /// Approved ones whose earlier submission attempt failed in transit.
    pub async fn approve(
        &self,
        id: WithdrawalId,
        admin: UserId,
        now: u64,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        self.require_admin(admin).await?;
        let mut request = self.load(id).await?;
        match request.status {
            WithdrawalStatus::Pending => {
                request.status = WithdrawalStatus::Approved;
                request.updated_at = now;
                self.store
                    .put_withdrawal(request.clone())
                    .await
                    .map_err(WithdrawalError::storage)?;
                info!(withdrawal = %id, %admin, "withdrawal approved");
            }
            WithdrawalStatus::Approved => {}
            status => return Err(WithdrawalError::InvalidStatus { id, status }),
        }
        self.submit(request, now).await
    }

    /// Hand an approved request to the provider. The recorded provider
    /// reference is the dedup key: it is never initiated twice.
    async fn submit(
        &self,
        mut request: WithdrawalRequest,
        now: u64,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        if request.provider_ref.is_none() {
            let handle = self
                .gateway
                .initiate_transfer(
                    request.amount,
                    request.recipient.clone(),
                    request.id.to_string(),
                )
                .await?;
            request.provider_ref = Some(handle.provider_ref);
        }
        request.status = WithdrawalStatus::Submitted;
        request.updated_at = now;
        self.store
            .put_withdrawal(request.clone())
            .await
            .map_err(WithdrawalError::storage)?;
        info!(
            withdrawal = %request.id,
            provider_ref = request.provider_ref.as_deref().unwrap_or(""),
            "transfer submitted"
        );
        Ok(request)
    }

    /// Reject a pending request and release its hold.
    pub async fn reject(
        &self,
        id: WithdrawalId,
        admin: UserId,
        reason: Option<String>,
        now: u64,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        self.require_admin(admin).await?;
        let mut request = self.load(id).await?;
        if request.status != WithdrawalStatus::Pending {
            return Err(WithdrawalError::InvalidStatus {
                id,
                status: request.status,
            });
        }
        self.ledger
            .refund_withdrawal(request.user, id, now)
            .await?;
        request.status = WithdrawalStatus::Rejected;
        request.reason = reason;
        request.updated_at = now;
        self.store
            .put_withdrawal(request.clone())
            .await
            .map_err(WithdrawalError::storage)?;
        info!(withdrawal = %id, %admin, "withdrawal rejected, hold released");
        Ok(request)
    }

    /// Ask the provider for the transfer's fate and apply it.
    ///
    /// Settled converts the hold into a permanent debit; Failed releases
    /// it; Pending leaves the request Submitted with one more attempt on
    /// the counter. A Pending outcome is never escalated to either
    /// terminal state here.
    pub async fn reconcile(
        &self,
        id: WithdrawalId,
        now: u64,
    ) -> Result<WithdrawalRequest, WithdrawalError> {
        let mut request = self.load(id).await?;
        if request.status != WithdrawalStatus::Submitted {
            return Err(WithdrawalError::InvalidStatus {
                id,
                status: request.status,
            });
        }
        let Some(provider_ref) = request.provider_ref.clone() else {
            // Submitted without a reference cannot happen through this
            // pipeline; refuse to guess.
            return Err(WithdrawalError::InvalidStatus {
                id,
                status: request.status,
            });
        };

        match self.gateway.verify_transfer(provider_ref).await {
            TransferStatus::Settled => {
                self.ledger
                    .settle_withdrawal(request.user, id, now)
                    .await?;
                request.status = WithdrawalStatus::Settled;
                request.updated_at = now;
                self.store
                    .put_withdrawal(request.clone())
                    .await
                    .map_err(WithdrawalError::storage)?;
                info!(withdrawal = %id, "transfer settled");
            }
            TransferStatus::Failed(reason) => {
                self.ledger
                    .refund_withdrawal(request.user, id, now)
                    .await?;
                request.status = WithdrawalStatus::Failed;
                request.reason = Some(reason.clone());
                request.updated_at = now;
                self.store
                    .put_withdrawal(request.clone())
                    .await
                    .map_err(WithdrawalError::storage)?;
                warn!(withdrawal = %id, reason, "transfer failed, hold released");
            }
            TransferStatus::Pending => {
                request.verify_attempts += 1;
                request.updated_at = now;
                self.store
                    .put_withdrawal(request.clone())
                    .await
                    .map_err(WithdrawalError::storage)?;
                debug!(
                    withdrawal = %id,
                    attempts = request.verify_attempts,
                    "transfer still pending"
                );
            }
        }
        Ok(request)
    }

    /// Whether a request has exhausted automatic verification and waits on
    /// manual review.
    pub fn needs_review(&self, request: &WithdrawalRequest) -> bool {
        request.status == WithdrawalStatus::Submitted
            && request.verify_attempts >= self.review_attempts
    }

    /// Submitted requests still inside the automatic retry window.
    pub async fn pending_verification(&self) -> Result<Vec<WithdrawalRequest>, WithdrawalError> {
        Ok(self
            .store
            .withdrawals()
            .await
            .map_err(WithdrawalError::storage)?
            .into_iter()
            .filter(|request| {
                request.status == WithdrawalStatus::Submitted && !self.needs_review(request)
            })
            .collect())
    }

    /// Full listing for admin tooling.
    pub async fn list(&self) -> Result<Vec<WithdrawalView>, WithdrawalError> {
        Ok(self
            .store
            .withdrawals()
            .await
            .map_err(WithdrawalError::storage)?
            .into_iter()
            .map(|request| WithdrawalView {
                needs_review: self.needs_review(&request),
                request,
            })
            .collect())
    }
}
