//! Test fixtures: a scripted payment provider and seeded-store helpers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stonerace_types::{BankRecipient, Transaction, TxId, TxKind, User, UserId};

use crate::gateway::{Gateway, GatewayError, TransferHandle, TransferStatus};
use crate::store::{Memory, Store};

#[derive(Default)]
struct ScriptedInner {
    next_ref: u64,
    /// Idempotency key -> provider reference, for dedup.
    by_key: HashMap<String, String>,
    verifications: HashMap<String, TransferStatus>,
    fail_initiate: bool,
    reject_resolution: bool,
    /// (provider reference, amount) in initiation order.
    initiated: Vec<(String, u64)>,
}

/// Programmable in-memory payment provider.
///
/// Deduplicates initiations by idempotency key like the real provider and
/// answers every verification with `Pending` unless scripted otherwise.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    inner: Arc<Mutex<ScriptedInner>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_verification(&self, provider_ref: &str, status: TransferStatus) {
        self.inner
            .lock()
            .unwrap()
            .verifications
            .insert(provider_ref.to_string(), status);
    }

    pub fn fail_initiations(&self, fail: bool) {
        self.inner.lock().unwrap().fail_initiate = fail;
    }

    pub fn reject_resolutions(&self, reject: bool) {
        self.inner.lock().unwrap().reject_resolution = reject;
    }

    pub fn initiated(&self) -> Vec<(String, u64)> {
        self.inner.lock().unwrap().initiated.clone()
    }
}

impl Gateway for ScriptedGateway {
    async fn initiate_transfer(
        &self,
        amount: u64,
        _recipient: BankRecipient,
        idempotency_key: String,
    ) -> Result<TransferHandle, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_initiate {
            return Err(GatewayError::Transport("scripted outage".to_string()));
        }
        if let Some(provider_ref) = inner.by_key.get(&idempotency_key) {
            return Ok(TransferHandle {
                provider_ref: provider_ref.clone(),
            });
        }
        inner.next_ref += 1;
        let provider_ref = format!("MOCK-{}", inner.next_ref);
        inner.by_key.insert(idempotency_key, provider_ref.clone());
        inner.initiated.push((provider_ref.clone(), amount));
        Ok(TransferHandle { provider_ref })
    }

    async fn verify_transfer(&self, provider_ref: String) -> TransferStatus {
        self.inner
            .lock()
            .unwrap()
            .verifications
            .get(&provider_ref)
            .cloned()
            .unwrap_or(TransferStatus::Pending)
    }

    async fn resolve_account(
        &self,
        account_number: String,
        _bank_code: String,
    ) -> Result<String, GatewayError> {
        if self.inner.lock().unwrap().reject_resolution {
            return Err(GatewayError::Rejected("unknown account".to_string()));
        }
        Ok(format!("MOCK HOLDER {account_number}"))
    }
}

/// A memory store with the given (id, name) users registered.
pub async fn seeded_store(players: &[(u64, &str)]) -> Memory {
    let store = Memory::new();
    for (id, name) in players {
        store
            .put_user(User::new(UserId(*id), name.to_string()))
            .await
            .expect("memory store is infallible");
    }
    store
}

/// Register an admin account.
pub async fn seeded_admin(store: &Memory, id: u64, name: &str) -> User {
    let mut user = User::new(UserId(id), name.to_string());
    user.is_admin = true;
    store
        .put_user(user.clone())
        .await
        .expect("memory store is infallible");
    user
}

/// Credit a wallet directly through an adjustment entry, bypassing the
/// ledger's admin gate.
pub async fn fund(store: &Memory, user: UserId, amount: i64) {
    let tx = Transaction {
        id: TxId::generate(),
        user,
        kind: TxKind::AdminAdjustment,
        amount,
        game: None,
        withdrawal: None,
        at: 0,
        idempotency_key: format!("fund-{user}-{}", TxId::generate()),
    };
    store
        .append_transaction(tx)
        .await
        .expect("memory store is infallible");
}
