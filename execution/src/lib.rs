//! Game session engine and wallet settlement pipeline.
//!
//! This crate holds the deterministic core of the platform:
//! - [`board`] - board rules and the audit-reproducible stone RNG
//! - [`machine`] - the per-game authoritative state machine
//! - [`ledger`] - transaction-log bookkeeping with derived balances
//! - [`withdrawal`] - the admin-gated payout pipeline
//! - [`gateway`] - the payment provider boundary
//! - [`store`] - the durable storage trait the host plugs an engine into
//!
//! Nothing here reads the clock or spawns tasks; timestamps and scheduling
//! are injected by the node layer.

pub mod board;
pub mod gateway;
pub mod ledger;
pub mod machine;
pub mod store;
pub mod withdrawal;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

pub use board::{BoardConfig, BoardConfigError, StoneRng};
pub use gateway::{Gateway, GatewayError, HttpGateway, TransferHandle, TransferStatus};
pub use ledger::{Ledger, LedgerError, SettleKind};
pub use machine::{GameError, GameMachine};
pub use store::{Memory, Store};
pub use withdrawal::{WithdrawalError, WithdrawalPipeline};

#[cfg(test)]
mod integration_tests;
