//! Background reconciliation of submitted withdrawals.

use std::time::Duration;

use stonerace_execution::{Gateway, Store, WithdrawalPipeline};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::now_ms;

/// Sweep Submitted withdrawals on a fixed cadence, verifying each against
/// the provider.
///
/// Requests flagged for manual review have left the automatic window and
/// are skipped; an indeterminate outcome simply stays Submitted until the
/// next sweep. Errors are logged and never stop the loop.
pub fn spawn<S: Store, G: Gateway>(
    pipeline: WithdrawalPipeline<S, G>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let pending = match pipeline.pending_verification().await {
                Ok(pending) => pending,
                Err(err) => {
                    warn!(error = %err, "could not list submitted withdrawals");
                    continue;
                }
            };
            if pending.is_empty() {
                continue;
            }
            debug!(count = pending.len(), "reconciling submitted withdrawals");
            for request in pending {
                if let Err(err) = pipeline.reconcile(request.id, now_ms()).await {
                    warn!(withdrawal = %request.id, error = %err, "reconciliation failed");
                }
            }
        }
    })
}
