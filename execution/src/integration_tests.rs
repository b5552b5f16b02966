//! End-to-end flows across the engine: game settlement and the withdrawal
//! pipeline running against the same wallets.

use stonerace_types::{GameStatus, TxKind, UserId, WithdrawalStatus};

use crate::board::BoardConfig;
use crate::gateway::TransferStatus;
use crate::ledger::Ledger;
use crate::machine::GameMachine;
use crate::mocks::{fund, seeded_admin, seeded_store, ScriptedGateway};
use crate::store::Memory;
use crate::withdrawal::WithdrawalPipeline;

const NOW: u64 = 1_000;
const SEED: u64 = 7;
const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const ADMIN: UserId = UserId(9);

async fn platform() -> (
    Memory,
    Ledger<Memory>,
    WithdrawalPipeline<Memory, ScriptedGateway>,
    ScriptedGateway,
) {
    let store = seeded_store(&[(1, "alice"), (2, "bob")]).await;
    seeded_admin(&store, 9, "ops").await;
    fund(&store, ALICE, 1_000).await;
    fund(&store, BOB, 1_000).await;
    let ledger = Ledger::new(store.clone());
    let gateway = ScriptedGateway::new();
    let pipeline = WithdrawalPipeline::new(store.clone(), ledger.clone(), gateway.clone(), 3);
    (store, ledger, pipeline, gateway)
}

fn short_board() -> BoardConfig {
    BoardConfig {
        roster_size: 2,
        target_position: 4,
        stone_faces: vec![1, 2, 3, 4, 5, 6],
        stake: 100,
    }
}

#[tokio::test]
async fn test_full_game_then_withdrawal_of_winnings() {
    let (store, ledger, pipeline, gateway) = platform().await;

    // Play a short game to completion.
    let mut machine = GameMachine::create(
        store.clone(),
        ledger.clone(),
        short_board(),
        SEED,
        None,
        NOW,
    )
    .await
    .unwrap();
    machine.join(ALICE, NOW).await.unwrap();
    machine.join(BOB, NOW).await.unwrap();

    let mut now = NOW;
    while machine.status() == GameStatus::InProgress {
        let turn = machine.turn_user().unwrap();
        now += 1;
        machine.roll(turn, now).await.unwrap();
    }

    let snapshot = machine.snapshot();
    let winner = snapshot.winner.unwrap();
    let loser = if winner == ALICE { BOB } else { ALICE };
    assert_eq!(
        ledger.balance_view(winner).await.unwrap().balance,
        1_100
    );
    assert_eq!(ledger.balance_view(loser).await.unwrap().balance, 900);

    // The winner withdraws the profit.
    let request = pipeline
        .request(winner, 100, "0011223344".into(), "058".into(), now)
        .await
        .unwrap();
    let submitted = pipeline.approve(request.id, ADMIN, now).await.unwrap();
    gateway.set_verification(
        submitted.provider_ref.as_deref().unwrap(),
        TransferStatus::Settled,
    );
    let settled = pipeline.reconcile(request.id, now).await.unwrap();

    assert_eq!(settled.status, WithdrawalStatus::Settled);
    assert_eq!(
        ledger.balance_view(winner).await.unwrap().balance,
        1_000
    );
}

#[tokio::test]
async fn test_game_value_is_conserved_across_many_games() {
    let (store, ledger, _, _) = platform().await;

    for round in 0..5 {
        let mut machine = GameMachine::create(
            store.clone(),
            ledger.clone(),
            short_board(),
            SEED + round,
            None,
            NOW,
        )
        .await
        .unwrap();
        machine.join(ALICE, NOW).await.unwrap();
        machine.join(BOB, NOW).await.unwrap();

        let mut now = NOW;
        while machine.status() == GameStatus::InProgress {
            let turn = machine.turn_user().unwrap();
            now += 1;
            machine.roll(turn, now).await.unwrap();
        }
    }

    // Whatever the outcomes, no value appeared or vanished.
    let total = ledger.available(ALICE).await.unwrap() + ledger.available(BOB).await.unwrap();
    assert_eq!(total, 2_000);
}

#[tokio::test]
async fn test_withdrawal_hold_blocks_game_stakes() {
    let (store, ledger, pipeline, _) = platform().await;

    // Alice locks up most of her wallet in a withdrawal.
    pipeline
        .request(ALICE, 950, "0011223344".into(), "058".into(), NOW)
        .await
        .unwrap();

    // She can no longer cover a game stake, so the join that would start
    // the game is rejected and Bob's wallet is untouched.
    let mut machine = GameMachine::create(
        store.clone(),
        ledger.clone(),
        short_board(),
        SEED,
        None,
        NOW,
    )
    .await
    .unwrap();
    machine.join(BOB, NOW).await.unwrap();
    let err = machine.join(ALICE, NOW).await.unwrap_err();
    assert!(matches!(err, crate::machine::GameError::Ledger(_)));
    assert_eq!(machine.status(), GameStatus::Waiting);
    assert_eq!(ledger.available(BOB).await.unwrap(), 1_000);
}

#[tokio::test]
async fn test_ledger_log_matches_balances_throughout() {
    let (_store, ledger, pipeline, gateway) = platform().await;

    let request = pipeline
        .request(ALICE, 300, "0011223344".into(), "058".into(), NOW)
        .await
        .unwrap();
    let submitted = pipeline.approve(request.id, ADMIN, NOW).await.unwrap();
    gateway.set_verification(
        submitted.provider_ref.as_deref().unwrap(),
        TransferStatus::Failed("reversed".into()),
    );
    pipeline.reconcile(request.id, NOW).await.unwrap();

    // The log replays to the balance: hold then refund nets to zero on top
    // of the original funding entry.
    let txs = ledger.transactions(ALICE).await.unwrap();
    let kinds: Vec<TxKind> = txs.iter().map(|tx| tx.kind).collect();
    assert_eq!(
        kinds,
        vec![
            TxKind::AdminAdjustment,
            TxKind::WithdrawalHold,
            TxKind::WithdrawalRefund
        ]
    );
    let sum: i64 = txs.iter().map(|tx| tx.amount).sum();
    assert_eq!(sum, ledger.available(ALICE).await.unwrap());
    assert_eq!(sum, 1_000);
}
