use super::*;
use crate::api::{Command, CommandKind, GameSnapshot, ServerMessage};

fn game_with_players(n: u64) -> Game {
    let mut game = Game::new(GameId(1), DEFAULT_STAKE, 0);
    for i in 0..n {
        game.seats.push(Seat::new(UserId(i + 1)));
    }
    game.status = GameStatus::InProgress;
    game
}

#[test]
fn test_turn_cycles_in_join_order() {
    let mut game = game_with_players(3);

    let mut order = vec![game.turn_user().unwrap()];
    for _ in 0..5 {
        game.advance_turn();
        order.push(game.turn_user().unwrap());
    }

    assert_eq!(
        order,
        vec![
            UserId(1),
            UserId(2),
            UserId(3),
            UserId(1),
            UserId(2),
            UserId(3)
        ]
    );
}

#[test]
fn test_turn_skips_absent_players() {
    let mut game = game_with_players(3);
    game.seats[1].absent = true;

    game.advance_turn();
    assert_eq!(game.turn_user(), Some(UserId(3)));
    game.advance_turn();
    assert_eq!(game.turn_user(), Some(UserId(1)));
}

#[test]
fn test_turn_stays_put_when_all_absent() {
    let mut game = game_with_players(2);
    for seat in &mut game.seats {
        seat.absent = true;
    }

    game.advance_turn();
    assert_eq!(game.turn, 0);
}

#[test]
fn test_pot_is_zero_until_play_begins() {
    let mut game = game_with_players(2);
    game.status = GameStatus::Waiting;
    assert_eq!(game.pot(), 0);

    game.status = GameStatus::InProgress;
    assert_eq!(game.pot(), 2 * DEFAULT_STAKE);
}

#[test]
fn test_status_terminality() {
    assert!(!GameStatus::Waiting.is_terminal());
    assert!(!GameStatus::InProgress.is_terminal());
    assert!(GameStatus::Completed.is_terminal());
    assert!(GameStatus::Cancelled.is_terminal());

    assert!(!WithdrawalStatus::Pending.is_terminal());
    assert!(!WithdrawalStatus::Submitted.is_terminal());
    assert!(WithdrawalStatus::Settled.is_terminal());
    assert!(WithdrawalStatus::Failed.is_terminal());
}

#[test]
fn test_hold_kinds() {
    assert!(TxKind::Escrow.is_hold());
    assert!(TxKind::WithdrawalHold.is_hold());
    assert!(!TxKind::Win.is_hold());

    assert!(TxKind::Win.closes_escrow());
    assert!(TxKind::Loss.closes_escrow());
    assert!(TxKind::Release.closes_escrow());
    assert!(!TxKind::WithdrawalRefund.closes_escrow());
    assert!(TxKind::WithdrawalSettled.closes_withdrawal_hold());
}

#[test]
fn test_command_json_shape() {
    let command = Command {
        game: GameId(7),
        user: UserId(3),
        kind: CommandKind::Roll,
    };

    let json = serde_json::to_value(&command).unwrap();
    assert_eq!(json["game"], 7);
    assert_eq!(json["user"], 3);
    assert_eq!(json["kind"], "roll");

    let back: Command = serde_json::from_value(json).unwrap();
    assert_eq!(back, command);
}

#[test]
fn test_server_message_tagging() {
    let game = game_with_players(2);
    let snapshot = GameSnapshot::of(&game, None);

    let json = serde_json::to_value(ServerMessage::Snapshot(snapshot)).unwrap();
    assert_eq!(json["type"], "snapshot");
    assert_eq!(json["status"], "in_progress");

    let json = serde_json::to_value(ServerMessage::Error {
        message: "not your turn".into(),
    })
    .unwrap();
    assert_eq!(json["type"], "error");
    assert_eq!(json["message"], "not your turn");
}
