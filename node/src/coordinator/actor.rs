use std::time::Duration;

use stonerace_execution::{GameMachine, Store};
use stonerace_types::api::ServerMessage;
use stonerace_types::GameStatus;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::ingress::{Mailbox, Message, SessionError};
use crate::now_ms;

/// Capacity of the per-game snapshot broadcast.
const UPDATES_CAPACITY: usize = 64;

/// One actor per live game.
///
/// Applies commands strictly in arrival order, broadcasts each resulting
/// snapshot, force-abandons the turn holder after the inactivity window,
/// and exits once the game has been idle long enough. Persisted state
/// remains in the store and the coordinator respawns the actor on the next
/// reference.
pub(super) struct Actor<S: Store> {
    machine: GameMachine<S>,
    mailbox: mpsc::Receiver<Message>,
    updates: broadcast::Sender<ServerMessage>,
    turn_timeout: Duration,
    evict_after: Duration,
}

impl<S: Store> Actor<S> {
    pub(super) fn new(
        machine: GameMachine<S>,
        turn_timeout: Duration,
        evict_after: Duration,
        mailbox_size: usize,
    ) -> (Self, Mailbox, broadcast::Sender<ServerMessage>) {
        let (sender, mailbox) = mpsc::channel(mailbox_size);
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        (
            Self {
                machine,
                mailbox,
                updates: updates.clone(),
                turn_timeout,
                evict_after,
            },
            Mailbox::new(sender),
            updates,
        )
    }

    pub(super) async fn run(mut self) {
        let game = self.machine.id();
        debug!(%game, "session actor started");
        loop {
            let deadline = match self.machine.status() {
                GameStatus::InProgress => self.turn_timeout,
                _ => self.evict_after,
            };
            tokio::select! {
                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    match message {
                        Message::Command { command, at, response } => {
                            match self.machine.apply(command.kind, command.user, at).await {
                                Ok(snapshot) => {
                                    // Successes go to every subscriber; the
                                    // submitter also gets the direct reply.
                                    let _ = self.updates.send(ServerMessage::Snapshot(snapshot.clone()));
                                    let _ = response.send(Ok(snapshot));
                                }
                                Err(err) => {
                                    // Errors stay between us and the caller.
                                    let _ = response.send(Err(SessionError::Game(err)));
                                }
                            }
                        }
                        Message::Snapshot { response } => {
                            let _ = response.send(self.machine.snapshot());
                        }
                    }
                }
                _ = tokio::time::sleep(deadline) => {
                    match self.machine.status() {
                        GameStatus::InProgress => {
                            let Some(laggard) = self.machine.turn_user() else {
                                continue;
                            };
                            warn!(%game, user = %laggard, "turn timed out, abandoning");
                            match self.machine.abandon(laggard, now_ms()).await {
                                Ok(snapshot) => {
                                    let _ = self.updates.send(ServerMessage::Snapshot(snapshot));
                                }
                                Err(err) => {
                                    warn!(%game, error = %err, "timeout abandon failed");
                                }
                            }
                        }
                        _ => {
                            debug!(%game, "idle, evicting session actor");
                            break;
                        }
                    }
                }
            }
        }
        info!(%game, "session actor stopped");
    }
}
