//! Session coordination: one authoritative actor per live game.
//!
//! The coordinator owns the map of live sessions and guarantees at most one
//! in-flight mutating command per game id: each game's actor drains its
//! mailbox one message at a time, so submissions to one game apply in
//! arrival order while different games proceed independently.

mod actor;
mod ingress;

pub use ingress::{Mailbox, SessionError};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stonerace_execution::{BoardConfig, GameMachine, Ledger, Store};
use stonerace_types::api::{Command, GameSnapshot, ServerMessage};
use stonerace_types::GameId;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use actor::Actor;

const MAILBOX_SIZE: usize = 64;

struct Session {
    mailbox: Mailbox,
    updates: broadcast::Sender<ServerMessage>,
}

pub struct Coordinator<S: Store> {
    store: S,
    ledger: Ledger<S>,
    config: BoardConfig,
    seed: u64,
    turn_timeout: Duration,
    evict_after: Duration,
    sessions: Arc<Mutex<HashMap<GameId, Session>>>,
}

impl<S: Store> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            config: self.config.clone(),
            seed: self.seed,
            turn_timeout: self.turn_timeout,
            evict_after: self.evict_after,
            sessions: self.sessions.clone(),
        }
    }
}

impl<S: Store> Coordinator<S> {
    pub fn new(
        store: S,
        ledger: Ledger<S>,
        config: BoardConfig,
        seed: u64,
        turn_timeout: Duration,
        evict_after: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
            seed,
            turn_timeout,
            evict_after,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a new game and spawn its actor.
    pub async fn create_game(
        &self,
        stake: Option<u64>,
        now: u64,
    ) -> Result<GameSnapshot, SessionError> {
        let machine = GameMachine::create(
            self.store.clone(),
            self.ledger.clone(),
            self.config.clone(),
            self.seed,
            stake,
            now,
        )
        .await?;
        let snapshot = machine.snapshot();
        let mut sessions = self.sessions.lock().await;
        let session = self.spawn(machine);
        sessions.insert(snapshot.id, session);
        Ok(snapshot)
    }

    /// Submit a command for processing by the game's actor.
    pub async fn submit(&self, command: Command, at: u64) -> Result<GameSnapshot, SessionError> {
        let (mailbox, _) = self.session(command.game).await?;
        mailbox.command(command, at).await
    }

    /// Current snapshot plus the broadcast stream of future ones.
    pub async fn subscribe(
        &self,
        game: GameId,
    ) -> Result<(GameSnapshot, broadcast::Receiver<ServerMessage>), SessionError> {
        let (mailbox, updates) = self.session(game).await?;
        let receiver = updates.subscribe();
        let snapshot = mailbox.snapshot().await?;
        Ok((snapshot, receiver))
    }

    pub async fn snapshot(&self, game: GameId) -> Result<GameSnapshot, SessionError> {
        let (mailbox, _) = self.session(game).await?;
        mailbox.snapshot().await
    }

    fn spawn(&self, machine: GameMachine<S>) -> Session {
        let (actor, mailbox, updates) =
            Actor::new(machine, self.turn_timeout, self.evict_after, MAILBOX_SIZE);
        tokio::spawn(actor.run());
        Session { mailbox, updates }
    }

    /// The live session for a game, created lazily from persisted state.
    ///
    /// The single map lock makes lookup-or-create atomic: two concurrent
    /// references can never spawn two actors for one game. An actor that
    /// idled out leaves a closed mailbox behind and is replaced here on the
    /// next reference.
    async fn session(
        &self,
        game: GameId,
    ) -> Result<(Mailbox, broadcast::Sender<ServerMessage>), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&game) {
            if !session.mailbox.is_closed() {
                return Ok((session.mailbox.clone(), session.updates.clone()));
            }
            debug!(%game, "replacing evicted session");
        }
        let machine = GameMachine::load(
            self.store.clone(),
            self.ledger.clone(),
            self.config.clone(),
            self.seed,
            game,
        )
        .await?
        .ok_or(SessionError::NotFound)?;
        let session = self.spawn(machine);
        let handles = (session.mailbox.clone(), session.updates.clone());
        sessions.insert(game, session);
        Ok(handles)
    }
}
