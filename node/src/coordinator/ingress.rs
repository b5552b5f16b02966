use stonerace_execution::GameError;
use stonerace_types::api::{Command, GameSnapshot};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("game not found")]
    NotFound,
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    Game(#[from] GameError),
}

/// Messages sent to a session actor.
pub enum Message {
    Command {
        command: Command,
        at: u64,
        response: oneshot::Sender<Result<GameSnapshot, SessionError>>,
    },
    Snapshot {
        response: oneshot::Sender<GameSnapshot>,
    },
}

/// Handle for reaching one game's actor.
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    pub(super) fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Whether the actor behind this mailbox has exited.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn command(&self, command: Command, at: u64) -> Result<GameSnapshot, SessionError> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(Message::Command {
                command,
                at,
                response,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        receiver.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn snapshot(&self) -> Result<GameSnapshot, SessionError> {
        let (response, receiver) = oneshot::channel();
        self.sender
            .send(Message::Snapshot { response })
            .await
            .map_err(|_| SessionError::Closed)?;
        receiver.await.map_err(|_| SessionError::Closed)
    }
}
