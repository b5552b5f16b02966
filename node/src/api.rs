//! HTTP and WebSocket surface.
//!
//! Clients drive games over `/ws/:game` with JSON `Command` frames and
//! receive `ServerMessage` frames back: snapshots fan out to every
//! subscriber, errors only to the submitting socket. Admin tooling and
//! wallets use the plain HTTP routes.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};
use uuid::Uuid;

use stonerace_execution::{
    GameError, Gateway, GatewayError, Ledger, LedgerError, Store, WithdrawalError,
    WithdrawalPipeline,
};
use stonerace_types::api::{
    AdminAction, Command, CreateGame, GameSnapshot, RegisterUser, RequestWithdrawal,
    ResolveAccount, ResolvedAccount, ServerMessage, WithdrawalView,
};
use stonerace_types::{
    BalanceView, GameId, Transaction, User, UserId, WithdrawalId, MAX_NAME_LENGTH,
};

use crate::coordinator::{Coordinator, SessionError};
use crate::now_ms;

pub struct AppState<S: Store, G: Gateway> {
    pub coordinator: Coordinator<S>,
    pub pipeline: WithdrawalPipeline<S, G>,
    pub ledger: Ledger<S>,
    pub store: S,
    pub gateway: G,
}

impl<S: Store, G: Gateway> Clone for AppState<S, G> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            pipeline: self.pipeline.clone(),
            ledger: self.ledger.clone(),
            store: self.store.clone(),
            gateway: self.gateway.clone(),
        }
    }
}

pub struct Api<S: Store, G: Gateway> {
    state: AppState<S, G>,
}

impl<S: Store, G: Gateway> Api<S, G> {
    pub fn new(state: AppState<S, G>) -> Self {
        Self { state }
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE]);

        // Configure rate limiting, keyed by client IP
        let governor_conf = Arc::new(
            GovernorConfigBuilder::default()
                .per_second(50)
                .burst_size(200)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .expect("static governor configuration is valid"),
        );

        Router::new()
            .route("/users", post(register_user::<S, G>))
            .route("/users/:id/balance", get(user_balance::<S, G>))
            .route("/users/:id/transactions", get(user_transactions::<S, G>))
            .route("/games", post(create_game::<S, G>))
            .route("/games/:id", get(game_snapshot::<S, G>))
            .route("/commands", post(submit_command::<S, G>))
            .route("/ws/:game", get(game_ws::<S, G>))
            .route(
                "/withdrawals",
                post(request_withdrawal::<S, G>).get(list_withdrawals::<S, G>),
            )
            .route("/withdrawals/:id/approve", post(approve_withdrawal::<S, G>))
            .route("/withdrawals/:id/reject", post(reject_withdrawal::<S, G>))
            .route(
                "/withdrawals/:id/reconcile",
                post(reconcile_withdrawal::<S, G>),
            )
            .route("/accounts/resolve", post(resolve_account::<S, G>))
            .layer(cors)
            .layer(GovernorLayer {
                config: governor_conf,
            })
            .with_state(self.state.clone())
    }
}

/// Uniform error body: `{"error": "..."}` with a matching status code.
pub struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

fn internal<E: std::fmt::Display>(err: E) -> ApiError {
    ApiError(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn game_error_status(err: &GameError) -> StatusCode {
    match err {
        GameError::UnknownUser { .. } => StatusCode::NOT_FOUND,
        GameError::Ledger(LedgerError::InsufficientFunds { .. }) => StatusCode::PAYMENT_REQUIRED,
        GameError::Ledger(_) | GameError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::CONFLICT,
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::NotFound => StatusCode::NOT_FOUND,
            SessionError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            SessionError::Game(game_err) => game_error_status(game_err),
        };
        ApiError(status, err.to_string())
    }
}

impl From<WithdrawalError> for ApiError {
    fn from(err: WithdrawalError) -> Self {
        let status = match &err {
            WithdrawalError::NotFound { .. } | WithdrawalError::UnknownUser { .. } => {
                StatusCode::NOT_FOUND
            }
            WithdrawalError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
            WithdrawalError::InvalidStatus { .. } => StatusCode::CONFLICT,
            WithdrawalError::InvalidAmount | WithdrawalError::AccountResolution(_) => {
                StatusCode::BAD_REQUEST
            }
            WithdrawalError::Ledger(LedgerError::InsufficientFunds { .. }) => {
                StatusCode::PAYMENT_REQUIRED
            }
            WithdrawalError::Gateway(_) => StatusCode::BAD_GATEWAY,
            WithdrawalError::Ledger(_) | WithdrawalError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        ApiError(status, err.to_string())
    }
}

async fn register_user<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Json(body): Json<RegisterUser>,
) -> Result<Json<User>, ApiError> {
    if body.name.is_empty() || body.name.len() > MAX_NAME_LENGTH {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            format!("name must be 1-{MAX_NAME_LENGTH} characters"),
        ));
    }
    let id = state.store.next_user_id().await.map_err(internal)?;
    let mut user = User::new(id, body.name);
    user.is_admin = body.admin;
    state.store.put_user(user.clone()).await.map_err(internal)?;
    Ok(Json(user))
}

async fn user_balance<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<u64>,
) -> Result<Json<BalanceView>, ApiError> {
    let user = UserId(id);
    state
        .store
        .user(user)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("unknown user {user}")))?;
    let view = state.ledger.balance_view(user).await.map_err(internal)?;
    Ok(Json(view))
}

async fn user_transactions<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<u64>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let user = UserId(id);
    state
        .store
        .user(user)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, format!("unknown user {user}")))?;
    let txs = state.ledger.transactions(user).await.map_err(internal)?;
    Ok(Json(txs))
}

async fn create_game<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Json(body): Json<CreateGame>,
) -> Result<Json<GameSnapshot>, ApiError> {
    let snapshot = state.coordinator.create_game(body.stake, now_ms()).await?;
    Ok(Json(snapshot))
}

async fn game_snapshot<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<u64>,
) -> Result<Json<GameSnapshot>, ApiError> {
    let snapshot = state.coordinator.snapshot(GameId(id)).await?;
    Ok(Json(snapshot))
}

async fn submit_command<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Json(command): Json<Command>,
) -> Result<Json<GameSnapshot>, ApiError> {
    let snapshot = state.coordinator.submit(command, now_ms()).await?;
    Ok(Json(snapshot))
}

async fn request_withdrawal<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Json(body): Json<RequestWithdrawal>,
) -> Result<Json<WithdrawalView>, ApiError> {
    let request = state
        .pipeline
        .request(
            body.user,
            body.amount,
            body.account_number,
            body.bank_code,
            now_ms(),
        )
        .await?;
    Ok(Json(WithdrawalView {
        needs_review: false,
        request,
    }))
}

async fn list_withdrawals<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
) -> Result<Json<Vec<WithdrawalView>>, ApiError> {
    Ok(Json(state.pipeline.list().await?))
}

fn withdrawal_id(raw: &str) -> Result<WithdrawalId, ApiError> {
    Uuid::parse_str(raw)
        .map(WithdrawalId)
        .map_err(|_| ApiError(StatusCode::BAD_REQUEST, "malformed withdrawal id".into()))
}

async fn approve_withdrawal<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<String>,
    Json(body): Json<AdminAction>,
) -> Result<Json<WithdrawalView>, ApiError> {
    let id = withdrawal_id(&id)?;
    let request = state.pipeline.approve(id, body.admin, now_ms()).await?;
    Ok(Json(WithdrawalView {
        needs_review: state.pipeline.needs_review(&request),
        request,
    }))
}

async fn reject_withdrawal<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<String>,
    Json(body): Json<AdminAction>,
) -> Result<Json<WithdrawalView>, ApiError> {
    let id = withdrawal_id(&id)?;
    let request = state
        .pipeline
        .reject(id, body.admin, body.reason, now_ms())
        .await?;
    Ok(Json(WithdrawalView {
        needs_review: false,
        request,
    }))
}

async fn reconcile_withdrawal<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Path(id): Path<String>,
) -> Result<Json<WithdrawalView>, ApiError> {
    let id = withdrawal_id(&id)?;
    let request = state.pipeline.reconcile(id, now_ms()).await?;
    Ok(Json(WithdrawalView {
        needs_review: state.pipeline.needs_review(&request),
        request,
    }))
}

async fn resolve_account<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Json(body): Json<ResolveAccount>,
) -> Result<Json<ResolvedAccount>, ApiError> {
    let account_name = state
        .gateway
        .resolve_account(body.account_number, body.bank_code)
        .await
        .map_err(|err| match err {
            GatewayError::Transport(_) => ApiError(StatusCode::BAD_GATEWAY, err.to_string()),
            _ => ApiError(StatusCode::BAD_REQUEST, err.to_string()),
        })?;
    Ok(Json(ResolvedAccount { account_name }))
}

async fn game_ws<S: Store, G: Gateway>(
    State(state): State<AppState<S, G>>,
    Path(game): Path<u64>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_game_ws(socket, state, GameId(game)))
}

async fn handle_game_ws<S: Store, G: Gateway>(
    socket: WebSocket,
    state: AppState<S, G>,
    game: GameId,
) {
    let (snapshot, mut updates) = match state.coordinator.subscribe(game).await {
        Ok(subscribed) => subscribed,
        Err(err) => {
            debug!(%game, error = %err, "ws subscribe failed");
            let mut socket = socket;
            let _ = send_to(&mut socket, &error_message(&err)).await;
            let _ = socket.close().await;
            return;
        }
    };
    debug!(%game, "ws subscriber connected");
    let (mut sender, mut receiver) = socket.split();

    // Current state first, then the live stream.
    if send_message(&mut sender, &ServerMessage::Snapshot(snapshot))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(message) => {
                        if send_message(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Resync a slow subscriber from the current state.
                        warn!(%game, skipped, "ws subscriber lagged, resyncing");
                        match state.coordinator.snapshot(game).await {
                            Ok(snapshot) => {
                                if send_message(&mut sender, &ServerMessage::Snapshot(snapshot))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = receiver.next() => {
                let Some(Ok(frame)) = frame else {
                    break;
                };
                let WsMessage::Text(text) = frame else {
                    continue;
                };
                let command: Command = match serde_json::from_str(&text) {
                    Ok(command) => command,
                    Err(err) => {
                        let reply = ServerMessage::Error {
                            message: format!("malformed command: {err}"),
                        };
                        if send_message(&mut sender, &reply).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };
                if command.game != game {
                    let reply = ServerMessage::Error {
                        message: "command addressed to another game".to_string(),
                    };
                    if send_message(&mut sender, &reply).await.is_err() {
                        break;
                    }
                    continue;
                }
                // Successes arrive through the broadcast; only errors go
                // back on this socket alone.
                if let Err(err) = state.coordinator.submit(command, now_ms()).await {
                    if send_message(&mut sender, &error_message(&err)).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!(%game, "ws subscriber disconnected");
}

fn error_message(err: &SessionError) -> ServerMessage {
    ServerMessage::Error {
        message: err.to_string(),
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(message) else {
        return Ok(());
    };
    sender.send(WsMessage::Text(text)).await
}

async fn send_to(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let Ok(text) = serde_json::to_string(message) else {
        return Ok(());
    };
    socket.send(WsMessage::Text(text)).await
}
