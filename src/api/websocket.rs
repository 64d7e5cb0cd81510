// Live transaction updates over WebSocket
//
// Authorization runs before the upgrade. Once upgraded, the connection only
// carries snapshots pushed by the notification hub; anything the terminal sends
// just keeps the read deadline alive.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::time::{interval_at, sleep, timeout, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::handler::AppState;
use super::models::TransactionStreamQuery;
use crate::{
    auth::SessionClaims,
    error::{AppError, AppResult},
    notifications::{NotificationHub, Subscription},
};

const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const PING_PERIOD: Duration = Duration::from_secs(30);
const READ_DEADLINE: Duration = Duration::from_secs(60);
const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// GET /pos/ws/transaction?transaction_id=N
pub async fn transaction_updates(
    State(state): State<AppState>,
    claims: SessionClaims,
    Query(query): Query<TransactionStreamQuery>,
    ws: Option<WebSocketUpgrade>,
) -> AppResult<Response> {
    let transaction_id = query
        .transaction_id
        .ok_or_else(|| AppError::Validation("Missing transaction_id query parameter".to_string()))?;

    let transaction = state
        .ledger
        .find_transaction(transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))?;
    NotificationHub::authorize(&claims, &transaction)?;

    let ws = ws.ok_or_else(|| AppError::Validation("WebSocket upgrade required".to_string()))?;

    // register before the upgrade completes so no publish is missed in between
    let subscription = state.hub.subscribe(transaction_id);
    let shutdown = state.shutdown.clone();

    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| stream_updates(socket, subscription, shutdown))
        .into_response())
}

async fn stream_updates(socket: WebSocket, mut subscription: Subscription, shutdown: CancellationToken) {
    let transaction_id = subscription.transaction_id();
    info!("🔌 Live updates connected for transaction {}", transaction_id);

    let (mut sink, mut stream) = socket.split();
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);
    let read_deadline = sleep(READ_DEADLINE);
    tokio::pin!(read_deadline);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = timeout(WRITE_TIMEOUT, sink.send(Message::Close(None))).await;
                break;
            }
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else {
                    debug!("Hub dropped subscriber for transaction {}", transaction_id);
                    break;
                };
                if !send_bounded(&mut sink, Message::Text(snapshot)).await {
                    break;
                }
            }
            _ = ping.tick() => {
                if !send_bounded(&mut sink, Message::Ping(Vec::new())).await {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => read_deadline.as_mut().reset(Instant::now() + READ_DEADLINE),
                Some(Err(e)) => {
                    debug!("WebSocket error for transaction {}: {}", transaction_id, e);
                    break;
                }
            },
            _ = &mut read_deadline => {
                debug!("Read deadline passed for transaction {}", transaction_id);
                break;
            }
        }
    }

    info!("🔌 Live updates closed for transaction {}", transaction_id);
}

async fn send_bounded<S>(sink: &mut S, message: Message) -> bool
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    match timeout(WRITE_TIMEOUT, sink.send(message)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("WebSocket send failed: {}", e);
            false
        }
        Err(_) => {
            warn!("WebSocket write timed out, disconnecting");
            false
        }
    }
}
