// WebSocket endpoint for live log viewers
// Clients join the `logs` room and receive every new record as it is stored

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::AppState;
use crate::engine::{BroadcastEvent, RealtimeHub, LOGS_CHANNEL};
use crate::models::LogRecord;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "join-logs")]
    JoinLogs,

    #[serde(rename = "leave-logs")]
    LeaveLogs,

    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    #[serde(rename = "connected")]
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "joined")]
    Joined { room: String },

    #[serde(rename = "left")]
    Left { room: String },

    #[serde(rename = "new-log")]
    NewLog {
        data: LogRecord,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "error")]
    Error {
        error: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "pong")]
    Pong { timestamp: DateTime<Utc> },
}

impl From<BroadcastEvent> for ServerMessage {
    fn from(event: BroadcastEvent) -> Self {
        match event {
            BroadcastEvent::NewLog { data, timestamp } => ServerMessage::NewLog { data, timestamp },
        }
    }
}

/// GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

/// Forward the logs room to one connection until it leaves or disconnects
fn spawn_log_forwarder(hub: &RealtimeHub, tx: mpsc::Sender<ServerMessage>) -> JoinHandle<()> {
    let mut events = BroadcastStream::new(hub.subscribe(LOGS_CHANNEL));
    tokio::spawn(async move {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if tx.send(event.into()).await.is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Log viewer lagged, {} event(s) dropped", skipped);
                }
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, hub: Arc<RealtimeHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(100);
    let client_id = Uuid::new_v4().to_string();
    info!("Log viewer connected: {}", client_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = serde_json::to_string(&message).unwrap_or_else(|e| {
                error!("Failed to serialize message: {}", e);
                String::from(r#"{"type":"error","error":"Failed to serialize message"}"#)
            });

            if let Err(e) = ws_sender.send(Message::Text(json)).await {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let _ = tx
        .send(ServerMessage::Connected {
            client_id: client_id.clone(),
            timestamp: Utc::now(),
        })
        .await;

    let mut forwarder: Option<JoinHandle<()>> = None;

    loop {
        let message = tokio::select! {
            message = ws_receiver.next() => message,
            _ = &mut send_task => break,
        };
        let Some(Ok(message)) = message else {
            break;
        };

        match message {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::JoinLogs) => {
                        if forwarder.is_none() {
                            forwarder = Some(spawn_log_forwarder(&hub, tx.clone()));
                            debug!("{} joined {}", client_id, LOGS_CHANNEL);
                        }
                        ServerMessage::Joined {
                            room: LOGS_CHANNEL.to_string(),
                        }
                    }
                    Ok(ClientMessage::LeaveLogs) => {
                        if let Some(task) = forwarder.take() {
                            task.abort();
                        }
                        ServerMessage::Left {
                            room: LOGS_CHANNEL.to_string(),
                        }
                    }
                    Ok(ClientMessage::Ping) => ServerMessage::Pong {
                        timestamp: Utc::now(),
                    },
                    Err(e) => ServerMessage::Error {
                        error: format!("Invalid message format: {}", e),
                        timestamp: Utc::now(),
                    },
                };
                if tx.send(reply).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(task) = forwarder {
        task.abort();
    }
    send_task.abort();
    info!("Log viewer disconnected: {}", client_id);
}
