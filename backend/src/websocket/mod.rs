//! WebSocket server for real-time transaction updates

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::transaction::TransactionEvent;

const EVENT_BUFFER: usize = 256;

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    /// Broadcast channel for transaction events
    pub tx: broadcast::Sender<TransactionEvent>,
    /// Connected clients registry
    pub clients: Arc<RwLock<HashMap<String, ClientInfo>>>,
}

/// Client connection information
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: String,
    pub subscribed_transactions: HashSet<i64>,
}

/// Client message types
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    Subscribe { transaction_ids: Vec<i64> },
    Unsubscribe { transaction_ids: Vec<i64> },
    Ping,
}

/// Server message types
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerMessage {
    Event { event: TransactionEvent },
    Subscribed { transaction_ids: Vec<i64> },
    Unsubscribed { transaction_ids: Vec<i64> },
    Pong,
}

impl Default for WsState {
    fn default() -> Self {
        Self::new()
    }
}

impl WsState {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self {
            tx,
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Publish an event; having no connected clients is not an error
    pub fn broadcast_event(&self, event: TransactionEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("No WebSocket subscribers for event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.tx.subscribe()
    }

    async fn register_client(&self, client_id: String) {
        let mut clients = self.clients.write().await;
        clients.insert(
            client_id.clone(),
            ClientInfo {
                client_id,
                subscribed_transactions: HashSet::new(),
            },
        );
    }

    async fn unregister_client(&self, client_id: &str) {
        let mut clients = self.clients.write().await;
        clients.remove(client_id);
        tracing::info!("Client {} disconnected", client_id);
    }

    async fn subscribe_client(&self, client_id: &str, ids: &[i64]) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(client_id) {
            client.subscribed_transactions.extend(ids.iter().copied());
        }
    }

    async fn unsubscribe_client(&self, client_id: &str, ids: &[i64]) {
        let mut clients = self.clients.write().await;
        if let Some(client) = clients.get_mut(client_id) {
            for id in ids {
                client.subscribed_transactions.remove(id);
            }
        }
    }

    async fn is_subscribed(&self, client_id: &str, transaction_id: i64) -> bool {
        let clients = self.clients.read().await;
        clients
            .get(client_id)
            .map_or(false, |c| c.subscribed_transactions.contains(&transaction_id))
    }
}

/// WebSocket handler - upgrades HTTP connection to WebSocket
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: WsState) {
    let client_id = Uuid::new_v4().to_string();
    state.register_client(client_id.clone()).await;

    let (mut sender, mut receiver) = socket.split();

    // Internal channel for sending messages from recv_task to sender
    let (internal_tx, mut internal_rx) = mpsc::channel::<ServerMessage>(32);

    let mut rx = state.subscribe();
    let client_id_send = client_id.clone();
    let state_send = state.clone();

    // Clients only receive events for transactions they subscribed to
    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Ok(event) = rx.recv() => {
                    if state_send.is_subscribed(&client_id_send, event.transaction_id()).await {
                        let msg = ServerMessage::Event { event };
                        if let Ok(text) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(msg) = internal_rx.recv() => {
                    if let Ok(text) = serde_json::to_string(&msg) {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    });

    let state_recv = state.clone();
    let client_id_recv = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&text) else {
                        continue;
                    };
                    let response = match client_msg {
                        ClientMessage::Subscribe { transaction_ids } => {
                            state_recv
                                .subscribe_client(&client_id_recv, &transaction_ids)
                                .await;
                            tracing::info!("Client {} subscribed", client_id_recv);
                            ServerMessage::Subscribed { transaction_ids }
                        }
                        ClientMessage::Unsubscribe { transaction_ids } => {
                            state_recv
                                .unsubscribe_client(&client_id_recv, &transaction_ids)
                                .await;
                            tracing::info!("Client {} unsubscribed", client_id_recv);
                            ServerMessage::Unsubscribed { transaction_ids }
                        }
                        ClientMessage::Ping => {
                            tracing::debug!("Ping from client {}", client_id_recv);
                            ServerMessage::Pong
                        }
                    };
                    let _ = internal_tx.send(response).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.unregister_client(&client_id).await;
}
