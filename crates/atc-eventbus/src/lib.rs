//! Public websocket event bus (`spec.md` §4.7, component C7).
//!
//! Fans bus messages out to connected browser clients, applying each
//! client's aircraft filter before delivery. Slow clients are dropped
//! rather than allowed to back-pressure the whole bus.

mod filter;

use std::collections::HashMap;
use std::sync::Arc;

use atc_protocol::{BusMessage, ClientFilters, ClientMessage};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

/// Bound on a client's outbound queue (`spec.md` §4.7). A client that can't
/// drain this fast enough is evicted rather than slowing down the bus.
const CLIENT_QUEUE_CAPACITY: usize = 256;

struct ClientHandle {
    tx: mpsc::Sender<Message>,
    filters: Mutex<ClientFilters>,
}

/// Callback invoked for every parsed `ClientMessage` other than
/// `FilterUpdate` (which the bus applies itself). The aircraft-bulk-request
/// path and any future inbound message types live outside this crate, since
/// C7 doesn't own aircraft state.
pub trait InboundHandler: Send + Sync {
    fn handle(&self, client_id: &str, msg: ClientMessage);
}

impl<F> InboundHandler for F
where
    F: Fn(&str, ClientMessage) + Send + Sync,
{
    fn handle(&self, client_id: &str, msg: ClientMessage) {
        self(client_id, msg)
    }
}

struct NoopHandler;
impl InboundHandler for NoopHandler {
    fn handle(&self, _client_id: &str, _msg: ClientMessage) {}
}

struct Registry {
    clients: RwLock<HashMap<String, Arc<ClientHandle>>>,
    handler: Arc<dyn InboundHandler>,
}

/// Cheap-clone handle other components (C5, C6) hold to emit `BusMessage`s
/// without depending on the axum server that actually serves them.
#[derive(Clone)]
pub struct Publisher {
    registry: Arc<Registry>,
}

impl Publisher {
    /// Deliver `msg` to every connected client whose filter admits it.
    /// Non-blocking: a client whose queue is full is scheduled for removal
    /// rather than awaited on.
    pub async fn publish(&self, msg: BusMessage) {
        let json = match serde_json::to_string(&msg) {
            Ok(j) => j,
            Err(e) => {
                warn!(error = %e, "failed to serialize bus message, dropping");
                return;
            }
        };

        let clients = self.registry.clients.read().await;
        let mut dead = Vec::new();
        for (id, handle) in clients.iter() {
            let filters = handle.filters.lock().await;
            if !filter::passes(&msg, &filters) {
                continue;
            }
            drop(filters);
            if handle.tx.try_send(Message::Text(json.clone().into())).is_err() {
                dead.push(id.clone());
            }
        }
        drop(clients);

        if !dead.is_empty() {
            let mut clients = self.registry.clients.write().await;
            for id in &dead {
                clients.remove(id);
            }
            debug!(count = dead.len(), "evicted slow event bus clients");
        }
    }

    pub async fn client_count(&self) -> usize {
        self.registry.clients.read().await.len()
    }
}

/// Owns the client registry and the axum router that serves it.
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_handler(NoopHandler)
    }

    pub fn with_handler(handler: impl InboundHandler + 'static) -> Self {
        Self {
            registry: Arc::new(Registry {
                clients: RwLock::new(HashMap::new()),
                handler: Arc::new(handler),
            }),
        }
    }

    pub fn publisher(&self) -> Publisher {
        Publisher {
            registry: self.registry.clone(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_upgrade))
            .with_state(self.registry.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(registry): State<Arc<Registry>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, registry))
}

async fn handle_socket(socket: WebSocket, registry: Arc<Registry>) {
    let client_id = uuid::Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_QUEUE_CAPACITY);

    registry.clients.write().await.insert(
        client_id.clone(),
        Arc::new(ClientHandle {
            tx,
            filters: Mutex::new(ClientFilters::default()),
        }),
    );
    debug!(client_id, "event bus client connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::FilterUpdate(filters)) => {
                if let Some(handle) = registry.clients.read().await.get(&client_id) {
                    *handle.filters.lock().await = filters;
                }
            }
            Ok(other) => registry.handler.handle(&client_id, other),
            Err(e) => warn!(client_id, error = %e, "unparseable client message, ignoring"),
        }
    }

    registry.clients.write().await.remove(&client_id);
    writer.abort();
    debug!(client_id, "event bus client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use atc_protocol::TranscriptionPayload;

    fn sample_message() -> BusMessage {
        BusMessage::Transcription(TranscriptionPayload {
            id: uuid::Uuid::nil(),
            frequency_id: uuid::Uuid::nil(),
            text: "cleared to land runway 27".to_owned(),
            timestamp: "2026-08-01T00:00:00Z".to_owned(),
            is_complete: true,
            is_processed: false,
            content_processed: None,
        })
    }

    #[tokio::test]
    async fn publish_with_no_clients_connected_does_not_error() {
        let bus = EventBus::new();
        bus.publisher().publish(sample_message()).await;
        assert_eq!(bus.publisher().client_count().await, 0);
    }

    #[tokio::test]
    async fn registered_client_receives_published_message() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_QUEUE_CAPACITY);
        bus.registry.clients.write().await.insert(
            "client-a".to_owned(),
            Arc::new(ClientHandle {
                tx,
                filters: Mutex::new(ClientFilters::default()),
            }),
        );

        bus.publisher().publish(sample_message()).await;

        let received = rx.recv().await.expect("message delivered");
        match received {
            Message::Text(text) => assert!(text.contains("cleared to land")),
            other => panic!("unexpected message kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_with_full_queue_is_evicted_after_a_publish_pass() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel::<Message>(1);
        // Fill the one slot so the next try_send fails.
        tx.try_send(Message::Text("filler".into())).unwrap();
        bus.registry.clients.write().await.insert(
            "slow-client".to_owned(),
            Arc::new(ClientHandle {
                tx,
                filters: Mutex::new(ClientFilters::default()),
            }),
        );

        bus.publisher().publish(sample_message()).await;

        assert_eq!(bus.publisher().client_count().await, 0);
    }

    #[tokio::test]
    async fn aircraft_message_is_withheld_from_a_client_filtering_it_out() {
        let bus = EventBus::new();
        let (tx, mut rx) = mpsc::channel::<Message>(CLIENT_QUEUE_CAPACITY);
        bus.registry.clients.write().await.insert(
            "client-b".to_owned(),
            Arc::new(ClientHandle {
                tx,
                filters: Mutex::new(ClientFilters {
                    show_air: true,
                    show_ground: false,
                    phases: Default::default(),
                    selected_aircraft_hex: None,
                }),
            }),
        );

        let grounded = BusMessage::AircraftUpdate(atc_protocol::AircraftPayload {
            hex: "abc123".to_owned(),
            on_ground: true,
            phase: None,
            extra: serde_json::json!({}),
        });
        bus.publisher().publish(grounded).await;

        // Nothing was queued; non-aircraft traffic still gets through.
        bus.publisher().publish(sample_message()).await;
        let received = rx.recv().await.expect("transcription delivered");
        match received {
            Message::Text(text) => assert!(text.contains("cleared to land")),
            other => panic!("unexpected message kind: {other:?}"),
        }
    }
}
