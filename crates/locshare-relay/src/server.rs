//! Relay server: Axum-based HTTP + WS server

use std::net::SocketAddr;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Connection, RelayDispatcher};
use crate::error::RelayError;
use crate::events::EventBus;
use crate::protocol::{ClientFrame, LocationUpdate, RelayEvent};
use crate::registry::SessionRegistry;

/// Runtime settings for the relay
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bind: SocketAddr,
    pub event_capacity: usize,
    pub validate_coordinates: bool,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            event_capacity: 256,
            validate_coordinates: true,
        }
    }
}

/// Shared state for all connections
#[derive(Clone)]
pub struct RelayState {
    pub dispatcher: RelayDispatcher,
    /// Bound on replies queued for one client (`connected`, `error`)
    pub reply_capacity: usize,
    pub start_time: Instant,
}

/// The relay server
pub struct RelayServer {
    state: RelayState,
    bind: SocketAddr,
}

impl RelayServer {
    pub fn new(settings: RelaySettings) -> Self {
        let dispatcher =
            RelayDispatcher::new(SessionRegistry::new(), EventBus::new(settings.event_capacity))
                .with_coordinate_validation(settings.validate_coordinates);
        Self {
            state: RelayState {
                dispatcher,
                reply_capacity: settings.event_capacity.max(1),
                start_time: Instant::now(),
            },
            bind: settings.bind,
        }
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/status", get(status_handler))
            .route("/api/sessions", get(sessions_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let router = self.router();
        info!("Relay listening on {}", listener.local_addr()?);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

        info!("Relay stopped");
        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(
        self,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

// ── HTTP Handlers ──

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub connected_clients: usize,
    pub active_sessions: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<LocationUpdate>,
}

async fn status_handler(State(state): State<RelayState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        connected_clients: state.dispatcher.events().subscriber_count(),
        active_sessions: state.dispatcher.registry().count().await,
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn sessions_handler(State(state): State<RelayState>) -> Json<SessionsResponse> {
    let mut sessions: Vec<LocationUpdate> = state
        .dispatcher
        .registry()
        .all()
        .await
        .into_iter()
        .map(|(id, pos)| LocationUpdate {
            id,
            latitude: pos.latitude,
            longitude: pos.longitude,
        })
        .collect();
    sessions.sort_by(|a, b| a.id.cmp(&b.id));
    Json(SessionsResponse { sessions })
}

// ── WebSocket Handler ──

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!("WebSocket upgrade from {}", addr);
    ws.on_upgrade(move |socket| handle_ws(socket, state, addr))
}

async fn handle_ws(socket: WebSocket, state: RelayState, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let dispatcher = state.dispatcher;
    let (mut conn, mut events) = dispatcher.connect();
    info!("Client {} connected from {}", conn.id(), addr);

    // Replies meant for this client only
    let (direct_tx, mut direct_rx) = mpsc::channel::<RelayEvent>(state.reply_capacity);
    queue_reply(
        &direct_tx,
        conn.id(),
        RelayEvent::Connected {
            id: conn.id().to_string(),
        },
    );

    let client_id = conn.id().to_string();
    let send_task = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                Some(event) = direct_rx.recv() => event,
                Some(event) = events.recv() => event,
                else => break,
            };
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                debug!("Client {} unreachable, stopping writer", client_id);
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                debug!("Client {} sent close", conn.id());
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket error from {}: {}", conn.id(), e);
                break;
            }
        };

        if let Err(e) = handle_frame(&dispatcher, &mut conn, text.as_str()).await {
            queue_reply(&direct_tx, conn.id(), RelayEvent::from(&e));
        }
    }

    dispatcher.disconnect(&mut conn).await;
    send_task.abort();
}

/// Queue a reply for one client without waiting. A client that stops
/// reading loses replies once its queue is full.
fn queue_reply(tx: &mpsc::Sender<RelayEvent>, client: &str, event: RelayEvent) -> bool {
    match tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!("Reply queue for {} full, dropping '{}'", client, event.name());
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn handle_frame(
    dispatcher: &RelayDispatcher,
    conn: &mut Connection,
    raw: &str,
) -> Result<(), RelayError> {
    let request = ClientFrame::parse(raw)
        .and_then(ClientFrame::into_request)
        .inspect_err(|e| debug!("Bad frame from {}: {}", conn.id(), e))?;
    dispatcher.handle(conn, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ERR_INVALID_EVENT, ERR_INVALID_PARAMS, Position};

    fn state() -> RelayState {
        RelayServer::new(RelaySettings::default()).state
    }

    #[tokio::test]
    async fn test_handle_frame_send_location() {
        let state = state();
        let (mut conn, _events) = state.dispatcher.connect();
        handle_frame(
            &state.dispatcher,
            &mut conn,
            r#"{"event":"send-location","data":{"latitude":10,"longitude":20}}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            state.dispatcher.registry().get(conn.id()).await,
            Some(Position::new(10.0, 20.0))
        );
    }

    #[tokio::test]
    async fn test_handle_frame_unknown_event() {
        let state = state();
        let (mut conn, _events) = state.dispatcher.connect();
        let err = handle_frame(&state.dispatcher, &mut conn, r#"{"event":"chat","data":{}}"#)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ERR_INVALID_EVENT);
    }

    #[tokio::test]
    async fn test_handle_frame_invalid_json() {
        let state = state();
        let (mut conn, _events) = state.dispatcher.connect();
        let err = handle_frame(&state.dispatcher, &mut conn, "not json")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handle_frame_malformed_not_broadcast() {
        let state = state();
        let (mut conn, _events) = state.dispatcher.connect();
        let (_other, mut other_events) = state.dispatcher.connect();
        let err = handle_frame(
            &state.dispatcher,
            &mut conn,
            r#"{"event":"send-location","data":{"latitude":"x","longitude":1}}"#,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), ERR_INVALID_PARAMS);
        assert_eq!(other_events.try_recv(), None);
        assert_eq!(state.dispatcher.registry().count().await, 0);
    }

    #[tokio::test]
    async fn test_reply_queue_is_bounded() {
        let (tx, mut rx) = mpsc::channel::<RelayEvent>(2);
        let err = RelayError::UnknownEvent("x".repeat(2000));

        let mut queued = 0;
        for _ in 0..1000 {
            if queue_reply(&tx, "quiet", RelayEvent::from(&err)) {
                queued += 1;
            }
        }
        assert_eq!(queued, 2);

        // Draining makes room again
        assert!(rx.recv().await.is_some());
        assert!(queue_reply(&tx, "quiet", RelayEvent::from(&err)));
    }

    #[tokio::test]
    async fn test_reply_to_closed_client_dropped() {
        let (tx, rx) = mpsc::channel::<RelayEvent>(2);
        drop(rx);
        assert!(!queue_reply(
            &tx,
            "gone",
            RelayEvent::UserDisconnected("x".to_string())
        ));
    }

    #[tokio::test]
    async fn test_reply_capacity_follows_event_capacity() {
        let server = RelayServer::new(RelaySettings {
            event_capacity: 8,
            ..RelaySettings::default()
        });
        assert_eq!(server.state.reply_capacity, 8);
    }

    #[tokio::test]
    async fn test_status_handler() {
        let state = state();
        let (mut conn, _events) = state.dispatcher.connect();
        let (_idle, _idle_events) = state.dispatcher.connect();
        state
            .dispatcher
            .update_location(&mut conn, Position::new(1.0, 2.0))
            .await
            .unwrap();

        let Json(status) = status_handler(State(state)).await;
        assert_eq!(status.status, "ok");
        assert_eq!(status.connected_clients, 2);
        assert_eq!(status.active_sessions, 1);
    }

    #[tokio::test]
    async fn test_sessions_handler_sorted() {
        let state = state();
        let registry = state.dispatcher.registry();
        registry.upsert("b", Position::new(3.0, 4.0)).await;
        registry.upsert("a", Position::new(1.0, 2.0)).await;

        let Json(resp) = sessions_handler(State(state.clone())).await;
        let ids: Vec<&str> = resp.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(resp.sessions[0].latitude, 1.0);
    }

    #[test]
    fn test_default_settings() {
        let settings = RelaySettings::default();
        assert_eq!(settings.bind.port(), 3000);
        assert_eq!(settings.event_capacity, 256);
        assert!(settings.validate_coordinates);
    }
}
