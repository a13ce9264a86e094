//! Connection handlers for Huddle server.
//!
//! This module handles the connection lifecycle, client frames and the
//! internal HTTP endpoints.

use crate::auth::JwtAuthenticator;
use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard, MetricsObserver};
use crate::store::{HttpMessageStore, MemoryMessageStore};
use anyhow::{bail, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_core::{
    Admission, AdmissionGate, Authenticator, ConnectionHandle, DeliveryReport, Hub, HubConfig,
    MessageStore, StoreError,
};
use huddle_protocol::{
    codec::MAX_FRAME_SIZE, ChatId, ClientFrame, Encoding, Event, FrameCodec, ProtocolError,
    UserId, WireFrame,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

/// Header carrying the key for internal endpoints.
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

/// Shared server state.
pub struct AppState {
    /// Presence, fan-out and ingestion.
    pub hub: Hub,
    /// Admission for new connections.
    pub gate: AdmissionGate,
    /// Server configuration.
    pub config: Config,
    /// Connections admitted or in progress, bounded by `limits.max_connections`.
    slots: AtomicUsize,
}

/// A reserved connection slot, released on drop.
struct ConnectionSlot {
    state: Arc<AppState>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.slots.fetch_sub(1, Ordering::AcqRel);
    }
}

impl AppState {
    /// Create app state with explicit collaborators.
    #[must_use]
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        let hub_config = HubConfig {
            persist_timeout: config.persistence.timeout(),
        };

        Self {
            hub: Hub::with_config(store, hub_config, Some(Arc::new(MetricsObserver))),
            gate: AdmissionGate::new(authenticator)
                .with_outbox_capacity(config.limits.outbound_buffer),
            config,
            slots: AtomicUsize::new(0),
        }
    }

    /// Reserve a connection slot, or `None` at the connection limit.
    fn reserve_slot(self: &Arc<Self>) -> Option<ConnectionSlot> {
        let limit = self.config.limits.max_connections;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < limit).then_some(held + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            state: Arc::clone(self),
        })
    }

    /// Create app state from configuration alone.
    ///
    /// # Errors
    ///
    /// Returns an error if no token secret is configured.
    pub fn from_config(config: Config) -> Result<Self> {
        if config.auth.jwt_secret.is_empty() {
            bail!("auth.jwt_secret must be set (HUDDLE_AUTH__JWT_SECRET)");
        }

        let authenticator = Arc::new(JwtAuthenticator::new(config.auth.jwt_secret.as_bytes()));
        let store: Arc<dyn MessageStore> = match &config.persistence.backend_url {
            Some(url) => {
                info!("Persisting messages to {}", url);
                Arc::new(HttpMessageStore::new(url.clone()))
            }
            None => {
                let persistence = &config.persistence;
                warn!(
                    retain = persistence.retain_messages,
                    chats = persistence.chats.len(),
                    "No persistence backend configured, keeping messages in memory"
                );
                if persistence.chats.is_empty() {
                    warn!("No chats configured, notify requests by chatId will return 404");
                }
                Arc::new(
                    MemoryMessageStore::with_retention(persistence.retain_messages)
                        .with_chats(persistence.chats.clone()),
                )
            }
        };

        Ok(Self::new(config, authenticator, store))
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/internal/events", post(notify_handler))
        .with_state(state)
}

/// Serve requests on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::from_config(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connections,
        "users": stats.connected_users,
        "online": stats.online_users,
    }))
}

/// Query parameters of the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
struct ConnectParams {
    token: Option<String>,
    format: Option<String>,
}

/// Find the session token: cookie first, then bearer header, then query.
fn credential(
    jar: &CookieJar,
    headers: &HeaderMap,
    params: &ConnectParams,
    cookie_name: &str,
) -> Option<String> {
    jar.get(cookie_name)
        .map(|cookie| cookie.value().to_string())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .or_else(|| params.token.clone())
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
    jar: CookieJar,
    headers: HeaderMap,
) -> Response {
    // Held from before admission until the socket closes.
    let Some(slot) = state.reserve_slot() else {
        metrics::record_rejection("capacity");
        warn!(
            limit = state.config.limits.max_connections,
            "Connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Connection limit reached").into_response();
    };

    let encoding = match params.format.as_deref().map(str::parse::<Encoding>) {
        None => Encoding::default(),
        Some(Ok(encoding)) => encoding,
        Some(Err(e)) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    let token = credential(&jar, &headers, &params, &state.config.auth.cookie_name);
    let admission = match state.gate.admit(token.as_deref()).await {
        Ok(admission) => admission,
        Err(e) => {
            metrics::record_rejection("unauthenticated");
            debug!(error = %e, "Connection refused");
            return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
        }
    };

    let codec = FrameCodec::new(encoding).with_max_frame_size(state.config.limits.max_message_size);

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_websocket(socket, state, admission, codec, slot))
}

fn to_message(frame: WireFrame) -> Message {
    match frame {
        WireFrame::Text(text) => Message::Text(text),
        WireFrame::Binary(data) => Message::Binary(data.to_vec()),
    }
}

/// Handle a WebSocket connection.
async fn handle_websocket(
    socket: WebSocket,
    state: Arc<AppState>,
    admission: Admission,
    codec: FrameCodec,
    _slot: ConnectionSlot,
) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let Admission { handle, mut outbox } = admission;
    let connection_id = handle.id().clone();

    debug!(
        connection = %connection_id,
        user = %handle.user_id(),
        encoding = %codec.encoding(),
        "WebSocket connected"
    );

    let (mut sender, mut receiver) = socket.split();

    state.hub.connect(&handle);
    metrics::set_online_users(state.hub.presence().len());

    // Read buffer for partial binary frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    let heartbeat_timeout = state.config.heartbeat.timeout();
    let mut heartbeat = tokio::time::interval(state.config.heartbeat.interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.reset();
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            biased;

            // Events fanned out to this connection
            Some(event) = outbox.recv() => {
                match codec.encode(&*event) {
                    Ok(frame) => {
                        if sender.send(to_message(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(connection = %connection_id, event = %event.kind(), error = %e, "Failed to encode event");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        match codec.decode_text::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(&state, &handle, frame),
                            Err(e) => malformed(&connection_id, &e),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_seen = Instant::now();
                        match codec.decode_binary::<ClientFrame>(&mut read_buffer, &data) {
                            Ok(frames) => {
                                for frame in frames {
                                    handle_frame(&state, &handle, frame);
                                }
                            }
                            Err(e) => {
                                read_buffer.clear();
                                malformed(&connection_id, &e);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_seen = Instant::now();
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_seen.elapsed() > heartbeat_timeout {
                    debug!(connection = %connection_id, "Heartbeat timed out");
                    break;
                }
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.disconnect(&handle);
    metrics::set_online_users(state.hub.presence().len());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

fn malformed(connection_id: &huddle_core::ConnectionId, error: &ProtocolError) {
    metrics::record_malformed();
    warn!(connection = %connection_id, error = %error, "Malformed frame");
}

/// Handle a decoded client frame.
fn handle_frame(state: &AppState, handle: &ConnectionHandle, frame: ClientFrame) {
    let start = Instant::now();
    let kind = frame.kind();
    let presence_change = matches!(
        frame,
        ClientFrame::ChatJoined { .. } | ClientFrame::ChatLeaved { .. }
    );

    metrics::record_inbound(kind);
    trace!(connection = %handle.id(), frame = kind, "Frame received");

    state.hub.handle_frame(handle, frame);

    if presence_change {
        metrics::set_online_users(state.hub.presence().len());
    }
    metrics::record_latency(start.elapsed().as_secs_f64());
}

/// Body of a notify request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotifyRequest {
    #[serde(default)]
    recipients: Option<Vec<UserId>>,
    #[serde(default)]
    chat_id: Option<ChatId>,
    event: Event,
}

/// Outcome of a notify request.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct NotifyResponse {
    resolved: usize,
    delivered: usize,
    dropped: usize,
}

impl From<DeliveryReport> for NotifyResponse {
    fn from(report: DeliveryReport) -> Self {
        Self {
            resolved: report.resolved,
            delivered: report.delivered,
            dropped: report.dropped,
        }
    }
}

/// Broadcast an event on behalf of the CRUD service.
async fn notify_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<NotifyRequest>,
) -> Response {
    let given = headers
        .get(ADMIN_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    let authorized = matches!(
        (state.config.auth.admin_key.as_deref(), given),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        return (StatusCode::UNAUTHORIZED, "Invalid admin key").into_response();
    }

    let kind = request.event.kind();
    let report = match (request.recipients, request.chat_id) {
        (Some(recipients), _) => state.hub.notify(&recipients, request.event),
        (None, Some(chat)) => match state.hub.notify_chat(&chat, request.event).await {
            Ok(report) => report,
            Err(e @ StoreError::ChatNotFound(_)) => {
                metrics::record_lookup_failure(&e);
                return (StatusCode::NOT_FOUND, e.to_string()).into_response();
            }
            Err(e) => {
                metrics::record_lookup_failure(&e);
                warn!(chat = %chat, error = %e, "Failed to resolve chat members");
                return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
            }
        },
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                "Either recipients or chatId is required",
            )
                .into_response();
        }
    };

    debug!(event = %kind, delivered = report.delivered, "Notify request served");
    Json(NotifyResponse::from(report)).into_response()
}
