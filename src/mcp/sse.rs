//! HTTP transport with server-sent events.
//!
//! Plain HTTP cannot push to the client, so one link uses two channels:
//!
//! - `GET /sse` opens a long-lived event stream for server-to-client frames
//! - `POST /messages?session_id=<id>` carries each client-to-server frame
//!
//! The first event on a new stream is `endpoint`. Its data is the path the
//! client posts to. Every later `message` event holds one frame. Both ends
//! surface the pair as a single [`Connection`], so sessions cannot tell this
//! transport from TCP.
//!
//! Closing either direction tears down both: the client drops its event
//! stream once it stops posting, and the server forgets the session once
//! the event stream is gone.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::Router;
use eventsource_stream::Eventsource;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::mcp::error::TransportError;
use crate::mcp::transport::{Accept, Connection, Frame, CHANNEL_CAPACITY};

/// Path of the event stream.
pub const SSE_PATH: &str = "/sse";

/// Path clients post frames to.
pub const MESSAGES_PATH: &str = "/messages";

const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

/// Inbound frame channels of the open event streams, by connection id.
type Sessions = Arc<Mutex<HashMap<Uuid, mpsc::Sender<Frame>>>>;

fn lock(sessions: &Sessions) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<Frame>>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct HttpState {
    sessions: Sessions,
    accepted: mpsc::Sender<Connection>,
}

/// Accepts event-stream connections over HTTP.
///
/// The HTTP server runs on its own task from [`bind`](Self::bind) until the
/// listener is dropped.
#[derive(Debug)]
pub struct SseListener {
    local_addr: SocketAddr,
    accepted: tokio::sync::Mutex<mpsc::Receiver<Connection>>,
    server: JoinHandle<()>,
}

impl SseListener {
    /// Binds to `addr` and starts serving `GET /sse` and `POST /messages`.
    /// Port `0` picks a free port.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (accepted_tx, accepted_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let state = HttpState {
            sessions: Arc::default(),
            accepted: accepted_tx,
        };
        let app = Router::new()
            .route(SSE_PATH, get(open_stream))
            .route(MESSAGES_PATH, post(post_message))
            .with_state(state);

        let server = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                tracing::warn!(error = %e, "HTTP server failed");
            }
        });

        tracing::debug!(addr = %local_addr, "Event-stream endpoint listening");
        Ok(Self {
            local_addr,
            accepted: tokio::sync::Mutex::new(accepted_rx),
            server,
        })
    }

    /// Returns the address actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Accept for SseListener {
    async fn accept(&self) -> Result<Connection, TransportError> {
        self.accepted
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

impl Drop for SseListener {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Removes a session's inbound channel once its event stream is dropped,
/// which ends the server session's receive loop.
struct StreamGuard {
    id: Uuid,
    sessions: Sessions,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        lock(&self.sessions).remove(&self.id);
        tracing::debug!(connection = %self.id, "Event stream closed");
    }
}

async fn open_stream(
    State(state): State<HttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let connection = Connection::from_channels(peer.to_string(), outbound_tx, inbound_rx);
    let id = connection.id();

    lock(&state.sessions).insert(id, inbound_tx);
    let guard = StreamGuard {
        id,
        sessions: Arc::clone(&state.sessions),
    };

    if state.accepted.send(connection).await.is_err() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    tracing::debug!(connection = %id, peer = %peer, "Event stream opened");

    let endpoint = Event::default()
        .event(ENDPOINT_EVENT)
        .data(format!("{MESSAGES_PATH}?session_id={id}"));
    let messages = stream::unfold((outbound_rx, guard), |(mut frames, guard)| async move {
        let frame = frames.recv().await?;
        let event = Event::default()
            .event(MESSAGE_EVENT)
            .data(String::from_utf8_lossy(&frame));
        Some((Ok::<_, Infallible>(event), (frames, guard)))
    });

    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn post_message(
    State(state): State<HttpState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> StatusCode {
    let Ok(id) = Uuid::parse_str(&query.session_id) else {
        return StatusCode::BAD_REQUEST;
    };

    let inbound = lock(&state.sessions).get(&id).cloned();
    let Some(inbound) = inbound else {
        tracing::debug!(connection = %id, "Message for unknown session");
        return StatusCode::NOT_FOUND;
    };

    let frame = body.trim_end().as_bytes().to_vec();
    if frame.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    match inbound.send(frame).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::GONE,
    }
}

/// Opens an event stream at `url` (for example `http://127.0.0.1:8000/sse`)
/// and waits for the server to announce its message endpoint.
///
/// # Errors
///
/// Returns an error if the URL is invalid, the server refuses the stream,
/// or the stream ends before the `endpoint` event.
pub async fn connect(url: &str) -> Result<Connection, TransportError> {
    let base = Url::parse(url)
        .map_err(|e| TransportError::Handshake(format!("invalid URL '{url}': {e}")))?;

    let client = reqwest::Client::new();
    let response = client
        .get(base.clone())
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?
        .error_for_status()?;
    let mut events = Box::pin(response.bytes_stream().eventsource());

    let path = loop {
        match events.next().await {
            Some(Ok(event)) if event.event == ENDPOINT_EVENT => break event.data,
            Some(Ok(event)) => {
                tracing::debug!(event = %event.event, "Skipping event before endpoint");
            }
            Some(Err(e)) => return Err(TransportError::Handshake(e.to_string())),
            None => {
                return Err(TransportError::Handshake(
                    "stream ended before the endpoint event".to_string(),
                ));
            }
        }
    };
    let endpoint = base
        .join(path.trim())
        .map_err(|e| TransportError::Handshake(format!("invalid endpoint '{path}': {e}")))?;

    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (hangup_tx, hangup_rx) = oneshot::channel();
    let connection = Connection::from_channels(base.as_str(), outbound_tx, inbound_rx);

    tokio::spawn(read_events(events, inbound_tx, hangup_rx, connection.id()));
    tokio::spawn(post_frames(client, endpoint, outbound_rx, hangup_tx, connection.id()));

    tracing::debug!(connection = %connection.id(), url = %base, "Event stream connected");
    Ok(connection)
}

async fn read_events<S, E>(
    mut events: S,
    frames: mpsc::Sender<Frame>,
    mut hangup: oneshot::Receiver<()>,
    connection: Uuid,
) where
    S: Stream<Item = Result<eventsource_stream::Event, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        tokio::select! {
            () = frames.closed() => break,

            _ = &mut hangup => {
                tracing::debug!(connection = %connection, "Outbound side closed, dropping event stream");
                break;
            }

            event = events.next() => match event {
                Some(Ok(event)) if event.event == MESSAGE_EVENT => {
                    if frames.send(event.data.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(event)) => {
                    tracing::debug!(connection = %connection, event = %event.event, "Ignoring event");
                }
                Some(Err(e)) => {
                    tracing::warn!(connection = %connection, error = %e, "Event stream failed");
                    break;
                }
                None => {
                    tracing::debug!(connection = %connection, "Server ended the event stream");
                    break;
                }
            }
        }
    }
}

async fn post_frames(
    client: reqwest::Client,
    endpoint: Url,
    mut frames: mpsc::Receiver<Frame>,
    _hangup: oneshot::Sender<()>,
    connection: Uuid,
) {
    while let Some(frame) = frames.recv().await {
        let posted = client
            .post(endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(frame)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        if let Err(e) = posted {
            tracing::warn!(connection = %connection, error = %e, "Post failed");
            return;
        }
    }
}
