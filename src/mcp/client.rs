//! Client side of a session.
//!
//! A [`ClientSession`] owns one connection. Calls may be issued
//! concurrently from many tasks; a background receive loop correlates
//! responses to waiters by request id.
//!
//! ```rust,no_run
//! use remote_mcp::mcp::client::{ClientOptions, ClientSession};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let session = ClientSession::connect("127.0.0.1:8000", ClientOptions::default()).await?;
//! session.initialize().await?;
//! let sum = session.call_tool("add", json!({"a": 5, "b": 3})).await?;
//! println!("{sum:?}");
//! session.close().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::ToSocketAddrs;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::mcp::engine::InvocationResult;
use crate::mcp::error::{DecodeError, SessionError};
use crate::mcp::protocol::{
    decode, encode, methods, Envelope, ErrorObject, Notification, Outcome, Request, RequestId,
    Response, MCP_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::session::{PendingRequests, SessionState};
use crate::mcp::sse;
use crate::mcp::transport::{self, Connection, FrameReceiver, FrameSender};
use crate::mcp::types::{
    CallToolParams, CallToolResult, CancelledParams, Capabilities, ClientInfo, Descriptor,
    GetPromptParams, GetPromptResult, InitializeParams, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    ReadResourceParams, ReadResourceResult, ToolListing,
};

/// Default time a call waits for its response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-side session settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Identity sent during initialisation.
    pub client_info: ClientInfo,
    /// Protocol version requested from the server.
    pub protocol_version: String,
    /// Versions the client accepts in the server's answer.
    pub supported_versions: Vec<String>,
    /// Capability subset the client wants.
    pub capabilities: Capabilities,
    /// Per-call timeout; `None` waits until the connection closes.
    pub request_timeout: Option<Duration>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            client_info: ClientInfo::default(),
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            capabilities: Capabilities::all(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl ClientOptions {
    /// Builds options from the `client` section of the configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            protocol_version: config.protocol_version.clone(),
            request_timeout: Some(Duration::from_secs(config.request_timeout_secs)),
            ..Self::default()
        }
    }
}

struct Shared {
    connection_id: Uuid,
    pending: PendingRequests,
    state: watch::Sender<SessionState>,
    outbound: Mutex<Option<FrameSender>>,
    next_id: AtomicI64,
    server: OnceLock<InitializeResult>,
}

impl Shared {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        let sender = self
            .outbound
            .lock()
            .await
            .clone()
            .ok_or(SessionError::ConnectionClosed)?;
        sender
            .send(encode(&envelope))
            .await
            .map_err(|_| SessionError::ConnectionClosed)
    }

    async fn shutdown(&self) {
        let previous = self.state.send_replace(SessionState::Closed);
        self.outbound.lock().await.take();
        let failed = self.pending.fail_all().await;
        if previous != SessionState::Closed {
            tracing::info!(
                connection = %self.connection_id,
                pending_failed = failed,
                "Session closed"
            );
        }
    }
}

/// A client session over one connection.
pub struct ClientSession {
    shared: Arc<Shared>,
    options: ClientOptions,
    receiver_task: JoinHandle<()>,
}

impl ClientSession {
    /// Starts a session over an established connection. The session begins
    /// in `Connecting`; call [`initialize`](Self::initialize) next.
    #[must_use]
    pub fn new(connection: Connection, options: ClientOptions) -> Self {
        let connection_id = connection.id();
        tracing::debug!(connection = %connection_id, peer = %connection.peer(), "Client session started");

        let (sender, receiver) = connection.split();
        let (state, _) = watch::channel(SessionState::Connecting);
        let shared = Arc::new(Shared {
            connection_id,
            pending: PendingRequests::new(),
            state,
            outbound: Mutex::new(Some(sender)),
            next_id: AtomicI64::new(1),
            server: OnceLock::new(),
        });
        let receiver_task = tokio::spawn(receive_loop(Arc::clone(&shared), receiver));

        Self {
            shared,
            options,
            receiver_task,
        }
    }

    /// Dials a TCP server and starts a session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Transport` if the server cannot be reached.
    pub async fn connect(addr: impl ToSocketAddrs, options: ClientOptions) -> Result<Self, SessionError> {
        let connection = transport::connect(addr).await?;
        Ok(Self::new(connection, options))
    }

    /// Opens an HTTP event stream at `url` and starts a session over it.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the stream cannot be opened.
    pub async fn connect_sse(url: &str, options: ClientOptions) -> Result<Self, SessionError> {
        let connection = sse::connect(url).await?;
        Ok(Self::new(connection, options))
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// The server's answer to `initialize`, once negotiation succeeded.
    #[must_use]
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.shared.server.get()
    }

    /// Negotiates the protocol version and capabilities.
    ///
    /// On success the client has sent `notifications/initialized` and the
    /// session is `Ready`. On failure the session is `Closed`.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if called outside `Connecting`, `Negotiation` if
    /// the server rejects the request or answers with an unsupported
    /// version, or a connection error.
    pub async fn initialize(&self) -> Result<InitializeResult, SessionError> {
        let mut observed = SessionState::Connecting;
        let claimed = self.shared.state.send_if_modified(|state| {
            observed = *state;
            if *state == SessionState::Connecting {
                *state = SessionState::Negotiating;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(SessionError::NotReady { state: observed });
        }

        match self.negotiate().await {
            Ok(result) => {
                tracing::info!(
                    connection = %self.shared.connection_id,
                    server = %result.server_info.name,
                    version = %result.protocol_version,
                    "Session ready"
                );
                let _ = self.shared.server.set(result.clone());
                self.shared.state.send_if_modified(|state| {
                    if *state == SessionState::Negotiating {
                        *state = SessionState::Ready;
                        true
                    } else {
                        false
                    }
                });
                match self.state() {
                    SessionState::Ready => Ok(result),
                    _ => Err(SessionError::ConnectionClosed),
                }
            }
            Err(error) => {
                tracing::warn!(connection = %self.shared.connection_id, error = %error, "Initialisation failed");
                self.close().await;
                Err(error)
            }
        }
    }

    async fn negotiate(&self) -> Result<InitializeResult, SessionError> {
        let params = InitializeParams {
            protocol_version: self.options.protocol_version.clone(),
            capabilities: self.options.capabilities.clone(),
            client_info: self.options.client_info.clone(),
        };
        let params = to_payload(methods::INITIALIZE, &params)?;

        let outcome = self
            .send_request(methods::INITIALIZE, Some(params), self.options.request_timeout)
            .await?;
        let result: InitializeResult = match outcome {
            Outcome::Result(value) => from_payload(methods::INITIALIZE, value)?,
            Outcome::Error(error) => {
                return Err(SessionError::Negotiation {
                    reason: error.to_string(),
                });
            }
        };

        if !self
            .options
            .supported_versions
            .iter()
            .any(|v| *v == result.protocol_version)
        {
            return Err(SessionError::Negotiation {
                reason: format!(
                    "server answered with unsupported protocol version '{}'",
                    result.protocol_version
                ),
            });
        }

        self.shared
            .send(Notification::new(methods::INITIALIZED, None).into())
            .await?;
        Ok(result)
    }

    /// Checks the server is alive. Allowed in every state but `Closed`.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the server answers with an error, or a
    /// connection error.
    pub async fn ping(&self) -> Result<(), SessionError> {
        let state = self.state();
        if state == SessionState::Closed {
            return Err(SessionError::NotReady { state });
        }
        match self
            .send_request(methods::PING, None, self.options.request_timeout)
            .await?
        {
            Outcome::Result(_) => Ok(()),
            Outcome::Error(error) => Err(SessionError::Rejected(error)),
        }
    }

    /// Lists every resource, static and templated.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` on a server error, or a connection error.
    pub async fn list_resources(&self) -> Result<Vec<Descriptor>, SessionError> {
        let result: ListResourcesResult = self.list(methods::RESOURCES_LIST).await?;
        Ok(result.resources)
    }

    /// Lists only the templated resources.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` on a server error, or a connection error.
    pub async fn list_resource_templates(&self) -> Result<Vec<Descriptor>, SessionError> {
        let result: ListResourceTemplatesResult = self.list(methods::RESOURCE_TEMPLATES_LIST).await?;
        Ok(result.resource_templates)
    }

    /// Lists the tools together with their input schemas.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` on a server error, or a connection error.
    pub async fn list_tools(&self) -> Result<Vec<ToolListing>, SessionError> {
        let result: ListToolsResult = self.list(methods::TOOLS_LIST).await?;
        Ok(result.tools)
    }

    /// Lists the prompts.
    ///
    /// # Errors
    ///
    /// Returns `Rejected` on a server error, or a connection error.
    pub async fn list_prompts(&self) -> Result<Vec<Descriptor>, SessionError> {
        let result: ListPromptsResult = self.list(methods::PROMPTS_LIST).await?;
        Ok(result.prompts)
    }

    /// Reads a resource by concrete URI.
    ///
    /// # Errors
    ///
    /// Only connection-level failures are errors; a server-side failure is
    /// an `InvocationResult::Error`.
    pub async fn read_resource(&self, uri: &str) -> Result<InvocationResult<ReadResourceResult>, SessionError> {
        let params = to_payload(
            methods::RESOURCES_READ,
            &ReadResourceParams {
                uri: uri.to_string(),
            },
        )?;
        self.invoke(methods::RESOURCES_READ, params).await
    }

    /// Calls a tool.
    ///
    /// # Errors
    ///
    /// Only connection-level failures are errors; a server-side failure is
    /// an `InvocationResult::Error`.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<InvocationResult<CallToolResult>, SessionError> {
        let params = to_payload(
            methods::TOOLS_CALL,
            &CallToolParams {
                name: name.to_string(),
                arguments,
            },
        )?;
        self.invoke(methods::TOOLS_CALL, params).await
    }

    /// Renders a prompt.
    ///
    /// # Errors
    ///
    /// Only connection-level failures are errors; a server-side failure is
    /// an `InvocationResult::Error`.
    pub async fn get_prompt(&self, name: &str, arguments: Value) -> Result<InvocationResult<GetPromptResult>, SessionError> {
        let params = to_payload(
            methods::PROMPTS_GET,
            &GetPromptParams {
                name: name.to_string(),
                arguments,
            },
        )?;
        self.invoke(methods::PROMPTS_GET, params).await
    }

    /// Sends an arbitrary request using the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` outside `Ready`, `Cancelled` on timeout, or
    /// `ConnectionClosed` if the connection goes away first.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Outcome, SessionError> {
        self.request_with_timeout(method, params, self.options.request_timeout)
            .await
    }

    /// Sends an arbitrary request with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` outside `Ready`, `Cancelled` on timeout, or
    /// `ConnectionClosed` if the connection goes away first.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Outcome, SessionError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(SessionError::NotReady { state });
        }
        self.send_request(method, params, timeout).await
    }

    /// Closes the session. Every pending call fails with `ConnectionClosed`.
    pub async fn close(&self) {
        self.shared.shutdown().await;
    }

    /// Waits until the session is closed, by either side.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }

    async fn list<T: DeserializeOwned>(&self, method: &str) -> Result<T, SessionError> {
        match self.request(method, None).await? {
            Outcome::Result(value) => Ok(from_payload(method, value)?),
            Outcome::Error(error) => Err(SessionError::Rejected(error)),
        }
    }

    async fn invoke<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<InvocationResult<T>, SessionError> {
        match self.request(method, Some(params)).await? {
            Outcome::Result(value) => Ok(InvocationResult::Ok(from_payload(method, value)?)),
            Outcome::Error(error) => Ok(InvocationResult::Error(error)),
        }
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Outcome, SessionError> {
        let id = RequestId::Number(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let waiter = self.shared.pending.insert(id.clone(), method).await?;

        let mut request = Request::new(id.clone(), method);
        request.params = params;
        tracing::debug!(connection = %self.shared.connection_id, id = %id, method = %method, "Sending request");

        if let Err(error) = self.shared.send(request.into()).await {
            self.shared.pending.cancel(&id).await;
            return Err(error);
        }

        let reply = match timeout {
            Some(limit) => {
                if let Ok(reply) = tokio::time::timeout(limit, waiter).await {
                    reply
                } else {
                    self.abandon(&id, "timed out").await;
                    return Err(SessionError::Cancelled { id });
                }
            }
            None => waiter.await,
        };

        // A dropped sender means the table was torn down without a reply.
        reply.unwrap_or(Err(SessionError::ConnectionClosed))
    }

    async fn abandon(&self, id: &RequestId, reason: &str) {
        tracing::warn!(connection = %self.shared.connection_id, id = %id, reason, "Abandoning request");
        self.shared.pending.cancel(id).await;

        let params = CancelledParams {
            request_id: id.clone(),
            reason: Some(reason.to_string()),
        };
        if let Ok(params) = serde_json::to_value(params) {
            let _ = self
                .shared
                .send(Notification::new(methods::CANCELLED, Some(params)).into())
                .await;
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.receiver_task.abort();
    }
}

fn to_payload<T: Serialize>(method: &str, value: &T) -> Result<Value, SessionError> {
    serde_json::to_value(value).map_err(|source| {
        SessionError::Decode(DecodeError::Payload {
            method: method.to_string(),
            source,
        })
    })
}

fn from_payload<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value).map_err(|source| DecodeError::Payload {
        method: method.to_string(),
        source,
    })
}

async fn receive_loop(shared: Arc<Shared>, mut receiver: FrameReceiver) {
    while let Some(frame) = receiver.recv().await {
        match decode(&frame) {
            Ok(Envelope::Response(response)) => {
                let id = response.id.clone();
                if !shared.pending.resolve(response).await {
                    tracing::warn!(connection = %shared.connection_id, id = %id, "Discarding unmatched response");
                }
            }
            Ok(Envelope::Request(request)) => {
                let result = if request.method == methods::PING {
                    Ok(json!({}))
                } else {
                    Err(ErrorObject::method_not_found(&request.method))
                };
                let response = Response::to(&request, result);
                if shared.send(response.into()).await.is_err() {
                    break;
                }
            }
            Ok(Envelope::Notification(notification)) => {
                tracing::debug!(
                    connection = %shared.connection_id,
                    method = %notification.method,
                    "Ignoring server notification"
                );
            }
            Err(e) => {
                tracing::warn!(connection = %shared.connection_id, error = %e, "Dropping malformed frame");
            }
        }
    }

    shared.shutdown().await;
}
