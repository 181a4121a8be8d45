//! Server side of a session.
//!
//! Each accepted connection runs its own session through this lifecycle:
//!
//! 1. **Initialisation**: version agreement and capability advertisement
//! 2. **Operation**: resources, tools and prompts served from the registry
//! 3. **Shutdown**: the peer closes, or the process receives a signal
//!
//! The receive loop never waits for a handler. Each request past
//! initialisation runs as its own task and writes its response through a
//! clone of the connection's sender, so responses may leave in any order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::mcp::engine;
use crate::mcp::error::TransportError;
use crate::mcp::protocol::{
    decode, encode, methods, Envelope, ErrorCode, ErrorObject, Notification, Request, Response,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::mcp::registry::Registry;
use crate::mcp::transport::{self, Accept, Connection, FrameReceiver, FrameSender};
use crate::mcp::types::{
    CallToolParams, CancelledParams, Capabilities, FamilyCapability, GetPromptParams,
    InitializeParams, InitializeResult, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, ReadResourceParams, ServerInfo, ToolListing,
};

/// Server state in the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize answered, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Connection closing.
    ShuttingDown,
}

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Server-side settings shared by every session.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Identity reported during initialisation.
    pub info: ServerInfo,
    /// Usage hints returned with the initialize result.
    pub instructions: Option<String>,
    /// Protocol versions this server speaks, newest first.
    pub supported_versions: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            info: ServerInfo::default(),
            instructions: None,
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl ServerOptions {
    /// Builds options from the `server` section of the configuration.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            info: ServerInfo {
                name: config.name.clone(),
                ..ServerInfo::default()
            },
            instructions: config.instructions.clone(),
            ..Self::default()
        }
    }
}

/// Picks the version to answer with: the client's if supported, otherwise
/// the newest this server knows.
#[must_use]
pub fn negotiate_version(requested: &str, supported: &[String]) -> String {
    if supported.iter().any(|v| v == requested) {
        requested.to_string()
    } else {
        supported
            .first()
            .cloned()
            .unwrap_or_else(|| requested.to_string())
    }
}

/// Serves one registry to any number of connections.
#[derive(Clone)]
pub struct McpServer {
    registry: Arc<Registry>,
    options: Arc<ServerOptions>,
}

impl McpServer {
    /// Creates a server. The registry is frozen from here on.
    #[must_use]
    pub fn new(registry: Registry, options: ServerOptions) -> Self {
        Self {
            registry: Arc::new(registry),
            options: Arc::new(options),
        }
    }

    /// Capabilities advertised to clients: one entry per non-empty catalog.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        let offer = |empty: bool| (!empty).then(FamilyCapability::default);
        Capabilities {
            resources: offer(self.registry.resources().is_empty()),
            tools: offer(self.registry.tools().is_empty()),
            prompts: offer(self.registry.prompts().is_empty()),
        }
    }

    /// Accepts connections until SIGINT or SIGTERM (Ctrl+C on Windows).
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    pub async fn run<L: Accept>(&self, listener: L) -> Result<(), TransportError> {
        let signal = shutdown_signal()?;
        self.serve(listener, signal).await;
        Ok(())
    }

    /// Serves a single stdio session until it ends or a signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handlers cannot be installed.
    pub async fn run_stdio(&self) -> Result<(), TransportError> {
        let signal = shutdown_signal()?;
        tokio::select! {
            state = self.serve_connection(transport::stdio()) => {
                tracing::debug!(?state, "stdio session ended");
            }
            () = signal => {}
        }
        Ok(())
    }

    /// Accepts connections until `shutdown` completes. Sessions already
    /// running are left to finish on their own.
    pub async fn serve<L, F>(&self, listener: L, shutdown: F)
    where
        L: Accept,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Listener stopped");
                    return;
                }

                accepted = listener.accept() => match accepted {
                    Ok(connection) => {
                        tracing::info!(connection = %connection.id(), peer = %connection.peer(), "Accepted connection");
                        self.spawn_session(connection);
                    }
                    Err(TransportError::Closed) => {
                        tracing::warn!("Listener closed");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }

    /// Runs a session for `connection` on its own task.
    pub fn spawn_session(&self, connection: Connection) -> JoinHandle<ServerState> {
        let server = self.clone();
        tokio::spawn(async move { server.serve_connection(connection).await })
    }

    /// Runs a session for `connection` until the peer closes. Returns the
    /// final state.
    pub async fn serve_connection(&self, connection: Connection) -> ServerState {
        let connection_id = connection.id();
        let (sender, receiver) = connection.split();
        let session = ServerSession {
            connection_id,
            state: ServerState::AwaitingInit,
            protocol_version: None,
            server: self.clone(),
            sender,
        };
        session.run(receiver).await
    }
}

/// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl Future<Output = ()>, TransportError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }

            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    })
}

/// Resolves on the first Ctrl+C.
#[cfg(windows)]
fn shutdown_signal() -> Result<impl Future<Output = ()>, TransportError> {
    Ok(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        } else {
            std::future::pending::<()>().await;
        }
    })
}

/// Per-connection state.
struct ServerSession {
    connection_id: Uuid,
    state: ServerState,
    protocol_version: Option<String>,
    server: McpServer,
    sender: FrameSender,
}

impl ServerSession {
    async fn run(mut self, mut receiver: FrameReceiver) -> ServerState {
        while let Some(frame) = receiver.recv().await {
            match decode(&frame) {
                Ok(Envelope::Request(request)) => {
                    if self.handle_request(request).await.is_err() {
                        break;
                    }
                }
                Ok(Envelope::Notification(notification)) => {
                    self.handle_notification(&notification);
                }
                Ok(Envelope::Response(response)) => {
                    tracing::warn!(
                        connection = %self.connection_id,
                        id = %response.id,
                        "Discarding unmatched response"
                    );
                }
                Err(e) => {
                    tracing::warn!(connection = %self.connection_id, error = %e, "Dropping malformed frame");
                }
            }
        }

        self.state = ServerState::ShuttingDown;
        tracing::info!(
            connection = %self.connection_id,
            version = self.protocol_version.as_deref().unwrap_or("none"),
            "Session closed"
        );
        self.state
    }

    /// Handles an incoming request.
    ///
    /// Lifecycle requests are answered inline; everything else runs on its
    /// own task once the session is running.
    async fn handle_request(&mut self, request: Request) -> Result<(), TransportError> {
        tracing::debug!(
            connection = %self.connection_id,
            id = %request.id,
            method = %request.method,
            "Received request"
        );

        match request.method.as_str() {
            methods::INITIALIZE => {
                let result = self.handle_initialize(&request);
                self.respond(Response::to(&request, result)).await
            }
            methods::PING => self.respond(Response::to(&request, Ok(json!({})))).await,
            _ if self.state != ServerState::Running => {
                let error = ErrorObject::from_code(ErrorCode::NotInitialized);
                self.respond(Response::to(&request, Err(error))).await
            }
            _ => {
                self.spawn_dispatch(request);
                Ok(())
            }
        }
    }

    fn spawn_dispatch(&self, request: Request) {
        let registry = Arc::clone(&self.server.registry);
        let sender = self.sender.clone();
        let connection = self.connection_id;

        tokio::spawn(async move {
            let result = dispatch(&registry, &request).await;
            if let Err(error) = &result {
                tracing::debug!(
                    connection = %connection,
                    id = %request.id,
                    code = error.code.code(),
                    message = %error.message,
                    "Request failed"
                );
            }
            let frame = encode(&Response::to(&request, result).into());
            if sender.send(frame).await.is_err() {
                tracing::debug!(connection = %connection, id = %request.id, "Connection closed before response was sent");
            }
        });
    }

    async fn respond(&self, response: Response) -> Result<(), TransportError> {
        self.sender.send(encode(&response.into())).await
    }

    /// Handles an incoming notification.
    fn handle_notification(&mut self, notification: &Notification) {
        match notification.method.as_str() {
            methods::INITIALIZED if self.state == ServerState::Initialising => {
                self.state = ServerState::Running;
                tracing::info!(connection = %self.connection_id, "Session running");
            }
            methods::CANCELLED => {
                let params = notification
                    .params
                    .clone()
                    .map(serde_json::from_value::<CancelledParams>);
                match params {
                    Some(Ok(params)) => tracing::info!(
                        connection = %self.connection_id,
                        id = %params.request_id,
                        reason = params.reason.as_deref().unwrap_or(""),
                        "Client cancelled request"
                    ),
                    _ => tracing::debug!(connection = %self.connection_id, "Malformed cancellation"),
                }
            }
            other => {
                tracing::debug!(connection = %self.connection_id, method = %other, "Ignoring notification");
            }
        }
    }

    /// Handles the initialize request.
    fn handle_initialize(&mut self, request: &Request) -> Result<Value, ErrorObject> {
        if self.state != ServerState::AwaitingInit {
            return Err(ErrorObject::with_message(
                ErrorCode::InvalidRequest,
                "Session already initialised",
            ));
        }

        let params: InitializeParams = parse_params(request)?;
        let options = &self.server.options;
        let version = negotiate_version(&params.protocol_version, &options.supported_versions);

        tracing::info!(
            connection = %self.connection_id,
            client = %params.client_info.name,
            requested = %params.protocol_version,
            negotiated = %version,
            "Initialising session"
        );

        let result = InitializeResult {
            protocol_version: version.clone(),
            capabilities: self.server.capabilities(),
            server_info: options.info.clone(),
            instructions: options.instructions.clone(),
        };

        let value = to_result(&result)?;
        self.protocol_version = Some(version);
        self.state = ServerState::Initialising;
        Ok(value)
    }
}

/// Serves one post-initialisation request.
async fn dispatch(registry: &Registry, request: &Request) -> Result<Value, ErrorObject> {
    match request.method.as_str() {
        methods::RESOURCES_LIST => to_result(&ListResourcesResult {
            resources: registry.resources().list().cloned().collect(),
        }),
        methods::RESOURCE_TEMPLATES_LIST => to_result(&ListResourceTemplatesResult {
            resource_templates: registry.resources().templates().cloned().collect(),
        }),
        methods::RESOURCES_READ => {
            let params: ReadResourceParams = parse_params(request)?;
            let result = engine::read_resource(registry, &params.uri).await.into_result()?;
            to_result(&result)
        }
        methods::TOOLS_LIST => to_result(&ListToolsResult {
            tools: registry.tools().list().map(ToolListing::from).collect(),
        }),
        methods::TOOLS_CALL => {
            let params: CallToolParams = parse_params(request)?;
            let result = engine::call_tool(registry, &params.name, &params.arguments)
                .await
                .into_result()?;
            to_result(&result)
        }
        methods::PROMPTS_LIST => to_result(&ListPromptsResult {
            prompts: registry.prompts().list().cloned().collect(),
        }),
        methods::PROMPTS_GET => {
            let params: GetPromptParams = parse_params(request)?;
            let result = engine::get_prompt(registry, &params.name, &params.arguments)
                .await
                .into_result()?;
            to_result(&result)
        }
        other => Err(ErrorObject::method_not_found(other)),
    }
}

fn parse_params<T: DeserializeOwned>(request: &Request) -> Result<T, ErrorObject> {
    let params = request.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(params).map_err(|e| {
        ErrorObject::invalid_arguments(format!("Invalid {} params: {e}", request.method))
    })
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, ErrorObject> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        ErrorObject::internal("Internal error: failed to serialise result")
    })
}
