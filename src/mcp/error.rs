//! Error types for the protocol core.
//!
//! Errors tied to a single request never leave the session as one of these
//! types; they travel inside a response as an [`ErrorObject`]. The enums
//! here describe failures of the frame, the connection, the session or the
//! registry itself.

use std::io;

use thiserror::Error;

use crate::mcp::protocol::{ErrorObject, RequestId};
use crate::mcp::registry::CatalogKind;
use crate::mcp::session::SessionState;

/// A frame that could not be turned into an envelope.
///
/// Malformed frames are logged and dropped; they never close a connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON (or was truncated).
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame is valid JSON but not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// A mandatory envelope field is absent.
    #[error("envelope is missing required field '{0}'")]
    MissingField(&'static str),

    /// An envelope field has the wrong shape.
    #[error("invalid envelope field '{field}': {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// The `kind` tag is not one of request, response, notification.
    #[error("unknown envelope kind '{0}'")]
    UnknownKind(String),

    /// A response carried both `result` and `error`.
    #[error("response carries both 'result' and 'error'")]
    AmbiguousOutcome,

    /// A well-formed envelope whose payload does not match the method's shape.
    #[error("unexpected payload for '{method}'")]
    Payload {
        /// Method whose payload was being decoded.
        method: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer (or the local side) closed the connection.
    #[error("connection closed")]
    Closed,

    /// The underlying socket or pipe failed.
    #[error("transport I/O error")]
    Io(#[from] io::Error),

    /// An HTTP request on the event-stream transport failed.
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// The event stream did not announce where to post messages.
    #[error("event stream handshake failed: {0}")]
    Handshake(String),
}

/// Connection-level failures surfaced to the calling application.
///
/// A `SessionError` means the call could not be delivered or answered at
/// all, as opposed to an application-level error returned by the peer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection closed before a response arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The wait for a response was abandoned (timeout or explicit cancel).
    #[error("request {id} cancelled")]
    Cancelled {
        /// The request that was cancelled.
        id: RequestId,
    },

    /// Capability negotiation failed; the session is closed.
    #[error("protocol negotiation failed: {reason}")]
    Negotiation {
        /// Description of the mismatch.
        reason: String,
    },

    /// The operation is not allowed in the session's current state.
    #[error("session is not ready (state: {state:?})")]
    NotReady {
        /// State the session was in.
        state: SessionState,
    },

    /// The peer answered an enumeration call with an error.
    #[error("request rejected: {0}")]
    Rejected(ErrorObject),

    /// The peer's response did not decode.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors raised while building or querying a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A key was registered twice in the same catalog.
    #[error("duplicate {catalog} key: {key}")]
    DuplicateKey {
        /// Catalog the key was registered in.
        catalog: CatalogKind,
        /// The duplicated key.
        key: String,
    },

    /// A resource key looked like a template but could not be parsed.
    #[error("invalid URI template '{template}': {reason}")]
    InvalidTemplate {
        /// The template as registered.
        template: String,
        /// Description of what's wrong.
        reason: String,
    },

    /// No entry matches the requested key.
    #[error("{catalog} not found: {key}")]
    NotFound {
        /// Catalog that was searched.
        catalog: CatalogKind,
        /// The requested key.
        key: String,
    },
}

/// Failure reported by a resource, tool or prompt handler.
///
/// The invocation engine turns it into a `HandlerFailure` response with the
/// cause attached as detail.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Creates a handler error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a handler error wrapping an underlying cause.
    #[must_use]
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns the message without the cause.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the underlying cause rendered as text, if any.
    #[must_use]
    pub fn cause(&self) -> Option<String> {
        self.source.as_ref().map(ToString::to_string)
    }
}
