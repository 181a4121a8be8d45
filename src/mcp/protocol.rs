//! Wire codec for the session protocol.
//!
//! Every frame on the wire is one self-describing envelope: a single-line
//! UTF-8 JSON object tagged with its `kind`.
//!
//! # Message Types
//!
//! - **Request**: a message expecting a response (has `id`, carries `params`)
//! - **Response**: a reply to a request (same `id`, carries `result` or `error`)
//! - **Notification**: a one-way message (no `id`, no response expected)
//!
//! ```text
//! {"kind":"request","id":7,"method":"tools/call","params":{"name":"add"}}
//! {"kind":"response","id":7,"method":"tools/call","result":{...}}
//! {"kind":"notification","method":"notifications/initialized"}
//! ```
//!
//! # Decoding Rules
//!
//! - `kind` and `method` are mandatory; unknown top-level fields are ignored
//! - Request IDs must be strings or integers (never `null`)
//! - A response carries exactly one of `result` and `error`
//! - Numbers keep their JSON representation, so `8.0` never decodes as `8`

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::mcp::error::DecodeError;

/// The protocol version this implementation prefers.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every protocol version this implementation can speak, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Server name reported during capability negotiation.
pub const SERVER_NAME: &str = "remote-mcp";

/// Standard method names.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const PING: &str = "ping";
    pub const RESOURCES_LIST: &str = "resources/list";
    pub const RESOURCE_TEMPLATES_LIST: &str = "resources/templates/list";
    pub const RESOURCES_READ: &str = "resources/read";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PROMPTS_LIST: &str = "prompts/list";
    pub const PROMPTS_GET: &str = "prompts/get";
}

/// A request correlation token.
///
/// IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl RequestId {
    fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::String(s) => Value::String(s.clone()),
        }
    }
}

/// Error codes carried in a response's `error` object.
///
/// The JSON-RPC 2.0 codes are kept for the generic failures; the
/// protocol-specific failures live in the server-defined range.
///
/// Codes compare by number, so `Other(-32601)` equals `MethodNotFound`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The envelope is not a valid request.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Arguments failed validation against the parameter schema.
    InvalidArguments,
    /// Internal error.
    InternalError,
    /// A handler failed while executing.
    HandlerFailure,
    /// The addressed resource, tool or prompt does not exist.
    NotFound,
    /// A handler produced output that violates the protocol.
    InvalidOutput,
    /// The request arrived before capability negotiation completed.
    NotInitialized,
    /// Any code this implementation does not know.
    Other(i64),
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidArguments => -32602,
            Self::InternalError => -32603,
            Self::HandlerFailure => -32000,
            Self::NotFound => -32001,
            Self::InvalidOutput => -32002,
            Self::NotInitialized => -32003,
            Self::Other(code) => code,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidArguments => "Invalid arguments",
            Self::InternalError => "Internal error",
            Self::HandlerFailure => "Handler failure",
            Self::NotFound => "Not found",
            Self::InvalidOutput => "Invalid output",
            Self::NotInitialized => "Session not initialised",
            Self::Other(_) => "Server error",
        }
    }

    /// Maps `Other` holding a known number to its named variant.
    #[must_use]
    pub fn normalize(self) -> Self {
        Self::from(self.code())
    }
}

impl PartialEq for ErrorCode {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for ErrorCode {}

impl std::hash::Hash for ErrorCode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.code().hash(state);
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidArguments,
            -32603 => Self::InternalError,
            -32000 => Self::HandlerFailure,
            -32001 => Self::NotFound,
            -32002 => Self::InvalidOutput,
            -32003 => Self::NotInitialized,
            other => Self::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// The `error` payload of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error code.
    pub code: ErrorCode,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error. An explicit `null` is kept
    /// as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl ErrorObject {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        let code = code.normalize();
        Self {
            code,
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.normalize(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Creates a method not found error.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::with_message(
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Creates an invalid arguments error.
    #[must_use]
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidArguments, message)
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, message)
    }

    fn to_value(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("code".to_string(), Value::from(self.code.code()));
        obj.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            obj.insert("data".to_string(), data.clone());
        }
        Value::Object(obj)
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code.code())
    }
}

/// The three envelope kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
}

impl MessageKind {
    /// Returns the wire spelling of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Notification => "notification",
        }
    }
}

/// A request expecting a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    pub params: Option<Value>,
}

impl Request {
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>) -> Self {
        Self {
            id,
            method: method.into(),
            params: None,
        }
    }

    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// What a response carries: a result or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

/// A reply to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The method of the request being answered.
    pub method: String,

    /// The result or error.
    pub outcome: Outcome,
}

impl Response {
    /// Creates a new success response.
    #[must_use]
    pub fn success(id: RequestId, method: impl Into<String>, result: Value) -> Self {
        Self {
            id,
            method: method.into(),
            outcome: Outcome::Result(result),
        }
    }

    /// Creates a new error response.
    #[must_use]
    pub fn error(id: RequestId, method: impl Into<String>, error: ErrorObject) -> Self {
        Self {
            id,
            method: method.into(),
            outcome: Outcome::Error(error),
        }
    }

    /// Creates a response answering `request`.
    #[must_use]
    pub fn to(request: &Request, result: Result<Value, ErrorObject>) -> Self {
        match result {
            Ok(value) => Self::success(request.id.clone(), request.method.clone(), value),
            Err(error) => Self::error(request.id.clone(), request.method.clone(), error),
        }
    }
}

/// A one-way message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    pub params: Option<Value>,
}

impl Notification {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Envelope {
    /// Returns the kind of this envelope.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Request(_) => MessageKind::Request,
            Self::Response(_) => MessageKind::Response,
            Self::Notification(_) => MessageKind::Notification,
        }
    }

    /// Returns the method name of this envelope.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Response(resp) => &resp.method,
            Self::Notification(notif) => &notif.method,
        }
    }

    /// Returns the correlation ID, if this kind carries one.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Notification(_) => None,
        }
    }
}

impl From<Request> for Envelope {
    fn from(req: Request) -> Self {
        Self::Request(req)
    }
}

impl From<Response> for Envelope {
    fn from(resp: Response) -> Self {
        Self::Response(resp)
    }
}

impl From<Notification> for Envelope {
    fn from(notif: Notification) -> Self {
        Self::Notification(notif)
    }
}

/// Serialises an envelope into a single-line JSON frame.
#[must_use]
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let mut obj = Map::new();
    obj.insert(
        "kind".to_string(),
        Value::String(envelope.kind().as_str().to_string()),
    );
    if let Some(id) = envelope.id() {
        obj.insert("id".to_string(), id.to_value());
    }
    obj.insert(
        "method".to_string(),
        Value::String(envelope.method().to_string()),
    );

    match envelope {
        Envelope::Request(Request { params, .. })
        | Envelope::Notification(Notification { params, .. }) => {
            if let Some(params) = params {
                obj.insert("params".to_string(), params.clone());
            }
        }
        Envelope::Response(resp) => match &resp.outcome {
            Outcome::Result(result) => {
                obj.insert("result".to_string(), result.clone());
            }
            Outcome::Error(error) => {
                obj.insert("error".to_string(), error.to_value());
            }
        },
    }

    Value::Object(obj).to_string().into_bytes()
}

/// Parses one frame into an envelope.
///
/// # Errors
///
/// Returns a `DecodeError` if the bytes are not JSON, not an object, or do
/// not satisfy the envelope rules described in the module documentation.
pub fn decode(frame: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_slice(frame)?;
    let Value::Object(mut obj) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let kind = take_string(&mut obj, "kind")?;
    let method = take_string(&mut obj, "method")?;
    if method.is_empty() {
        return Err(DecodeError::InvalidField {
            field: "method",
            reason: "cannot be empty".to_string(),
        });
    }

    match kind.as_str() {
        "request" => {
            let id = take_id(&mut obj)?.ok_or(DecodeError::MissingField("id"))?;
            Ok(Envelope::Request(Request {
                id,
                method,
                params: obj.remove("params"),
            }))
        }
        "response" => {
            let id = take_id(&mut obj)?.ok_or(DecodeError::MissingField("id"))?;
            let outcome = match (obj.remove("result"), obj.remove("error")) {
                (Some(result), None) => Outcome::Result(result),
                (None, Some(error)) => {
                    let error = serde_json::from_value(error).map_err(|e| {
                        DecodeError::InvalidField {
                            field: "error",
                            reason: e.to_string(),
                        }
                    })?;
                    Outcome::Error(error)
                }
                (Some(_), Some(_)) => return Err(DecodeError::AmbiguousOutcome),
                (None, None) => return Err(DecodeError::MissingField("result")),
            };
            Ok(Envelope::Response(Response {
                id,
                method,
                outcome,
            }))
        }
        "notification" => Ok(Envelope::Notification(Notification {
            method,
            params: obj.remove("params"),
        })),
        _ => Err(DecodeError::UnknownKind(kind)),
    }
}

fn take_string(obj: &mut Map<String, Value>, field: &'static str) -> Result<String, DecodeError> {
    match obj.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::InvalidField {
            field,
            reason: "must be a string".to_string(),
        }),
        None => Err(DecodeError::MissingField(field)),
    }
}

fn take_id(obj: &mut Map<String, Value>) -> Result<Option<RequestId>, DecodeError> {
    let invalid = || DecodeError::InvalidField {
        field: "id",
        reason: "must be an integer or a string".to_string(),
    };

    match obj.remove("id") {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(RequestId::String(s))),
        Some(Value::Number(n)) => n.as_i64().map(RequestId::Number).map(Some).ok_or_else(invalid),
        Some(_) => Err(invalid()),
    }
}
