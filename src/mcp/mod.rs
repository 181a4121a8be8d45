//! Protocol core: wire codec, transports, sessions, registry and invocation.
//!
//! A server exposes three catalogs (resources, tools, prompts) to remote
//! clients. Both roles speak the same envelope format over a full-duplex
//! connection and negotiate a protocol version before anything else.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MCP Server                          │
//! │                                                             │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │   │  Transport  │───▶│   Session   │───▶│   Engine    │    │
//! │   │(tcp/sse/io) │    │ (lifecycle) │    │ (validate)  │    │
//! │   └─────────────┘    └─────────────┘    └─────────────┘    │
//! │          │                  │                  │            │
//! │          ▼                  ▼                  ▼            │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │   │   Frames    │    │  Envelopes  │    │  Registry   │    │
//! │   └─────────────┘    └─────────────┘    └─────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation prefers protocol version 2025-06-18 and accepts
//! 2025-03-26 and 2024-11-05.

pub mod client;
pub mod engine;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod sse;
pub mod template;
pub mod transport;
pub mod types;

pub use client::{ClientOptions, ClientSession};
pub use engine::InvocationResult;
pub use error::{DecodeError, HandlerError, RegistryError, SessionError, TransportError};
pub use protocol::{decode, encode, Envelope, ErrorCode, ErrorObject, MCP_PROTOCOL_VERSION};
pub use registry::Registry;
pub use server::{McpServer, ServerOptions};
pub use session::SessionState;
pub use sse::SseListener;
pub use transport::{Accept, Connection, Listener};
