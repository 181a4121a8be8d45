//! Handler traits for the three catalogs.
//!
//! Handlers are object-safe async traits so catalogs can store them as
//! `Arc<dyn …>`. Any `Fn` returning a `Send + 'static` future implements the
//! matching trait, which makes a plain `async fn` a valid handler:
//!
//! ```rust,no_run
//! use remote_mcp::mcp::error::HandlerError;
//! use remote_mcp::mcp::types::Arguments;
//! use serde_json::Value;
//!
//! async fn echo(arguments: Arguments) -> Result<Value, HandlerError> {
//!     let text = arguments.get("text").and_then(Value::as_str).unwrap_or_default();
//!     Ok(Value::String(format!("Echo: {text}")))
//! }
//! ```

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::mcp::error::HandlerError;
use crate::mcp::types::{Arguments, MessageDraft, ResourceBody};

/// Reads a resource. `bindings` holds the template placeholders (empty for
/// static resources).
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, uri: String, bindings: Arguments) -> Result<ResourceBody, HandlerError>;
}

/// Executes a tool with validated arguments.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Arguments) -> Result<Value, HandlerError>;
}

/// Renders a prompt. Roles are validated by the invocation engine.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn render(&self, arguments: Arguments) -> Result<Vec<MessageDraft>, HandlerError>;
}

#[async_trait]
impl<F, Fut> ResourceHandler for F
where
    F: Fn(String, Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ResourceBody, HandlerError>> + Send + 'static,
{
    async fn read(&self, uri: String, bindings: Arguments) -> Result<ResourceBody, HandlerError> {
        self(uri, bindings).await
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, arguments: Arguments) -> Result<Value, HandlerError> {
        self(arguments).await
    }
}

#[async_trait]
impl<F, Fut> PromptHandler for F
where
    F: Fn(Arguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<MessageDraft>, HandlerError>> + Send + 'static,
{
    async fn render(&self, arguments: Arguments) -> Result<Vec<MessageDraft>, HandlerError> {
        self(arguments).await
    }
}
