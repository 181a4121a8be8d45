//! remote-mcp: a Model Context Protocol session core
//!
//! This library lets a server expose resources, tools and prompts to remote
//! clients over a long-lived full-duplex connection, and lets a client
//! discover and invoke them.
//!
//! # Architecture
//!
//! The protocol core is layered bottom-up:
//!
//! - **Wire codec**: self-describing JSON envelopes, one per frame
//! - **Transport**: in-memory, TCP, stdio and HTTP event-stream connections
//! - **Session**: version negotiation and request correlation, per role
//! - **Registry**: keyed catalogs of resources, tools and prompts
//! - **Invocation engine**: argument validation and handler execution
//!
//! # Modules
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Configuration error types
//! - [`mcp`] - Protocol implementation
//! - [`samples`] - The demonstration catalog

pub mod config;
pub mod error;
pub mod mcp;
pub mod samples;
