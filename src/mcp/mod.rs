//! MCP (Model Context Protocol) client support for mcphost
//!
//! This module provides the client side of MCP: transports, the JSON-RPC
//! layer, the lifecycle handshake, and [`session::ToolSession`], which the
//! host uses to list and invoke the tools of one server.
//!
//! The implementation targets protocol revision **2025-11-25** and accepts
//! the older revisions listed in [`types::SUPPORTED_PROTOCOL_VERSIONS`].
//!
//! # Module Layout
//!
//! - `types`     -- MCP protocol types and JSON-RPC primitives
//! - `client`    -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`  -- Typed MCP lifecycle wrapper over `JsonRpcClient`
//! - `transport` -- `Transport` trait and the stdio, SSE and streamable HTTP
//!   implementations
//! - `config`    -- Per-server connection descriptors
//! - `session`   -- One negotiated connection with content normalization

pub mod client;
pub mod config;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
