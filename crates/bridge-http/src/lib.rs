//! Outbound HTTP execution for the OpenAPI bridge.
//!
//! This crate owns everything between a planned tool invocation and the
//! backend API: credential injection, secret redaction, request building,
//! and response conversion into MCP content. It intentionally knows nothing
//! about OpenAPI documents or transports.

pub mod auth;
pub mod outbound;
pub mod semantics;
