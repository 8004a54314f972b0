//! OpenAPI document loading and operation → MCP tool conversion.
//!
//! This crate produces the raw operation catalog the bridge filters at
//! startup. It owns no routing policy and no transport state: callers decide
//! which operations are exposed and execute the resulting request plans.

pub mod catalog;
pub mod error;
pub mod toolgen;
