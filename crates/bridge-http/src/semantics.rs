//! MCP tool annotations derived from HTTP method semantics (RFC 9110).

use reqwest::Method;
use rmcp::model::ToolAnnotations;

/// Annotation hints for a tool backed by an HTTP operation.
///
/// `open_world_hint` is always `true`: every tool here talks to an external
/// system. Unknown or extension methods get only that hint.
#[must_use]
pub fn annotations_for_method(method: &Method) -> ToolAnnotations {
    let hints = if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
        (Some(true), Some(false), Some(true))
    } else if *method == Method::POST {
        (Some(false), Some(false), Some(false))
    } else if *method == Method::PUT || *method == Method::DELETE {
        (Some(false), Some(true), Some(true))
    } else if *method == Method::PATCH {
        // PATCH may or may not be idempotent; leave it unset.
        (Some(false), Some(true), None)
    } else {
        (None, None, None)
    };

    let (read_only, destructive, idempotent) = hints;
    ToolAnnotations {
        title: None,
        read_only_hint: read_only,
        destructive_hint: destructive,
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}
