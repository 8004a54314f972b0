//! Request dispatch: protocol frames in, protocol frames out.
//!
//! The service is shared, read-only state: the exposed tool catalog plus the
//! outbound client. Sessions and workers call [`ToolService::handle`]
//! concurrently.

use crate::wire::{
    INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, RequestFrame, ResponseFrame,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::debug;
use unrelated_bridge_http::outbound::OutboundClient;
use unrelated_bridge_openapi::toolgen::GeneratedTool;

const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

pub struct ToolService {
    server_name: String,
    /// Pre-rendered `tools/list` payload; the catalog never changes after
    /// startup.
    tool_list: Value,
    tools: HashMap<String, GeneratedTool>,
    client: OutboundClient,
}

impl ToolService {
    #[must_use]
    pub fn new(server_name: String, tools: Vec<GeneratedTool>, client: OutboundClient) -> Self {
        let listed: Vec<Value> = tools
            .iter()
            .map(|t| serde_json::to_value(t.to_tool()).unwrap_or_else(|_| json!({})))
            .collect();
        let tool_list = json!({ "tools": listed });

        let tools = tools.into_iter().map(|t| (t.name.clone(), t)).collect();

        Self {
            server_name,
            tool_list,
            tools,
            client,
        }
    }

    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Handle one decoded frame. Returns `None` for notifications, which
    /// are accepted and never answered.
    pub async fn handle(&self, frame: RequestFrame) -> Option<ResponseFrame> {
        let Some(id) = frame.id.clone() else {
            debug!(method = %frame.method, "ignoring notification");
            return None;
        };

        let response = match frame.method.as_str() {
            "initialize" => ResponseFrame::result(id, self.initialize_result(frame.params.as_ref())),
            "ping" => ResponseFrame::result(id, json!({})),
            "tools/list" => ResponseFrame::result(id, self.tool_list.clone()),
            "tools/call" => self.handle_tool_call(id, frame.params.as_ref()).await,
            other => ResponseFrame::error(
                Some(id),
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };

        Some(response)
    }

    fn initialize_result(&self, params: Option<&Value>) -> Value {
        // Echo the client's protocol version; we have no version-specific
        // behavior to negotiate.
        let protocol_version = params
            .and_then(|p| p.get("protocolVersion"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        json!({
            "protocolVersion": protocol_version,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.server_name,
                "version": env!("CARGO_PKG_VERSION"),
            }
        })
    }

    async fn handle_tool_call(&self, id: Value, params: Option<&Value>) -> ResponseFrame {
        let Some(name) = params.and_then(|p| p.get("name")).and_then(Value::as_str) else {
            return ResponseFrame::error(
                Some(id),
                INVALID_PARAMS,
                "tools/call requires a string 'name' parameter",
            );
        };

        let Some(tool) = self.tools.get(name) else {
            return ResponseFrame::error(
                Some(id),
                METHOD_NOT_FOUND,
                format!("unknown tool: {name}"),
            );
        };

        let arguments = params
            .and_then(|p| p.get("arguments"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        match self.client.execute(&tool.plan, &arguments).await {
            Ok(result) => match serde_json::to_value(&result) {
                Ok(value) => ResponseFrame::result(id, value),
                Err(e) => ResponseFrame::error(
                    Some(id),
                    INTERNAL_ERROR,
                    format!("failed to serialize tool result: {e}"),
                ),
            },
            Err(e) => {
                // Outbound errors are already redacted; redact once more in
                // case a message was assembled from raw parts.
                let message = self.client.injector().redact(&e.to_string());
                debug!(tool = %name, error = %message, "tool call failed");
                ResponseFrame::error(Some(id), INTERNAL_ERROR, message)
            }
        }
    }
}
