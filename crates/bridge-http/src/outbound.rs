//! Building and executing outbound backend requests for tool calls.

use crate::auth::AuthInjector;
use base64::Engine as _;
use mime::Mime;
use reqwest::{Client, Method};
use rmcp::model::{CallToolResult, Content};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("config error: {0}")]
    Config(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("http transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, OutboundError>;

/// Where a planned parameter is placed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Body,
}

/// One argument of a planned tool invocation.
#[derive(Debug, Clone)]
pub struct PlannedParam {
    /// Argument name as exposed on the tool.
    pub tool_name: String,
    /// Name used on the HTTP request (path segment, query key, header name,
    /// or body property).
    pub http_name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub default: Option<Value>,
}

/// The HTTP shape of one tool: everything needed to turn a set of JSON
/// arguments into a backend request.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub method: Method,
    /// Path template relative to the base URL, e.g. `/users/{id}`.
    pub path: String,
    pub params: Vec<PlannedParam>,
}

struct RequestParts {
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body_fields: HashMap<String, Value>,
    body_payload: Option<Value>,
}

/// Shared outbound client: one per process, safe for concurrent use across
/// sessions and workers. reqwest's internal pool bounds backend connections.
#[derive(Debug, Clone)]
pub struct OutboundClient {
    client: Client,
    base_url: Url,
    injector: AuthInjector,
    default_headers: Vec<(String, String)>,
    timeout: Duration,
}

impl OutboundClient {
    /// Build the shared client.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute http(s) URL.
    pub fn new(
        base_url: &str,
        injector: AuthInjector,
        default_headers: Vec<(String, String)>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OutboundError::Config(format!("Invalid base URL '{base_url}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(OutboundError::Config(format!(
                "Unsupported base URL scheme '{}'",
                base_url.scheme()
            )));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            injector,
            default_headers,
            timeout,
        })
    }

    #[must_use]
    pub fn injector(&self) -> &AuthInjector {
        &self.injector
    }

    /// Execute one planned tool invocation against the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if a required argument is missing, the request cannot
    /// be built, the transport fails, or the backend responds non-2xx. Error
    /// text never contains the injected secret.
    pub async fn execute(&self, plan: &RequestPlan, arguments: &Value) -> Result<CallToolResult> {
        let parts = build_request_parts(plan, arguments)?;
        let url = self.build_url(&parts)?;

        debug!(
            method = %plan.method,
            url = %self.injector.redacted_url(&url),
            "outbound backend call"
        );

        let mut request = self.client.request(plan.method.clone(), url);
        for (name, value) in &self.default_headers {
            request = request.header(name, value);
        }
        for (name, value) in &parts.headers {
            request = request.header(name, value);
        }
        request = self.injector.apply_to_request(request);
        if let Some(payload) = &parts.body_payload {
            request = request.json(payload);
        } else if !parts.body_fields.is_empty() {
            request = request.json(&parts.body_fields);
        }
        request = request.timeout(self.timeout);

        let response = request
            .send()
            .await
            .map_err(|e| OutboundError::Transport(self.sanitize_error(&e)))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| OutboundError::Transport(self.sanitize_error(&e)))?;

        if !status.is_success() {
            let body = body_to_value(&bytes, content_type.as_deref());
            let reason = status.canonical_reason().unwrap_or("Unknown");
            return Err(OutboundError::Http(self.injector.redact(&format!(
                "API returned {} {reason}: {body}",
                status.as_u16()
            ))));
        }

        if is_image_content_type(content_type.as_deref()) {
            let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
            let mime_type = content_type.unwrap_or_else(|| "image/*".to_string());
            return Ok(CallToolResult::success(vec![Content::image(b64, mime_type)]));
        }

        let body = body_to_value(&bytes, content_type.as_deref());
        let text = match &body {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    fn build_url(&self, parts: &RequestParts) -> Result<Url> {
        let joined = format!(
            "{}{}",
            self.base_url.as_str().trim_end_matches('/'),
            parts.path
        );
        let mut url = Url::parse(&joined)
            .map_err(|e| OutboundError::Runtime(format!("Invalid request URL: {e}")))?;

        if !parts.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &parts.query {
                pairs.append_pair(key, value);
            }
            drop(pairs);
        }

        self.injector.inject_query(&mut url);
        Ok(url)
    }

    fn sanitize_error(&self, e: &reqwest::Error) -> String {
        let mut msg = e.to_string();
        if let Some(u) = e.url() {
            msg = msg.replace(u.as_str(), &self.injector.redacted_url(u));
        }
        self.injector.redact(&msg)
    }
}

fn build_request_parts(plan: &RequestPlan, arguments: &Value) -> Result<RequestParts> {
    let mut path = plan.path.clone();
    if !path.starts_with('/') {
        path = format!("/{path}");
    }

    let mut query: Vec<(String, String)> = Vec::new();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut body_fields: HashMap<String, Value> = HashMap::new();
    let mut body_payload: Option<Value> = None;

    for param in &plan.params {
        let value = arguments
            .get(&param.tool_name)
            .cloned()
            .or_else(|| param.default.clone());

        if param.required && value.is_none() {
            return Err(OutboundError::Runtime(format!(
                "Missing required parameter: {}",
                param.tool_name
            )));
        }

        let value = match value {
            Some(Value::Null) | None => continue,
            Some(other) => other,
        };

        match param.location {
            ParamLocation::Path => {
                path = path.replace(
                    &format!("{{{}}}", param.http_name),
                    &value_to_string(&value),
                );
            }
            ParamLocation::Query => match &value {
                // Form style, exploded: one pair per array item.
                Value::Array(items) => {
                    for item in items {
                        query.push((param.http_name.clone(), value_to_string(item)));
                    }
                }
                other => query.push((param.http_name.clone(), value_to_string(other))),
            },
            ParamLocation::Header => {
                headers.push((param.http_name.clone(), value_to_string(&value)));
            }
            ParamLocation::Body => {
                if param.http_name == "body" && param.tool_name == "body" {
                    body_payload = Some(value);
                } else {
                    body_fields.insert(param.http_name.clone(), value);
                }
            }
        }
    }

    Ok(RequestParts {
        path,
        query,
        headers,
        body_fields,
        body_payload,
    })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_image_content_type(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|ct| ct.parse::<Mime>().ok())
        .is_some_and(|m| m.type_() == mime::IMAGE)
}

fn body_to_value(bytes: &[u8], content_type: Option<&str>) -> Value {
    match std::str::from_utf8(bytes) {
        Ok(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string())),
        Err(_) => {
            let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
            json!({
                "encoding": "base64",
                "mimeType": content_type,
                "data": b64
            })
        }
    }
}
