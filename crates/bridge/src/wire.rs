//! Protocol frames: minimal JSON-RPC framing and correlation.
//!
//! One frame is one complete JSON object — a line on the stdio stream, a
//! request body in HTTP mode, an event payload in SSE mode. Responses may
//! complete out of order, so every response carries the originating
//! request's id; re-association is the client's job.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// An incoming request or notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub jsonrpc: String,
    /// Correlation id. Absent for notifications, which are never answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    #[must_use]
    pub fn new(id: impl Into<Value>, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.to_string(),
            params,
        }
    }

    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An outgoing response frame. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub jsonrpc: String,
    /// The originating request's id; `null` when it could not be recovered.
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl ResponseFrame {
    #[must_use]
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    #[must_use]
    pub fn error(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Decode one frame of input into a request.
///
/// Failures are local and recoverable: the returned `Err` is the
/// protocol-level error response to emit, carrying the best-effort id (or
/// null when the input was not even JSON).
pub fn decode_request(raw: &str) -> std::result::Result<RequestFrame, ResponseFrame> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| ResponseFrame::error(None, PARSE_ERROR, format!("parse error: {e}")))?;

    let recovered_id = value.get("id").cloned();
    let frame: RequestFrame = serde_json::from_value(value).map_err(|e| {
        ResponseFrame::error(
            recovered_id.clone(),
            INVALID_REQUEST,
            format!("invalid request: {e}"),
        )
    })?;

    if frame.jsonrpc != JSONRPC_VERSION {
        return Err(ResponseFrame::error(
            frame.id,
            INVALID_REQUEST,
            format!("invalid request: unsupported jsonrpc version '{}'", frame.jsonrpc),
        ));
    }

    Ok(frame)
}

/// Encode a response as one complete frame (a single line, no embedded
/// newlines — `serde_json` never emits raw control characters).
#[must_use]
pub fn encode_response(frame: &ResponseFrame) -> String {
    serde_json::to_string(frame).unwrap_or_else(|_| {
        // A response we built ourselves always serializes; keep the session
        // alive anyway if that assumption is ever broken.
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{INTERNAL_ERROR},"message":"response serialization failed"}}}}"#
        )
    })
}

/// Canonical key for a correlation id, used by the pending-request table.
/// JSON distinguishes `1` from `"1"`; serializing keeps them distinct.
#[must_use]
pub fn correlation_key(id: &Value) -> String {
    serde_json::to_string(id).unwrap_or_else(|_| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_round_trips() {
        let frame = RequestFrame::new(7, "tools/call", Some(json!({"name": "getPet"})));
        let encoded = serde_json::to_string(&frame).expect("encode");
        let decoded = decode_request(&encoded).expect("decode");
        assert_eq!(decoded, frame);
    }

    #[test]
    fn response_frame_round_trips() {
        let frame = ResponseFrame::result(json!("req-1"), json!({"ok": true}));
        let encoded = encode_response(&frame);
        let decoded: ResponseFrame = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, frame);

        let err = ResponseFrame::error(Some(json!(3)), METHOD_NOT_FOUND, "method not found");
        let decoded: ResponseFrame = serde_json::from_str(&encode_response(&err)).expect("decode");
        assert_eq!(decoded, err);
    }

    #[test]
    fn notifications_have_no_id() {
        let frame = decode_request(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .expect("decode");
        assert!(frame.is_notification());
    }

    #[test]
    fn malformed_json_yields_parse_error_with_null_id() {
        let err = decode_request("{not json").expect_err("parse error");
        assert_eq!(err.id, Value::Null);
        assert_eq!(err.error.as_ref().map(|e| e.code), Some(PARSE_ERROR));
    }

    #[test]
    fn missing_method_recovers_the_id() {
        let err = decode_request(r#"{"jsonrpc":"2.0","id":42}"#).expect_err("invalid request");
        assert_eq!(err.id, json!(42));
        assert_eq!(err.error.as_ref().map(|e| e.code), Some(INVALID_REQUEST));
    }

    #[test]
    fn wrong_version_is_rejected_with_id() {
        let err = decode_request(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#)
            .expect_err("invalid version");
        assert_eq!(err.id, json!(1));
        assert_eq!(err.error.as_ref().map(|e| e.code), Some(INVALID_REQUEST));
    }

    #[test]
    fn correlation_keys_distinguish_numbers_from_strings() {
        assert_ne!(correlation_key(&json!(1)), correlation_key(&json!("1")));
        assert_eq!(correlation_key(&json!(1)), correlation_key(&json!(1)));
    }
}
