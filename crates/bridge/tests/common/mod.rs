#![allow(dead_code)]

use anyhow::Context as _;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Query;
use axum::http::{HeaderMap, Method, Uri};
use axum::routing::get;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpListener;

pub use unrelated_bridge_test_support::{
    KillOnDrop, StdioSession, pick_unused_port, wait_http_ok,
};

pub fn bridge_bin() -> &'static str {
    env!("CARGO_BIN_EXE_unrelated-openapi-bridge")
}

/// Spawn a backend that echoes request details as JSON, plus a `/slow`
/// endpoint that sleeps for `ms` before responding.
pub async fn spawn_backend() -> anyhow::Result<String> {
    async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> axum::Json<Value> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        axum::Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query().unwrap_or(""),
            "x_api_key": header("x-api-key"),
            "authorization": header("authorization"),
            "body": String::from_utf8_lossy(&body),
        }))
    }

    async fn slow(Query(params): Query<HashMap<String, String>>) -> axum::Json<Value> {
        let ms: u64 = params
            .get("ms")
            .and_then(|v| v.parse().ok())
            .unwrap_or(100);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        axum::Json(json!({ "slept_ms": ms }))
    }

    let app = Router::new().route("/slow", get(slow)).fallback(echo);
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind backend")?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

/// Write a small petstore-style spec pointing at `base_url`.
pub fn write_spec(base_url: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    let spec = format!(
        r#"
openapi: "3.0.0"
info:
  title: Petstore
  version: "1.0"
servers:
  - url: {base_url}
paths:
  /pets:
    get:
      operationId: listPets
      tags: [pets, public]
      parameters:
        - name: limit
          in: query
          required: false
          schema: {{ type: integer }}
      responses:
        "200": {{ description: ok }}
    post:
      operationId: createPet
      tags: [pets, admin]
      requestBody:
        required: true
        content:
          application/json:
            schema:
              type: object
              required: [name]
              properties:
                name: {{ type: string }}
      responses:
        "201": {{ description: created }}
  /pets/{{petId}}:
    get:
      operationId: getPet
      tags: [pets, public]
      parameters:
        - name: petId
          in: path
          required: true
          schema: {{ type: string }}
      responses:
        "200": {{ description: ok }}
  /admin/stats:
    get:
      operationId: adminStats
      tags: [internal]
      responses:
        "200": {{ description: ok }}
  /slow:
    get:
      operationId: slowCall
      parameters:
        - name: ms
          in: query
          required: false
          schema: {{ type: integer }}
      responses:
        "200": {{ description: ok }}
"#
    );

    let file = tempfile::NamedTempFile::new().context("create temp spec")?;
    std::fs::write(file.path(), spec).context("write temp spec")?;
    Ok(file)
}

/// Spawn the bridge in a network mode; the child dies with its guard.
pub fn spawn_network_bridge(
    spec_path: &std::path::Path,
    mode: &str,
    port: u16,
    extra_args: &[&str],
) -> anyhow::Result<KillOnDrop> {
    let mut cmd = tokio::process::Command::new(bridge_bin());
    cmd.arg(spec_path)
        .arg("-t")
        .arg(mode)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .args(extra_args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit());
    let child = cmd.spawn().context("spawn bridge")?;
    Ok(KillOnDrop(child))
}

/// Names of the tools reported by a `tools/list` result frame.
pub fn tool_names(frame: &Value) -> Vec<String> {
    frame["result"]["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| t["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse the echoed backend JSON out of a `tools/call` result frame.
pub fn echoed_backend_body(frame: &Value) -> anyhow::Result<Value> {
    let text = frame["result"]["content"][0]["text"]
        .as_str()
        .context("tools/call missing result.content[0].text")?;
    serde_json::from_str(text).context("tool call text is not JSON")
}
