//! The network listener: many independent client sessions over HTTP.
//!
//! Two modes share one axum app shape: `http` answers one frame per POST,
//! `sse` gives each client a server-sent-event stream fed by its own
//! session engine. A liveness probe is exposed either way, independent of
//! any session. Sessions never share mutable state; a slow or dead client
//! only ever stalls its own bounded queues.

use super::{ServeContext, ServerTransport, TransportMode, spawn_signal_watcher};
use crate::error::{BridgeError, Result};
use crate::service::ToolService;
use crate::session::{PendingRequests, SessionLimits, run_dispatch};
use crate::wire::{RequestFrame, ResponseFrame, decode_request, encode_response};
use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct NetworkListener {
    ctx: ServeContext,
    mode: TransportMode,
    host: String,
    port: u16,
}

impl NetworkListener {
    #[must_use]
    pub fn new(ctx: ServeContext, mode: TransportMode, host: String, port: u16) -> Self {
        Self {
            ctx,
            mode,
            host,
            port,
        }
    }
}

#[derive(Clone)]
struct AppState {
    service: Arc<ToolService>,
    limits: SessionLimits,
    /// Bounds concurrent executions in plain-HTTP mode, where there is no
    /// per-session pool.
    gate: Arc<Semaphore>,
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    shutdown: CancellationToken,
}

/// Intake side of one SSE session, shared with the POST endpoint.
#[derive(Clone)]
struct SessionHandle {
    intake: mpsc::Sender<RequestFrame>,
    responses: mpsc::Sender<ResponseFrame>,
}

#[async_trait]
impl ServerTransport for NetworkListener {
    async fn serve(self: Box<Self>) -> Result<()> {
        let shutdown = CancellationToken::new();
        spawn_signal_watcher(shutdown.clone());

        let state = AppState {
            service: Arc::clone(&self.ctx.service),
            limits: self.ctx.limits,
            gate: Arc::new(Semaphore::new(self.ctx.limits.max_concurrency)),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            shutdown: shutdown.clone(),
        };

        // On shutdown, dropping the registry's senders lets each session
        // stream flush its queued frames and end.
        {
            let sessions = Arc::clone(&state.sessions);
            let token = shutdown.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                sessions.write().clear();
            });
        }

        let app = match self.mode {
            TransportMode::Http => Router::new().route("/mcp", post(post_mcp)),
            TransportMode::Sse => Router::new()
                .route("/sse", get(open_sse))
                .route("/messages", post(post_messages)),
            TransportMode::Stdio => {
                return Err(BridgeError::Startup(
                    "stdio mode has no network listener".to_string(),
                ));
            }
        }
        .route("/health", get(health))
        .with_state(state);

        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                BridgeError::Startup(format!("failed to bind {}:{}: {e}", self.host, self.port))
            })?;

        let endpoint = match self.mode {
            TransportMode::Http => "/mcp",
            _ => "/sse",
        };
        info!(
            addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            endpoint = %endpoint,
            tools = self.ctx.service.tool_count(),
            "network listener running"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .map_err(|e| BridgeError::Runtime(format!("listener failed: {e}")))?;

        info!("network listener stopped");
        Ok(())
    }
}

/// Liveness probe: healthy once the listener is bound; the tool catalog is
/// always built before binding.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "tools": state.service.tool_count(),
    }))
}

/// Plain-HTTP mode: one frame in, one frame out.
async fn post_mcp(State(state): State<AppState>, body: String) -> Response {
    let frame = match decode_request(&body) {
        Ok(frame) => frame,
        Err(error_frame) => return Json(error_frame).into_response(),
    };

    let Ok(_permit) = state.gate.acquire().await else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    match state.service.handle(frame).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// SSE mode: open a session. The first event names the POST endpoint for
/// this session; responses follow as `message` events in completion order.
async fn open_sse(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let cancel = state.shutdown.child_token();
    let pending = Arc::new(PendingRequests::new());

    let (intake_tx, intake_rx) = mpsc::channel::<RequestFrame>(state.limits.intake_capacity());
    let (response_tx, response_rx) =
        mpsc::channel::<ResponseFrame>(state.limits.intake_capacity());

    tokio::spawn(run_dispatch(
        Arc::clone(&state.service),
        state.limits,
        intake_rx,
        response_tx.clone(),
        Arc::clone(&pending),
        cancel.clone(),
    ));

    state.sessions.write().insert(
        session_id.clone(),
        SessionHandle {
            intake: intake_tx,
            responses: response_tx,
        },
    );
    info!(session = %session_id, "sse session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?session={session_id}"));

    let stream_state = SessionStreamState {
        endpoint: Some(endpoint),
        responses: response_rx,
        pending,
        _guard: SessionGuard {
            id: session_id,
            sessions: Arc::clone(&state.sessions),
            cancel,
        },
    };

    let stream = futures::stream::unfold(stream_state, |mut st| async move {
        if let Some(event) = st.endpoint.take() {
            return Some((Ok::<_, Infallible>(event), st));
        }
        // The single writer for this session: ends when every sender
        // (registry + dispatch + workers) is gone.
        let frame = st.responses.recv().await?;
        st.pending.remove(&frame.id);
        let event = Event::default()
            .event("message")
            .data(encode_response(&frame));
        Some((Ok(event), st))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

struct SessionStreamState {
    endpoint: Option<Event>,
    responses: mpsc::Receiver<ResponseFrame>,
    pending: Arc<PendingRequests>,
    _guard: SessionGuard,
}

/// Tears one session down when its stream is dropped (client disconnect or
/// listener shutdown). Other sessions are untouched.
struct SessionGuard {
    id: String,
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    cancel: CancellationToken,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.sessions.write().remove(&self.id);
        self.cancel.cancel();
        debug!(session = %self.id, "sse session closed");
    }
}

#[derive(Deserialize)]
struct MessagesQuery {
    session: String,
}

/// SSE mode: feed one frame into an open session.
///
/// A full worker pool makes the send below wait, which holds this request
/// open — intake pauses instead of buffering unboundedly.
async fn post_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    let handle = state.sessions.read().get(&query.session).cloned();
    let Some(handle) = handle else {
        return (StatusCode::NOT_FOUND, "unknown session").into_response();
    };

    match decode_request(&body) {
        Ok(frame) => {
            if handle.intake.send(frame).await.is_err() {
                return (StatusCode::NOT_FOUND, "session closed").into_response();
            }
        }
        Err(error_frame) => {
            // Recoverable: the protocol error travels on the session stream.
            let _ = handle.responses.send(error_frame).await;
        }
    }

    StatusCode::ACCEPTED.into_response()
}
