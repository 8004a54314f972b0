//! The per-session execution engine: one reader, a bounded worker pool, one
//! serialized writer.
//!
//! The engine is transport-agnostic. Transports feed decoded frames into a
//! bounded intake channel (awaiting `send` is the backpressure point: a full
//! pool pauses intake instead of buffering unboundedly) and drain responses
//! from a bounded output channel with a single writer task. Workers never
//! touch the output stream directly.

use crate::service::ToolService;
use crate::wire::{RequestFrame, ResponseFrame, correlation_key};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Worker-pool and drain limits, shared by every session of the process.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Maximum in-flight tool executions per session.
    pub max_concurrency: usize,
    /// How long in-flight workers may run after drain starts.
    pub grace: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            grace: Duration::from_secs(10),
        }
    }
}

impl SessionLimits {
    /// Intake channel capacity: enough to keep the pool fed without
    /// unbounded buffering.
    #[must_use]
    pub fn intake_capacity(&self) -> usize {
        self.max_concurrency * 2
    }
}

/// In-flight requests for one session, keyed by canonical correlation id.
///
/// Entries are added when a worker is dispatched and removed by the writer
/// when the matching response frame is written.
#[derive(Debug, Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<String, Instant>>,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &Value) {
        self.inner
            .lock()
            .insert(correlation_key(id), Instant::now());
    }

    pub fn remove(&self, id: &Value) -> Option<Instant> {
        self.inner.lock().remove(&correlation_key(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Run one session's dispatch loop until the intake closes or `shutdown`
/// fires, then drain.
///
/// Draining gives in-flight workers `limits.grace` to finish before they are
/// cancelled. A cancelled worker simply never sends its response; it cannot
/// corrupt the writer, which owns the output stream exclusively. When this
/// function returns, every clone of `responses` created here is dropped, so
/// the writer observes end-of-channel once the caller drops its own sender.
pub async fn run_dispatch(
    service: Arc<ToolService>,
    limits: SessionLimits,
    mut intake: mpsc::Receiver<RequestFrame>,
    responses: mpsc::Sender<ResponseFrame>,
    pending: Arc<PendingRequests>,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(limits.max_concurrency));
    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        // Reap finished workers so the set does not grow with session age.
        while workers.try_join_next().is_some() {}

        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            maybe = intake.recv() => match maybe {
                Some(frame) => frame,
                None => break,
            },
        };

        let permit = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        if let Some(id) = &frame.id {
            pending.insert(id);
        }

        let service = Arc::clone(&service);
        let responses = responses.clone();
        workers.spawn(async move {
            let _permit = permit;
            if let Some(response) = service.handle(frame).await {
                // Send failure means the writer is gone; the session is
                // already tearing down.
                let _ = responses.send(response).await;
            }
        });
    }

    drain(&mut workers, limits.grace).await;
}

async fn drain(workers: &mut JoinSet<()>, grace: Duration) {
    if workers.is_empty() {
        return;
    }

    debug!(in_flight = workers.len(), "draining session workers");
    let timed_out = tokio::time::timeout(grace, async {
        while workers.join_next().await.is_some() {}
    })
    .await
    .is_err();

    if timed_out {
        warn!(
            cancelled = workers.len(),
            "grace period elapsed; cancelling remaining workers"
        );
        workers.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::RequestFrame;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use unrelated_bridge_http::auth::{AuthConfig, AuthInjector};
    use unrelated_bridge_http::outbound::{OutboundClient, RequestPlan};
    use unrelated_bridge_openapi::catalog::OperationDescriptor;
    use unrelated_bridge_openapi::toolgen::GeneratedTool;

    fn service_with_backend(base_url: &str) -> Arc<ToolService> {
        let client = OutboundClient::new(
            base_url,
            AuthInjector::new(AuthConfig::None),
            Vec::new(),
            Duration::from_secs(30),
        )
        .expect("client");
        let tool = GeneratedTool {
            name: "slow".to_string(),
            descriptor: OperationDescriptor {
                method: "GET".to_string(),
                path: "/slow".to_string(),
                tags: std::collections::BTreeSet::new(),
                operation_id: Some("slow".to_string()),
            },
            description: None,
            input_schema: json!({"type": "object"}),
            plan: RequestPlan {
                method: reqwest::Method::GET,
                path: "/slow".to_string(),
                params: Vec::new(),
            },
        };
        Arc::new(ToolService::new(
            "test".to_string(),
            vec![tool],
            client,
        ))
    }

    #[tokio::test]
    async fn concurrent_requests_all_complete_with_unique_ids() {
        let service = service_with_backend("http://127.0.0.1:1");
        let limits = SessionLimits::default();
        let (intake_tx, intake_rx) = mpsc::channel(limits.intake_capacity());
        let (resp_tx, mut resp_rx) = mpsc::channel(limits.intake_capacity());
        let pending = Arc::new(PendingRequests::new());
        let shutdown = CancellationToken::new();

        let engine = tokio::spawn(run_dispatch(
            Arc::clone(&service),
            limits,
            intake_rx,
            resp_tx,
            pending,
            shutdown,
        ));

        const N: i64 = 16;
        for i in 0..N {
            intake_tx
                .send(RequestFrame::new(i, "ping", None))
                .await
                .expect("send");
        }
        drop(intake_tx);

        let mut seen: HashSet<String> = HashSet::new();
        for _ in 0..N {
            let resp = resp_rx.recv().await.expect("response");
            assert!(resp.result.is_some());
            assert!(seen.insert(correlation_key(&resp.id)), "duplicate id");
        }
        assert!(resp_rx.recv().await.is_none(), "no extra responses");
        engine.await.expect("engine join");
    }

    #[tokio::test]
    async fn drain_cancels_workers_after_grace() {
        use axum::{Router, routing::get};
        async fn slow() -> &'static str {
            tokio::time::sleep(Duration::from_secs(30)).await;
            "late"
        }
        let app = Router::new().route("/slow", get(slow));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local_addr");
        tokio::spawn(async move { axum::serve(listener, app).await });

        let service = service_with_backend(&format!("http://{addr}"));
        let limits = SessionLimits {
            max_concurrency: 2,
            grace: Duration::from_millis(100),
        };
        let (intake_tx, intake_rx) = mpsc::channel(limits.intake_capacity());
        let (resp_tx, mut resp_rx) = mpsc::channel(limits.intake_capacity());
        let pending = Arc::new(PendingRequests::new());
        let shutdown = CancellationToken::new();

        let engine = tokio::spawn(run_dispatch(
            service,
            limits,
            intake_rx,
            resp_tx,
            Arc::clone(&pending),
            shutdown.clone(),
        ));

        intake_tx
            .send(RequestFrame::new(
                1,
                "tools/call",
                Some(json!({"name": "slow", "arguments": {}})),
            ))
            .await
            .expect("send");

        // Let the worker start, then initiate drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), engine)
            .await
            .expect("drain within grace plus margin")
            .expect("engine join");

        // The cancelled worker produced no response.
        assert!(resp_rx.recv().await.is_none());
        // Its pending entry was never consumed by a writer.
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn pending_requests_track_and_release_ids() {
        let pending = PendingRequests::new();
        assert!(pending.is_empty());
        pending.insert(&json!(1));
        pending.insert(&json!("1"));
        assert_eq!(pending.len(), 2);
        assert!(pending.remove(&json!(1)).is_some());
        assert!(pending.remove(&json!(1)).is_none());
        assert_eq!(pending.len(), 1);
    }
}
