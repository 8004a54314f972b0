//! The stdio bridge: one duplex session over the process's standard
//! streams.
//!
//! Stdout carries protocol frames exclusively, one per line, flushed after
//! every frame; diagnostics go to stderr only. End-of-input on stdin is the
//! normal shutdown trigger; SIGINT/SIGTERM the abnormal one. Both move the
//! session into draining, after which the process exits 0.

use super::{ServeContext, ServerTransport, spawn_signal_watcher};
use crate::error::{BridgeError, Result};
use crate::session::{PendingRequests, run_dispatch};
use crate::wire::{RequestFrame, ResponseFrame, decode_request, encode_response};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct StdioBridge {
    ctx: ServeContext,
}

impl StdioBridge {
    #[must_use]
    pub fn new(ctx: ServeContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ServerTransport for StdioBridge {
    async fn serve(self: Box<Self>) -> Result<()> {
        let ServeContext { service, limits } = self.ctx;

        let shutdown = CancellationToken::new();
        spawn_signal_watcher(shutdown.clone());

        let (intake_tx, intake_rx) = mpsc::channel::<RequestFrame>(limits.intake_capacity());
        let (response_tx, response_rx) = mpsc::channel::<ResponseFrame>(limits.intake_capacity());
        let pending = Arc::new(PendingRequests::new());

        info!(tools = service.tool_count(), "stdio bridge running");

        let writer = tokio::spawn(write_frames(response_rx, Arc::clone(&pending)));
        let dispatch = tokio::spawn(run_dispatch(
            service,
            limits,
            intake_rx,
            response_tx.clone(),
            pending,
            shutdown.clone(),
        ));

        read_frames(intake_tx, response_tx, shutdown).await;
        // Reader done and its senders dropped; dispatch drains, then the
        // writer sees end-of-channel and flushes out.
        dispatch
            .await
            .map_err(|e| BridgeError::Runtime(format!("dispatch task failed: {e}")))?;
        writer
            .await
            .map_err(|e| BridgeError::Runtime(format!("writer task failed: {e}")))??;

        info!("stdio bridge stopped");
        Ok(())
    }
}

/// Reader loop: decode one frame at a time from stdin, preserving order.
///
/// Decode failures are recoverable: the protocol error goes straight to the
/// writer and reading continues. Returns on EOF or shutdown; dropping the
/// senders is what lets the rest of the pipeline finish.
async fn read_frames(
    intake: mpsc::Sender<RequestFrame>,
    responses: mpsc::Sender<ResponseFrame>,
    shutdown: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                // EOF is the normal shutdown trigger; a read error ends
                // intake the same way.
                Ok(None) | Err(_) => break,
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        match decode_request(&line) {
            Ok(frame) => {
                // Bounded send: a full worker pool pauses intake here.
                if intake.send(frame).await.is_err() {
                    break;
                }
            }
            Err(error_frame) => {
                debug!("malformed frame on stdin");
                if responses.send(error_frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// The single writer: the only task allowed to touch stdout.
///
/// Writes one complete frame per line and flushes after each, so frames are
/// never interleaved or truncated regardless of which worker produced them.
async fn write_frames(
    mut responses: mpsc::Receiver<ResponseFrame>,
    pending: Arc<PendingRequests>,
) -> Result<()> {
    let mut stdout = tokio::io::stdout();

    while let Some(frame) = responses.recv().await {
        let mut line = encode_response(&frame);
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        pending.remove(&frame.id);
    }

    stdout.flush().await?;
    Ok(())
}
