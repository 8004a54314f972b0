//! Transport strategies.
//!
//! The transport is picked once at startup and modeled as a trait object
//! with a uniform `serve` contract, keeping the stdio bridge and the network
//! listener independently testable.

pub mod network;
pub mod stdio;

use crate::error::Result;
use crate::service::ToolService;
use crate::session::SessionLimits;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Which transport strategy serves this process. Never changes after
/// startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
    /// Single duplex session over the process's standard streams.
    Stdio,
    /// Network listener speaking server-sent events per session.
    Sse,
    /// Network listener speaking plain request/response HTTP.
    Http,
}

/// Shared, read-only state every transport serves from.
#[derive(Clone)]
pub struct ServeContext {
    pub service: Arc<ToolService>,
    pub limits: SessionLimits,
}

#[async_trait]
pub trait ServerTransport: Send {
    /// Serve until end-of-input or a termination signal, then drain.
    async fn serve(self: Box<Self>) -> Result<()>;
}

/// Cancel `cancel` when the process receives SIGINT or SIGTERM.
///
/// Signal-initiated shutdown is the normal path out of a serving transport,
/// not an error.
pub(crate) fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = term.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to register SIGTERM handler");
                    let _ = ctrl_c.await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        tracing::info!("termination signal received; draining");
        cancel.cancel();
    });
}
