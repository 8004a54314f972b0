//! Diagnostic output configuration.
//!
//! All diagnostics go to stderr; stdout is reserved for protocol frames in
//! stdio mode. The context is built in `main` before any component starts so
//! no component can race the sink decision.

use tracing_subscriber::EnvFilter;

/// How diagnostics are emitted for this process.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsContext {
    pub debug: bool,
}

impl DiagnosticsContext {
    #[must_use]
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    /// Install the global subscriber. Call exactly once, before any
    /// component logs.
    pub fn init(self) {
        let default_directive = if self.debug { "debug" } else { "info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
