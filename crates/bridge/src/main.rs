//! OpenAPI → MCP bridge.
//!
//! Startup builds the filtered tool catalog and the auth-injecting outbound
//! client, then hands both to the selected transport. Everything that can
//! fail at startup fails before any transport begins serving.

mod cli;
mod diagnostics;
mod error;
mod filter;
mod service;
mod session;
mod transport;
mod wire;

use anyhow::Context as _;
use clap::Parser as _;
use cli::Cli;
use diagnostics::DiagnosticsContext;
use filter::FilterSet;
use service::ToolService;
use std::sync::Arc;
use tracing::{debug, info, warn};
use transport::network::NetworkListener;
use transport::stdio::StdioBridge;
use transport::{ServeContext, ServerTransport, TransportMode};
use unrelated_bridge_http::auth::AuthInjector;
use unrelated_bridge_http::outbound::OutboundClient;
use unrelated_bridge_openapi::catalog::load_spec;
use unrelated_bridge_openapi::toolgen::ToolGenerator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    DiagnosticsContext::new(cli.debug).init();
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let auth = cli.auth_config()?;
    let filters = FilterSet::compile(&cli.filter_options())?;
    let custom_headers = cli.custom_headers()?;

    let spec_client = reqwest::Client::new();
    let spec = load_spec(&cli.openapi_source, &spec_client)
        .await
        .context("loading OpenAPI spec")?;
    info!(api = %spec.title(), version = %spec.version(), "loaded OpenAPI spec");

    let base_url = spec.resolve_base_url(cli.base_url.as_deref())?;
    let client = OutboundClient::new(
        &base_url,
        AuthInjector::new(auth),
        custom_headers,
        cli.timeout(),
    )?;

    // One route decision per operation; the catalog is immutable afterwards.
    let mut generator = ToolGenerator::new(&spec);
    let mut tools = Vec::new();
    let mut excluded = 0_usize;
    for op in spec.operations() {
        if !filters.decide(&op.descriptor) {
            excluded += 1;
            debug!(operation = %op.descriptor, "operation excluded by filters");
            continue;
        }
        match generator.generate(&op) {
            Ok(tool) => tools.push(tool),
            Err(e) => {
                warn!(operation = %op.descriptor, error = %e, "skipping operation");
            }
        }
    }
    info!(exposed = tools.len(), excluded, "tool catalog built");
    if tools.is_empty() {
        warn!("no operations exposed as tools; check the filter flags");
    }

    let ctx = ServeContext {
        service: Arc::new(ToolService::new(cli.name.clone(), tools, client)),
        limits: cli.limits(),
    };

    let transport: Box<dyn ServerTransport> = match cli.server_type {
        TransportMode::Stdio => Box::new(StdioBridge::new(ctx)),
        mode @ (TransportMode::Sse | TransportMode::Http) => {
            Box::new(NetworkListener::new(ctx, mode, cli.host.clone(), cli.port))
        }
    };

    transport.serve().await?;
    Ok(())
}
