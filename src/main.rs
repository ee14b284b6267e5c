// Copyright 2026 The Toolbridge Project
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use toolbridge::bus::{BroadcastBus, FanoutBus, MessageBus, TracingBus};
use toolbridge::config::{self, Config};
use toolbridge::fetch::ReqwestFetch;
use toolbridge::interceptor::{self, InterceptorDeps};
use toolbridge::mcp::{self, McpBridge, RmcpConnector};
use toolbridge::proxy;
use toolbridge::tools::ToolRegistry;

/// Monitor events buffered per `/__toolbridge/events` subscriber.
const EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "toolbridge", about = "Tool-calling proxy for chat web apps")]
struct Cli {
    /// Path to the toolbridge.yaml config file. Built-in defaults when absent.
    #[arg(long, env = "TOOLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(long, default_value_t = proxy::BIND_ADDR.1, env = "TOOLBRIDGE_PORT")]
    port: u16,
}

fn exit_with(message: &str, error: impl std::fmt::Display) -> ! {
    tracing::error!(error = %error, "{message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let addr = SocketAddr::from((proxy::BIND_ADDR.0, cli.port));
    tracing::info!(%addr, "toolbridge starting");

    let config = match cli.config {
        Some(path) => match config::load_config(&config::FileSource { path }) {
            Ok(c) => c,
            Err(e) => exit_with("failed to load config", e),
        },
        None => Config::default(),
    };

    tracing::info!(
        platform = %config.platform,
        upstream = %config.upstream,
        max_probe_chunks = config.probe.max_chunks,
        mcp_servers = config.mcp.servers.len(),
        config_hash = %config.config_hash,
        "config loaded"
    );

    let registry = Arc::new(ToolRegistry::with_builtins());
    let connector = match RmcpConnector::new() {
        Ok(c) => Arc::new(c),
        Err(e) => exit_with("failed to build MCP client", e),
    };
    let bridge = McpBridge::spawn(connector, config.mcp.request_timeout);
    let remote_tools = mcp::register_servers(&bridge, &registry, &config.mcp.servers).await;
    tracing::info!(tools = registry.len(), remote_tools, "tool registry ready");

    let events = Arc::new(BroadcastBus::new(EVENT_BUFFER));
    let log_bus: Arc<dyn MessageBus> = Arc::new(TracingBus);
    let event_bus: Arc<dyn MessageBus> = events.clone();
    let bus: Arc<dyn MessageBus> = Arc::new(FanoutBus::new(vec![log_bus, event_bus]));
    let (fetch, context) = interceptor::install(
        Arc::new(ReqwestFetch::default()),
        InterceptorDeps {
            adapter: config.platform.adapter(),
            tools: registry,
            bus,
            settings: config.interceptor_settings(),
        },
    );

    let app = proxy::build_router(proxy::AppState {
        fetch,
        context,
        upstream: Arc::from(config.upstream.as_str()),
        events,
    });

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => exit_with("failed to bind to address", e),
    };

    tracing::info!(%addr, "toolbridge listening");

    if let Err(e) = axum::serve(listener, app).await {
        exit_with("server error", e);
    }
}
