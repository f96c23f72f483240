//! Relay engine server.
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────┐
//!                          │                   RELAY ENGINE                   │
//!     Client               │  ┌─────────┐   ┌──────────┐   ┌───────────────┐  │
//!     ─────────────────────┼─▶│   net   │──▶│ tls sniff│──▶│ proxy session │──┼──▶ Upstream
//!                          │  │listener │   │ (SNI/ALPN)│  │ head/body/ws  │  │
//!                          │  └─────────┘   └──────────┘   └───────┬───────┘  │
//!                          │                                       │          │
//!                          │                    ┌──────────────────▼───────┐  │
//!                          │                    │ throttle (ThrottledStream│  │
//!                          │                    │  + shared scheduler)     │  │
//!                          │                    └──────────────────────────┘  │
//!                          │  config (watch + ArcSwap) · admin API · metrics  │
//!                          └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clap::Parser;

use relay_engine::admin::{setup_admin_router, AdminState};
use relay_engine::config::watcher::{apply_throttle, apply_updates};
use relay_engine::config::{load_config, ConfigWatcher, ProxyConfig};
use relay_engine::lifecycle::{wait_for_termination, Shutdown};
use relay_engine::net::{CertificateStore, Listener};
use relay_engine::observability::{logging, metrics};
use relay_engine::proxy::{ProxyContext, RelayServer, TracingObserver};
use relay_engine::throttle::Throttler;

/// How long in-flight sessions may run after shutdown begins.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "relay-engine", version, about = "Throttling HTTP/WebSocket relay")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init(Some(&config.observability.log_level));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "relay-engine starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        max_connections = config.listener.max_connections,
        rule_sets = config.throttle.rule_sets.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let throttler = Throttler::new(config.throttle.rule_sets.len());
    apply_throttle(&config, &throttler);
    throttler.start();

    let certificates = match &config.listener.tls {
        Some(tls) => Some(CertificateStore::load(tls).await?),
        None => None,
    };
    let listener = Listener::bind(&config.listener).await?;

    let shared = Arc::new(ArcSwap::from_pointee(config.clone()));
    let mut ctx = ProxyContext::new(Arc::clone(&shared), throttler.clone());
    if config.recording.enabled {
        ctx = ctx.with_observer(Arc::new(TracingObserver::new(config.recording.max_payload_bytes)));
    }

    // Hot reload; the watcher must stay alive for the process lifetime.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            tokio::spawn(apply_updates(updates, Arc::clone(&shared), throttler.clone()));
            match watcher.run() {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start config watcher");
                    None
                }
            }
        }
        None => None,
    };

    let shutdown = Shutdown::new();

    if config.admin.enabled {
        let admin = setup_admin_router(AdminState::new(ctx.clone()));
        let admin_listener = tokio::net::TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let served = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(async move {
                    let _ = stop.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let mut server = RelayServer::new(ctx);
    if let Some(store) = certificates {
        server = server.with_tls(store);
    }
    let tracker = server.tracker();
    let server_task = tokio::spawn(server.run(listener, shutdown.subscribe()));

    wait_for_termination().await;
    tracing::info!("Shutting down");
    shutdown.trigger();

    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Relay server failed"),
        Err(e) => tracing::error!(error = %e, "Relay server task panicked"),
    }
    throttler.shutdown().await;

    if tracker.wait_for_drain(DRAIN_TIMEOUT).await {
        tracing::info!("All sessions drained");
    } else {
        tracing::warn!(remaining = tracker.active_count(), "Drain timed out; abandoning sessions");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
