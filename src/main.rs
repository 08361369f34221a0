use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modlog_relay::delivery::{SummaryRenderer, WebhookTransport, webhook::DEFAULT_TIMEOUT};
use modlog_relay::destinations::StaticResolver;
use modlog_relay::server::{AppState, build_router};
use modlog_relay::worker::{Dispatcher, EngineConfig};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modlog_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr: SocketAddr = std::env::var("MODLOG_LISTEN_ADDR")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
        .parse()
        .context("MODLOG_LISTEN_ADDR is not a socket address")?;

    let resolver = match std::env::var("MODLOG_DESTINATIONS") {
        Ok(path) => StaticResolver::from_path(&path)
            .with_context(|| format!("failed to load destinations from {path}"))?,
        Err(_) => {
            info!("MODLOG_DESTINATIONS not set, every category is disabled");
            StaticResolver::empty()
        }
    };
    let transport =
        WebhookTransport::with_timeout(DEFAULT_TIMEOUT).context("failed to build HTTP client")?;

    let config = EngineConfig::from_env();
    let dispatcher = Dispatcher::new(
        config,
        Arc::new(resolver),
        Arc::new(SummaryRenderer),
        Arc::new(transport),
    );
    let sweeper = dispatcher.spawn_sweeper();

    let app = build_router(AppState::new(dispatcher.clone()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received, shutting down");
        })
        .await
        .context("server error")?;

    dispatcher.shutdown_all().await;
    let _ = sweeper.await;
    info!("Shutdown complete");
    Ok(())
}
