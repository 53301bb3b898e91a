use anyhow::Result;
use axum::serve;
use rustls::crypto::{ring::default_provider, CryptoProvider};
use server::{create_app, AppState};
use std::net::SocketAddr;
use tokio::{signal, sync::broadcast};
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vite_proxy_core::{config::AppConfig, runtime::ViteProxyRuntime};

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` wins over `logging.level` when set.
fn init_logging(config: &AppConfig) {
    let level = config.logging.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("warn,vite_proxy_core={level},server={level}"))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|e| anyhow::anyhow!("Failed to install crypto provider: {e:?}"))?;

    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("Configuration loading failed: {e}"))?;

    init_logging(&config);
    info!("Starting vite-proxy");
    debug!(
        nodes = config.upstreams.nodes.len(),
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    let addr = config.socket_addr().map_err(|e| anyhow::anyhow!(e))?;
    let runtime = ViteProxyRuntime::builder()
        .with_config(config.clone())
        .build()
        .await
        .map_err(|e| anyhow::anyhow!("Runtime initialization failed: {e}"))?;

    let app = create_app(AppState::from_runtime(&runtime), &config)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    let shutdown_tx = runtime.shutdown_sender();
    let result = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.subscribe()))
        .await;
    if let Err(e) = result {
        error!(error = %e, "Server error occurred");
    }

    runtime.shutdown().await;
    info!("Server shutdown complete");

    Ok(())
}

/// Resolves on Ctrl+C, SIGTERM, or a shutdown broadcast from the runtime.
async fn shutdown_signal(mut runtime_shutdown: broadcast::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        _ = runtime_shutdown.recv() => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
