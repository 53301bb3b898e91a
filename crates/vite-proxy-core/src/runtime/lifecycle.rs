//! Runtime lifecycle: background tasks and graceful shutdown.

use crate::{config::AppConfig, metrics::MetricsCollector, proxy::MethodRouter, utils::TrustedProxies};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{builder::ViteProxyRuntimeBuilder, ViteProxyComponents};

/// Background tasks get this long to stop after the shutdown signal before being aborted.
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the initialized components and their background tasks.
///
/// Shutdown is broadcast to every task (chain feed, ledger warm-up, trusted proxy refresh),
/// pending rate-limit releases are cancelled and left on disk for the next start.
pub struct ViteProxyRuntime {
    components: ViteProxyComponents,
    shutdown_tx: broadcast::Sender<()>,
    config: AppConfig,
    tasks: Vec<JoinHandle<()>>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl ViteProxyRuntime {
    #[must_use]
    pub fn builder() -> ViteProxyRuntimeBuilder {
        ViteProxyRuntimeBuilder::new()
    }

    pub(super) fn new(
        components: ViteProxyComponents,
        shutdown_tx: broadcast::Sender<()>,
        config: AppConfig,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        debug!(tasks = tasks.len(), "background tasks started");
        Self { components, shutdown_tx, config, tasks, shutdown_initiated: Arc::new(AtomicBool::new(false)) }
    }

    #[must_use]
    pub fn components(&self) -> &ViteProxyComponents {
        &self.components
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn router(&self) -> &Arc<MethodRouter> {
        self.components.router()
    }

    #[must_use]
    pub fn metrics_collector(&self) -> &Arc<MetricsCollector> {
        self.components.metrics_collector()
    }

    #[must_use]
    pub fn trusted_proxies(&self) -> &Arc<TrustedProxies> {
        self.components.trusted_proxies()
    }

    /// A receiver that fires when shutdown begins.
    #[must_use]
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every background task and waits for them, aborting stragglers.
    pub async fn shutdown(self) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already initiated, ignoring duplicate call");
            return;
        }

        info!("Initiating vite-proxy runtime shutdown");
        if self.shutdown_tx.send(()).is_err() {
            debug!("no background task was listening for shutdown");
        }

        if let Some(limiter) = self.components.rate_limiter() {
            limiter.shutdown();
            debug!("pending rate limit releases cancelled");
        }

        for mut task in self.tasks {
            match tokio::time::timeout(TASK_SHUTDOWN_GRACE, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(error = %e, "background task failed"),
                Err(_) => {
                    task.abort();
                    warn!("background task did not stop in time, aborted");
                }
            }
        }

        info!("vite-proxy runtime shutdown complete");
    }

    /// Waits for a signal sent through [`shutdown_sender`](Self::shutdown_sender), then shuts
    /// down.
    pub async fn wait_for_shutdown(self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, runtime terminating");
        self.shutdown().await;
    }

    /// Sender side of the shutdown channel, for signal handlers.
    #[must_use]
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}
