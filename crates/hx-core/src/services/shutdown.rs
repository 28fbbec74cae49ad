use std::future::Future;
use std::time::Duration;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::error::HaxigonError;

use super::registry::Registry;

/// Resolves on Ctrl+C or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}

/// Upper bound on waiting for connection tasks after the registry is drained.
const CONNECTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Drive `server` until `shutdown` resolves, then destroy every registered
/// instance and wait for the connection tasks in `tracker`.
///
/// `cancel` is fired before the drain so idle connections close instead of
/// accepting new names. Returns the instances that failed to stop.
pub async fn run_until<F, S>(
    server: F,
    shutdown: S,
    registry: &Registry,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) -> Vec<(String, HaxigonError)>
where
    F: Future<Output = ()>,
    S: Future<Output = ()>,
{
    tokio::select! {
        () = server => {
            warn!("control server stopped");
        }
        () = shutdown => {}
    }
    cancel.cancel();

    let failures = registry.drain_all().await;
    if failures.is_empty() {
        info!("all applications stopped");
    } else {
        warn!(failed = failures.len(), "some applications could not be stopped cleanly");
    }

    tracker.close();
    if tokio::time::timeout(CONNECTION_DRAIN_TIMEOUT, tracker.wait()).await.is_err() {
        warn!(remaining = tracker.len(), "control connections still open after shutdown");
    }
    failures
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::services::instance::Instance;
    use crate::services::ports::PortAllocator;
    use crate::test_support::install_app;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn drains_registry_when_shutdown_resolves() {
        let root = tempfile::tempdir().unwrap();
        let registry = Registry::new(PortAllocator::new(5000), Duration::from_secs(2));

        let dir = root.path().join("foo");
        install_app(&dir, "#!/bin/sh\nexec sleep 30");
        let port = registry.reserve_port().await.unwrap();
        registry
            .insert(Instance::launch("foo", &dir, port).unwrap())
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = std::future::pending::<()>();
        let shutdown = async {
            let _ = rx.await;
        };
        tx.send(()).unwrap();

        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let failures = run_until(server, shutdown, &registry, &tracker, &cancel).await;
        assert!(failures.is_empty());
        assert!(cancel.is_cancelled());
        assert!(registry.is_draining().await);
        assert!(registry.snapshot().await.is_empty());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn waits_for_connection_tasks_after_draining() {
        let registry = Registry::new(PortAllocator::new(5000), Duration::from_secs(2));
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));

        {
            let finished = finished.clone();
            let cancel = cancel.clone();
            tracker.spawn(async move {
                cancel.cancelled().await;
                tokio::time::sleep(Duration::from_millis(200)).await;
                finished.store(true, Ordering::SeqCst);
            });
        }

        let failures = run_until(
            std::future::pending::<()>(),
            std::future::ready(()),
            &registry,
            &tracker,
            &cancel,
        )
        .await;
        assert!(failures.is_empty());
        assert!(finished.load(Ordering::SeqCst));
        assert!(tracker.is_empty());
    }
}
