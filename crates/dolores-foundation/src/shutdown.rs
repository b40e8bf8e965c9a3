use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;

/// Installs SIGINT/SIGTERM handling for the Process Supervisor.
///
/// `install` spawns a task that waits for either signal and flips a shared
/// flag; callers `await` the returned guard's `wait()` in their accept loop
/// alongside `tokio::select!` to stop accepting new connections promptly.
pub struct ShutdownHandler {
    shutdown_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub async fn install(self) -> ShutdownGuard {
        let shutdown_requested = Arc::clone(&self.shutdown_requested);
        let shutdown_notify = Arc::clone(&self.shutdown_notify);

        tokio::spawn(async move {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = signal::ctrl_c() => {
                    tracing::info!("shutdown requested via SIGINT");
                }
                _ = sigterm.recv() => {
                    tracing::info!("shutdown requested via SIGTERM");
                }
            }

            shutdown_requested.store(true, Ordering::SeqCst);
            shutdown_notify.notify_waiters();
        });

        ShutdownGuard {
            shutdown_requested: self.shutdown_requested,
            shutdown_notify: self.shutdown_notify,
        }
    }
}

#[derive(Clone)]
pub struct ShutdownGuard {
    shutdown_requested: Arc<AtomicBool>,
    shutdown_notify: Arc<Notify>,
}

impl ShutdownGuard {
    /// A guard that never signals shutdown. For call sites (tests, standalone
    /// tools) that don't wire in the Process Supervisor's signal handling.
    pub fn never() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested, including if it was
    /// already requested before this call. The `notified()` future is
    /// constructed before the flag check so a `request_shutdown()` racing
    /// with this call can't be missed.
    pub async fn wait(&self) {
        let notified = self.shutdown_notify.notified();
        if self.shutdown_requested.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_shutdown_wakes_waiters() {
        let guard = Arc::new(ShutdownGuard {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
        });
        assert!(!guard.is_shutdown_requested());

        let waiter = {
            let guard = Arc::clone(&guard);
            tokio::spawn(async move {
                guard.wait().await;
            })
        };

        tokio::task::yield_now().await;
        guard.request_shutdown();
        waiter.await.unwrap();
        assert!(guard.is_shutdown_requested());
    }
}
