//! Graceful shutdown coordination.
//!
//! # Responsibilities
//! - Keep serving for `shutdown_delay` after the stop signal
//! - Close the listener and drain connections, bounded by `shutdown_timeout`
//! - Drain the in-flight wait-group, then report done
//!
//! # Data Flow
//! ```text
//! stop ──(shutdown_delay)──▶ delayed-stop ──▶ listener closed
//!                                              │ (drain, ≤ shutdown_timeout)
//!                                              ▼
//!                                           stopped ──▶ wait-group drained ──▶ done
//! ```
//!
//! # Design Decisions
//! - All signals are `watch` channels; firing twice is a no-op
//! - A closed stop channel counts as a fired one
//! - `start` returns immediately; progress is observed through the handle

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::lifecycle::waitgroup::SafeWaitGroup;

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),

    #[error("shutdown task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Input signal that starts the shutdown sequence.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ShutdownOptions {
    /// Keep serving this long after stop fires.
    pub shutdown_delay: Duration,
    /// Bound on draining connections once the listener is closed.
    pub shutdown_timeout: Duration,
}

impl Default for ShutdownOptions {
    fn default() -> Self {
        Self {
            shutdown_delay: Duration::ZERO,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

/// Resolves once `rx` carries `true` or its sender is gone.
pub(crate) async fn fired(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|fired| *fired).await;
}

/// Observes a running server's shutdown progress.
pub struct ShutdownHandle {
    stopped: watch::Receiver<bool>,
    done: watch::Receiver<bool>,
    task: JoinHandle<Result<(), ShutdownError>>,
}

impl ShutdownHandle {
    /// Resolves after the listener closed and connections drained.
    pub async fn stopped(&self) {
        fired(self.stopped.clone()).await
    }

    /// Resolves after the in-flight wait-group drained.
    pub async fn done(&self) {
        fired(self.done.clone()).await
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Wait for the whole sequence and return the serve result.
    pub async fn wait(self) -> Result<(), ShutdownError> {
        self.task.await?
    }
}

/// Serve `router` on `listener` until `stop` fires, then shut down in order.
///
/// Without a listener the server is disabled and done fires immediately.
pub fn start(
    router: Router,
    listener: Option<TcpListener>,
    wait_group: SafeWaitGroup,
    options: ShutdownOptions,
    stop: watch::Receiver<bool>,
) -> ShutdownHandle {
    let (stopped_tx, stopped_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);

    let Some(listener) = listener else {
        stopped_tx.send_replace(true);
        done_tx.send_replace(true);
        return ShutdownHandle {
            stopped: stopped_rx,
            done: done_rx,
            task: tokio::spawn(async { Ok(()) }),
        };
    };

    let (delayed_tx, delayed_rx) = watch::channel(false);
    let delay_task = tokio::spawn(async move {
        fired(stop).await;
        if !options.shutdown_delay.is_zero() {
            tracing::info!(delay = ?options.shutdown_delay, "Stop received, serving until shutdown delay elapses");
            tokio::time::sleep(options.shutdown_delay).await;
        }
        delayed_tx.send_replace(true);
    });

    let task = tokio::spawn(async move {
        let serve = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(fired(delayed_rx.clone()))
        .into_future();

        let drain_deadline = async {
            fired(delayed_rx).await;
            tracing::info!("Listener closed, draining connections");
            tokio::time::sleep(options.shutdown_timeout).await;
        };

        let result = tokio::select! {
            res = serve => res.map_err(ShutdownError::from),
            _ = drain_deadline => {
                tracing::warn!(timeout = ?options.shutdown_timeout, "Connections did not drain before shutdown timeout");
                Ok(())
            }
        };
        delay_task.abort();
        stopped_tx.send_replace(true);
        tracing::info!("HTTP server stopped");

        wait_group.wait().await;
        done_tx.send_replace(true);
        tracing::info!("In-flight requests drained");
        result
    });

    ShutdownHandle {
        stopped: stopped_rx,
        done: done_rx,
        task,
    }
}
