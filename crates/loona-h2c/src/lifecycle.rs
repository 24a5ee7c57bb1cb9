use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use crate::{
    context::{BaseContext, ConnContext},
    error::ShutdownError,
};

/// Keeps track of every open connection, including the ones handed over to
/// the HTTP/2 engine, and tells them when to wind down.
///
/// Owned by the host server and passed around by handle: clones share the
/// same state.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    tracker: TaskTracker,

    /// Cancelled on graceful shutdown. Per-connection contexts are children of it.
    shutdown: CancellationToken,

    /// Cancelled on forced close. Tracked futures are dropped when it fires.
    close: CancellationToken,

    base: BaseContext,
    next_id: Arc<AtomicU64>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(BaseContext::default())
    }
}

impl Lifecycle {
    pub fn new(base: BaseContext) -> Self {
        Self {
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            close: CancellationToken::new(),
            base,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Derives the context for a newly-accepted connection.
    pub fn conn_context(&self, peer: Option<SocketAddr>) -> ConnContext {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ConnContext::new(id, peer, self.base.clone(), self.shutdown.child_token())
    }

    /// Registers a connection right away, and deregisters it exactly once
    /// when the returned future completes or is dropped, including when `fut`
    /// panics.
    ///
    /// Resolves to `None` if the host force-closed connections before `fut`
    /// completed, in which case `fut` is dropped.
    pub fn track<F>(&self, fut: F) -> impl Future<Output = Option<F::Output>>
    where
        F: Future,
    {
        let token = self.tracker.token();
        let close = self.close.clone();

        async move {
            let _token = token;
            tokio::select! {
                biased;
                _ = close.cancelled() => None,
                out = fut => Some(out),
            }
        }
    }

    /// Spawns a tracked future on the current runtime.
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(self.track(fut))
    }

    /// Number of connections currently open
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Fires when graceful shutdown starts (or on forced close)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Tells every connection to wind down, then waits for all of them to be
    /// gone. Nothing gets torn down forcefully: if `timeout` elapses first,
    /// connections are left as they are and it's up to the caller to
    /// [Lifecycle::close] them.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        debug!(outstanding = self.outstanding(), "graceful shutdown requested");
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                debug!("all connections are gone");
                Ok(())
            }
            Err(_) => Err(ShutdownError::DeadlineExceeded {
                outstanding: self.outstanding(),
                timeout,
            }),
        }
    }

    /// Tears every connection down, without waiting.
    pub fn close(&self) {
        debug!(outstanding = self.outstanding(), "closing all connections");
        self.shutdown.cancel();
        self.close.cancel();
        self.tracker.close();
    }

    /// Resolves once shutdown or close was requested and no connection is
    /// left.
    pub async fn wait(&self) {
        self.tracker.wait().await
    }
}
