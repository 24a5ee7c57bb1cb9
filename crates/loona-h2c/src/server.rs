use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{Request, Response};
use hyper::{body::Incoming, server::conn::http1, service::Service};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{
    conf::ServerConf,
    context::{BaseContext, ConnContext},
    detect::{sniff_connection_timeout, Classification},
    engine::{Engine, HyperEngine},
    error::{BoxError, ShutdownError},
    io::Rewind,
    lifecycle::Lifecycle,
    service::H2c,
    splice::{Handoff, Hijacked, Splicer},
};

/// An HTTP/1.1 server that also speaks h2c: connections opening with the
/// HTTP/2 preface, and requests asking for `Upgrade: h2c`, go to the HTTP/2
/// engine. Both protocols serve the same application service.
pub struct Server<S, E = HyperEngine<S>> {
    service: S,
    engine: Arc<E>,
    conf: Arc<ServerConf>,
    lifecycle: Lifecycle,
}

impl<S: Clone, E> Clone for Server<S, E> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            engine: self.engine.clone(),
            conf: self.conf.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }
}

impl<S: Clone> Server<S> {
    /// A server whose HTTP/2 side is powered by hyper
    pub fn new(service: S, conf: ServerConf, base: BaseContext) -> Self {
        let engine = HyperEngine::new(service.clone(), conf.h2.clone());
        Self::with_engine(service, engine, conf, base)
    }
}

impl<S, E> Server<S, E> {
    pub fn with_engine(service: S, engine: E, conf: ServerConf, base: BaseContext) -> Self {
        Self {
            service,
            engine: Arc::new(engine),
            conf: Arc::new(conf),
            lifecycle: Lifecycle::new(base),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Stops accepting connections, asks every open connection to wind
    /// down, and waits (up to `timeout`) for them to be gone.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        self.lifecycle.shutdown(timeout).await
    }

    /// Tears down every open connection right away
    pub fn close(&self) {
        self.lifecycle.close()
    }
}

impl<S, B, E> Server<S, E>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send + 'static,
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
    E: Engine,
{
    /// Accepts connections until shutdown starts.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let shutdown = self.lifecycle.shutdown_token();

        loop {
            let (stream, peer) = tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    debug!("shutting down, no longer accepting connections");
                    return Ok(());
                }
                res = listener.accept() => match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // most likely out of file descriptors, let some
                        // connections go away before trying again
                        warn!(%e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(%e, %peer, "could not set TCP_NODELAY");
            }
            self.spawn_connection(stream, Some(peer));
        }
    }

    /// Serves a single connection on a tracked task.
    pub fn spawn_connection<I>(&self, io: I, peer: Option<SocketAddr>) -> JoinHandle<Option<()>>
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ctx = self.lifecycle.conn_context(peer);
        debug!(conn_id = ctx.id(), ?peer, "accepted connection");

        let server = self.clone();
        self.lifecycle
            .spawn(async move { server.serve_connection(io, ctx).await })
    }

    async fn serve_connection<I>(&self, mut io: I, ctx: ConnContext)
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let conn_id = ctx.id();
        let mut sniffed = Vec::new();

        if self.conf.allow_prior_knowledge {
            let res = tokio::select! {
                res = sniff_connection_timeout(&mut io, &mut sniffed, self.conf.sniff_timeout) => res,
                _ = ctx.cancelled() => {
                    debug!(conn_id, "shutting down before the client said anything");
                    return;
                }
            };

            match res {
                Ok(Classification::PriorKnowledge) => {
                    let conn = Hijacked::new(io, Bytes::from(sniffed));
                    let splicer = Splicer::new(self.engine.clone());
                    match splicer.splice(conn, Handoff::PriorKnowledge, ctx).await {
                        Ok(()) => debug!(conn_id, "HTTP/2 session is over"),
                        Err(e) => warn!(conn_id, %e, "HTTP/2 session failed"),
                    }
                    return;
                }
                Ok(Classification::NotUpgrade | Classification::UpgradeHeader(_)) => {}
                Err(e) => {
                    debug!(conn_id, %e, "connection failed before saying anything");
                    return;
                }
            }
        }

        let io = Rewind::new_buffered(io, Bytes::from(sniffed));
        let service = H2c::new(
            self.service.clone(),
            self.engine.clone(),
            self.lifecycle.clone(),
            ctx.clone(),
        )
        .allow_upgrade(self.conf.allow_upgrade);

        let conn = http1::Builder::new()
            .timer(TokioTimer::new())
            .serve_connection(TokioIo::new(io), service)
            .with_upgrades();
        tokio::pin!(conn);

        let res = tokio::select! {
            res = conn.as_mut() => Some(res),
            _ = ctx.cancelled() => None,
        };
        let res = match res {
            Some(res) => res,
            None => {
                debug!(conn_id, "shutting down HTTP/1.1 connection gracefully");
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        match res {
            Ok(()) => debug!(conn_id, "HTTP/1.1 connection is over"),
            Err(e) => debug!(conn_id, %e, "HTTP/1.1 connection failed"),
        }
    }
}
