use std::future::Future;

use http::{Request, Response};
use hyper::{body::Incoming, server::conn::http2, service::Service};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::{
    conf::H2Conf,
    context::{ConnContext, WithContext},
    error::BoxError,
};

/// An HTTP/2 server engine: serves a raw connection (one that starts with
/// the client connection preface) until the session ends.
///
/// Engines must wind the session down gracefully once `ctx` is cancelled,
/// and must make `ctx` available to every request they serve.
pub trait Engine: Send + Sync + 'static {
    fn serve<I>(
        &self,
        io: I,
        ctx: ConnContext,
    ) -> impl Future<Output = Result<(), BoxError>> + Send
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static;
}

/// The default engine, powered by hyper's HTTP/2 server.
#[derive(Debug, Clone)]
pub struct HyperEngine<S> {
    service: S,
    conf: H2Conf,
}

impl<S> HyperEngine<S> {
    pub fn new(service: S, conf: H2Conf) -> Self {
        Self { service, conf }
    }

    fn builder(&self) -> http2::Builder<TokioExecutor> {
        let mut builder = http2::Builder::new(TokioExecutor::new());
        builder.timer(TokioTimer::new());

        let conf = &self.conf;
        if let Some(n) = conf.max_concurrent_streams {
            builder.max_concurrent_streams(n);
        }
        if let Some(n) = conf.initial_stream_window_size {
            builder.initial_stream_window_size(n);
        }
        if let Some(n) = conf.initial_connection_window_size {
            builder.initial_connection_window_size(n);
        }
        if let Some(n) = conf.max_frame_size {
            builder.max_frame_size(n);
        }
        if let Some(n) = conf.max_header_list_size {
            builder.max_header_list_size(n);
        }
        builder
    }
}

impl<S, B> Engine for HyperEngine<S>
where
    S: Service<Request<Incoming>, Response = Response<B>> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    fn serve<I>(
        &self,
        io: I,
        ctx: ConnContext,
    ) -> impl Future<Output = Result<(), BoxError>> + Send
    where
        I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let service = WithContext {
            inner: self.service.clone(),
            ctx: ctx.clone(),
        };
        let conn = self.builder().serve_connection(TokioIo::new(io), service);

        async move {
            tokio::pin!(conn);

            tokio::select! {
                res = conn.as_mut() => return res.map_err(Into::into),
                _ = ctx.cancelled() => {
                    debug!(conn_id = ctx.id(), "shutting down HTTP/2 session gracefully");
                    conn.as_mut().graceful_shutdown();
                }
            }

            conn.await.map_err(Into::into)
        }
    }
}
