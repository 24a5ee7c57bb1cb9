use std::sync::Arc;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{header, HeaderValue, Request, Response, StatusCode};
use http_body_util::{Either, Full};
use hyper::{service::Service, upgrade::OnUpgrade};
use hyper_util::rt::TokioIo;
use tracing::{debug, warn};

use crate::{
    context::ConnContext,
    detect::{classify, Classification},
    engine::Engine,
    lifecycle::Lifecycle,
    splice::{Handoff, Hijacked, Splicer},
};

/// Wraps the application's HTTP/1.1 service: requests asking to switch to
/// h2c are answered with `101 Switching Protocols` and their connection goes
/// to the HTTP/2 engine, everything else goes to the application.
///
/// One per HTTP/1.1 connection.
pub struct H2c<S, E> {
    inner: S,
    splicer: Splicer<E>,
    lifecycle: Lifecycle,
    ctx: ConnContext,
    allow_upgrade: bool,
}

impl<S, E: Engine> H2c<S, E> {
    pub fn new(inner: S, engine: Arc<E>, lifecycle: Lifecycle, ctx: ConnContext) -> Self {
        Self {
            inner,
            splicer: Splicer::new(engine),
            lifecycle,
            ctx,
            allow_upgrade: true,
        }
    }

    /// When disabled, `Upgrade: h2c` requests are passed to the application
    /// like any other request.
    pub fn allow_upgrade(mut self, allow: bool) -> Self {
        self.allow_upgrade = allow;
        self
    }
}

fn internal_error<B>() -> Response<Either<B, Full<Bytes>>> {
    let mut res = Response::new(Either::Right(Full::new(Bytes::from_static(
        b"connection can't be upgraded",
    ))));
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res
}

fn switching_protocols<B>() -> Response<Either<B, Full<Bytes>>> {
    let mut res = Response::new(Either::Right(Full::new(Bytes::new())));
    *res.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    res.headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    res.headers_mut()
        .insert(header::UPGRADE, HeaderValue::from_static("h2c"));
    res
}

impl<S, E, ReqB, B> Service<Request<ReqB>> for H2c<S, E>
where
    S: Service<Request<ReqB>, Response = Response<B>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
    E: Engine,
{
    type Response = Response<Either<B, Full<Bytes>>>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn call(&self, req: Request<ReqB>) -> Self::Future {
        let (mut head, body) = req.into_parts();

        let classification = if self.allow_upgrade {
            classify(&head, &[])
        } else {
            Classification::NotUpgrade
        };

        let primer = match classification {
            Classification::UpgradeHeader(primer) => primer,
            // hyper has parsed the request line by now and won't give those
            // bytes back: prior knowledge is only detected when sniffing
            Classification::PriorKnowledge | Classification::NotUpgrade => {
                head.extensions.insert(self.ctx.clone());
                let fut = self.inner.call(Request::from_parts(head, body));
                return Box::pin(async move { Ok(fut.await?.map(Either::Left)) });
            }
        };

        let conn_id = self.ctx.id();
        let Some(on_upgrade) = head.extensions.remove::<OnUpgrade>() else {
            warn!(conn_id, "h2c upgrade requested, but the connection can't be hijacked");
            return Box::pin(async { Ok(internal_error()) });
        };
        // the body is empty, or this wouldn't be an upgrade
        drop(body);

        let splicer = self.splicer.clone();
        let ctx = self.ctx.clone();
        self.lifecycle.spawn(async move {
            let upgraded = match on_upgrade.await {
                Ok(upgraded) => upgraded,
                Err(e) => {
                    debug!(conn_id, %e, "connection went away before switching protocols");
                    return;
                }
            };

            let conn = Hijacked::new(TokioIo::new(upgraded), Bytes::new());
            match splicer
                .splice(conn, Handoff::Upgrade { primer, head }, ctx)
                .await
            {
                Ok(()) => debug!(conn_id, "upgraded HTTP/2 session is over"),
                Err(e) => warn!(conn_id, %e, "upgraded HTTP/2 session failed"),
            }
        });

        debug!(conn_id, "switching protocols to h2c");
        Box::pin(async { Ok(switching_protocols()) })
    }
}
