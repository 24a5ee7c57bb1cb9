use std::{fmt, net::SocketAddr, sync::Arc};

use http::{Extensions, Request};
use hyper::service::Service;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Values the host wants every handler to see, whichever protocol the
/// request came in over.
#[derive(Clone, Default)]
pub struct BaseContext {
    values: Extensions,
}

impl BaseContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [BaseContext::insert]
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(value);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }
}

impl fmt::Debug for BaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseContext")
            .field("len", &self.values.len())
            .finish()
    }
}

struct ConnContextInner {
    id: u64,
    peer: Option<SocketAddr>,
    base: BaseContext,
    cancel: CancellationToken,
}

/// Per-connection context: the host's base values, plus a cancellation
/// signal that fires when the host starts shutting down.
///
/// Cheap to clone. Every request served on the connection, over HTTP/1.1 or
/// HTTP/2, carries one in its extensions.
#[derive(Clone)]
pub struct ConnContext {
    inner: Arc<ConnContextInner>,
}

impl ConnContext {
    pub(crate) fn new(
        id: u64,
        peer: Option<SocketAddr>,
        base: BaseContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ConnContextInner {
                id,
                peer,
                base,
                cancel,
            }),
        }
    }

    /// Unique (per host server) connection id
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    /// A value from the host's [BaseContext]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.inner.base.get::<T>()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the host starts shutting down
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Fetches the context of the connection a request came in on.
    pub fn of<B>(req: &Request<B>) -> Option<&ConnContext> {
        req.extensions().get::<ConnContext>()
    }
}

impl fmt::Debug for ConnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnContext")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.peer)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

/// Inserts a [ConnContext] into every request before passing it on.
#[derive(Clone, Debug)]
pub(crate) struct WithContext<S> {
    pub(crate) inner: S,
    pub(crate) ctx: ConnContext,
}

impl<S, B> Service<Request<B>> for WithContext<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn call(&self, mut req: Request<B>) -> Self::Future {
        req.extensions_mut().insert(self.ctx.clone());
        self.inner.call(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Tenant(&'static str);

    #[test]
    fn base_values_reach_requests() {
        let base = BaseContext::new().with(Tenant("acme"));
        let ctx = ConnContext::new(7, None, base, CancellationToken::new());

        struct Peek;

        impl Service<Request<()>> for Peek {
            type Response = Option<ConnContext>;
            type Error = std::convert::Infallible;
            type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

            fn call(&self, req: Request<()>) -> Self::Future {
                std::future::ready(Ok(ConnContext::of(&req).cloned()))
            }
        }

        let svc = WithContext { inner: Peek, ctx };
        let seen = futures_util::FutureExt::now_or_never(svc.call(Request::new(())))
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(seen.id(), 7);
        assert_eq!(seen.get::<Tenant>(), Some(&Tenant("acme")));
        assert_eq!(seen.get::<u32>(), None);
    }

    #[tokio::test]
    async fn cancellation_is_observable() {
        let parent = CancellationToken::new();
        let ctx = ConnContext::new(1, None, BaseContext::new(), parent.child_token());
        assert!(!ctx.is_cancelled());

        parent.cancel();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }
}
