#![allow(dead_code)]

use std::{convert::Infallible, future::Future, io, net::SocketAddr, pin::Pin, time::Duration};

use bytes::Bytes;
use eyre::eyre;
use http_body_util::{BodyExt, Empty, Full};
use hyper::{body::Incoming, service::Service, Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use loona_h2c::{BaseContext, ConnContext, Server, ServerConf};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};

pub(crate) mod raw;
pub(crate) mod tracing_common;

/// Something every handler can see, whichever protocol the request came in
/// over.
#[derive(Clone, Debug)]
pub(crate) struct Greeting(pub(crate) &'static str);

pub(crate) const GREETING: &str = "hello from the base context";

/// Test application:
///
///   - `/` replies with the request version and the base context's greeting
///   - `/wait` replies once its connection context is cancelled
///   - `/hang` never replies
#[derive(Clone)]
pub(crate) struct TestService {
    events: mpsc::UnboundedSender<&'static str>,
}

struct DropGuard {
    events: mpsc::UnboundedSender<&'static str>,
}

impl Drop for DropGuard {
    fn drop(&mut self) {
        let _ = self.events.send("hang:dropped");
    }
}

impl Service<Request<Incoming>> for TestService {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let events = self.events.clone();
        let ctx = ConnContext::of(&req).cloned();
        let version = req.version();
        let path = req.uri().path().to_owned();

        Box::pin(async move {
            let body = match path.as_str() {
                "/" => {
                    let greeting = ctx
                        .as_ref()
                        .and_then(|ctx| ctx.get::<Greeting>())
                        .map(|g| g.0)
                        .unwrap_or("no connection context");
                    format!("{version:?} {greeting}")
                }
                "/wait" => {
                    let _ = events.send("wait:entered");
                    if let Some(ctx) = &ctx {
                        ctx.cancelled().await;
                    }
                    "cancelled".to_string()
                }
                "/hang" => {
                    let _guard = DropGuard {
                        events: events.clone(),
                    };
                    let _ = events.send("hang:entered");
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                _ => {
                    let mut res = Response::new(Full::new(Bytes::from_static(b"not found")));
                    *res.status_mut() = hyper::StatusCode::NOT_FOUND;
                    return Ok(res);
                }
            };
            Ok(Response::new(Full::new(Bytes::from(body))))
        })
    }
}

/// A [TestService] served on an ephemeral port
pub(crate) struct Harness {
    pub(crate) server: Server<TestService>,
    pub(crate) addr: SocketAddr,
    pub(crate) accept: JoinHandle<io::Result<()>>,
    events: mpsc::UnboundedReceiver<&'static str>,
}

impl Harness {
    pub(crate) async fn start(conf: ServerConf) -> eyre::Result<Self> {
        tracing_common::setup_tracing();

        let (tx, events) = mpsc::unbounded_channel();
        let base = BaseContext::new().with(Greeting(GREETING));
        let server = Server::new(TestService { events: tx }, conf, base);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let accept = tokio::spawn({
            let server = server.clone();
            async move { server.serve(listener).await }
        });

        Ok(Self {
            server,
            addr,
            accept,
            events,
        })
    }

    /// Waits for the test service to report something
    pub(crate) async fn next_event(&mut self) -> eyre::Result<&'static str> {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .map_err(|_| eyre!("timed out waiting for an event"))?
            .ok_or_else(|| eyre!("test service is gone"))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Proto {
    /// HTTP/1.1
    H1,
    /// HTTP/2 with prior knowledge
    H2,
}

/// Sends a GET request on a fresh connection
pub(crate) async fn get(
    addr: SocketAddr,
    proto: Proto,
    path: &str,
) -> eyre::Result<Response<Incoming>> {
    let stream = TcpStream::connect(addr).await?;

    let res = match proto {
        Proto::H1 => {
            let (mut sender, conn) =
                hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
            tokio::spawn(conn);

            let req = Request::get(path)
                .header(hyper::header::HOST, addr.to_string())
                .body(Empty::<Bytes>::new())?;
            sender.send_request(req).await?
        }
        Proto::H2 => {
            let (mut sender, conn) =
                hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
                    .await?;
            tokio::spawn(conn);

            let req = Request::get(format!("http://{addr}{path}")).body(Empty::<Bytes>::new())?;
            sender.send_request(req).await?
        }
    };
    Ok(res)
}

pub(crate) async fn body_string(res: Response<Incoming>) -> eyre::Result<String> {
    let bytes = res.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}
