use std::{convert::Infallible, fmt::Debug, future::Future, pin::Pin};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Body, Incoming},
    service::Service,
    Request, Response, StatusCode,
};
use loona_h2c::ConnContext;
use tracing::debug;

/// Set on the base context, visible to every handler
#[derive(Clone, Debug)]
pub(crate) struct ServerName(pub(crate) &'static str);

#[derive(Clone)]
pub(crate) struct TestbedService;

type BoxBody = Pin<Box<dyn Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static>>;

fn full(body: impl Into<Bytes>) -> BoxBody {
    Box::pin(
        Full::new(body.into()).map_err(|never: Infallible| -> hyper::Error { match never {} }),
    )
}

fn reply(status: StatusCode, body: BoxBody) -> Response<BoxBody> {
    let mut res = Response::new(body);
    *res.status_mut() = status;
    res
}

impl Service<Request<Incoming>> for TestbedService {
    type Response = Response<BoxBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let ctx = ConnContext::of(&req).cloned();

        Box::pin(async move {
            let (parts, mut req_body) = req.into_parts();
            let path = parts.uri.path();

            if path == "/echo-body" {
                let body: BoxBody = Box::pin(req_body);
                return Ok(reply(StatusCode::OK, body));
            }

            // read everything from the request body
            while let Some(_frame) = req_body.frame().await {}

            let segments = path.trim_start_matches('/').split('/').collect::<Vec<_>>();
            let res = match segments.as_slice() {
                [""] => {
                    let name = ctx
                        .as_ref()
                        .and_then(|ctx| ctx.get::<ServerName>())
                        .map(|name| name.0)
                        .unwrap_or("anonymous");
                    reply(
                        StatusCode::OK,
                        full(format!("{name} says hi over {:?}\n", parts.version)),
                    )
                }
                ["status", code] => match code.parse::<u16>().map(StatusCode::from_u16) {
                    Ok(Ok(status)) => reply(status, full(Bytes::new())),
                    _ => reply(StatusCode::BAD_REQUEST, full("bad status code\n")),
                },
                ["wait-for-shutdown"] => {
                    if let Some(ctx) = &ctx {
                        ctx.cancelled().await;
                    }
                    reply(StatusCode::OK, full("server is shutting down\n"))
                }
                _ => reply(StatusCode::NOT_FOUND, full(message_for_404())),
            };
            debug!("Replying with {:?} {:?}", res.status(), res.headers());
            Ok(res)
        })
    }
}

fn message_for_404() -> &'static str {
    r#"404 Not Found

This server serves the following routes:

/
  Greets you, and tells you which HTTP version you're using.

/status/{code}
  Replies with the given status code and an empty body.

/echo-body
  Echoes back the request body.

/wait-for-shutdown
  Replies once the server starts shutting down.

Try `curl --http2 http://<addr>/` (upgrade) or
`curl --http2-prior-knowledge http://<addr>/`.
"#
}
