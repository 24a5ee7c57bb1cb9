//! Cleartext HTTP/2 (h2c) for HTTP/1.1 servers.
//!
//! Connections that open with the HTTP/2 connection preface ("prior
//! knowledge"), and HTTP/1.1 requests carrying `Upgrade: h2c`, are handed over
//! to an HTTP/2 [Engine] for the rest of their life. Everything else keeps
//! being served as HTTP/1.1.
//!
//! The [Lifecycle] tracks every connection, including the ones the HTTP/2
//! engine owns, so that shutting down waits for all of them.

pub mod conf;
pub mod context;
pub mod detect;
pub mod engine;
pub mod error;
pub mod frame;
pub mod io;
pub mod lifecycle;
pub mod primer;
pub mod server;
pub mod service;
pub mod splice;
pub mod swallow;

pub use conf::{H2Conf, ServerConf};
pub use context::{BaseContext, ConnContext};
pub use detect::Classification;
pub use engine::{Engine, HyperEngine};
pub use error::{BoxError, ShutdownError, SpliceError};
pub use lifecycle::Lifecycle;
pub use server::Server;
pub use service::H2c;
pub use splice::{Handoff, Hijacked, Splicer};
pub use swallow::SettingsAckSwallow;

/// re-exported so consumers can use whatever version we use
pub use http;
pub use hyper;
