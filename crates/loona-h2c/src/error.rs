use std::time::Duration;

/// What HTTP/2 engines and application services fail with
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SpliceError {
    /// After switching protocols, the client must send the HTTP/2 preface
    #[error("client didn't send the HTTP/2 connection preface after upgrading")]
    BadClientPreface,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP/2 engine errored out
    #[error("HTTP/2 engine error: {0}")]
    Engine(BoxError),
}

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// Connections were still open when the shutdown deadline passed. They
    /// are left alone: call `close` to tear them down.
    #[error("{outstanding} connection(s) still open after {timeout:?}")]
    DeadlineExceeded { outstanding: usize, timeout: Duration },
}
