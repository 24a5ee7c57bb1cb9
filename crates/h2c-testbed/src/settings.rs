use std::{net::SocketAddr, str::FromStr, time::Duration};

pub(crate) struct Settings {
    pub(crate) listen_addr: SocketAddr,
    pub(crate) shutdown_timeout: Duration,
}

impl Settings {
    pub(crate) fn from_env() -> eyre::Result<Self> {
        let port = std::env::var("PORT").unwrap_or("0".to_string());
        let addr = std::env::var("ADDR").unwrap_or("127.0.0.1".to_string());
        let listen_addr = SocketAddr::from_str(&format!("{addr}:{port}"))?;

        let shutdown_timeout = match std::env::var("SHUTDOWN_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(secs.parse()?),
            Err(_) => Duration::from_secs(10),
        };

        Ok(Self {
            listen_addr,
            shutdown_timeout,
        })
    }

    pub(crate) const LISTEN_LINE_PREFIX: &'static str = "🌎🦊👉";

    pub(crate) fn print_listen_line(&self, addr: SocketAddr) {
        println!("{} {addr} (h1+h2c)", Self::LISTEN_LINE_PREFIX)
    }
}
