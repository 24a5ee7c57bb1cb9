use loona_h2c::{BaseContext, Server, ServerConf, ShutdownError};
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::{filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

mod service;
mod settings;

use service::{ServerName, TestbedService};
use settings::Settings;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    setup_tracing_and_error_reporting()?;

    let settings = Settings::from_env()?;
    let ln = TcpListener::bind(settings.listen_addr).await?;
    let listen_addr = ln.local_addr()?;
    settings.print_listen_line(listen_addr);

    let base = BaseContext::new().with(ServerName("h2c-testbed"));
    let server = Server::new(TestbedService, ServerConf::default(), base);

    let accept = tokio::spawn({
        let server = server.clone();
        async move { server.serve(ln).await }
    });

    tokio::signal::ctrl_c().await?;
    info!(
        "got ctrl-c, shutting down (waiting up to {:?})",
        settings.shutdown_timeout
    );

    match server.shutdown(settings.shutdown_timeout).await {
        Ok(()) => info!("all connections closed"),
        Err(ShutdownError::DeadlineExceeded { outstanding, .. }) => {
            warn!(outstanding, "closing connections that didn't wind down in time");
            server.close();
            server.lifecycle().wait().await;
        }
        Err(e) => return Err(e.into()),
    }

    accept.await??;
    Ok(())
}

fn setup_tracing_and_error_reporting() -> eyre::Result<()> {
    color_eyre::install()?;

    let targets = if let Ok(rust_log) = std::env::var("RUST_LOG") {
        rust_log.parse::<Targets>()?
    } else {
        Targets::new()
            .with_default(Level::INFO)
            .with_target("loona_h2c", Level::DEBUG)
            .with_target("h2c_testbed", Level::DEBUG)
            .with_target("want", Level::INFO)
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .with_file(false)
        .with_line_number(false)
        .without_time();

    tracing_subscriber::registry()
        .with(targets)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
