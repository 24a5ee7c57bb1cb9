use std::time::Duration;

use hyper::Version;
use loona_h2c::ServerConf;
use pretty_assertions::assert_eq;

mod helpers;
use helpers::{body_string, get, Harness, Proto, GREETING};

#[tokio::test]
async fn prior_knowledge_reaches_the_application() -> eyre::Result<()> {
    let harness = Harness::start(ServerConf::default()).await?;

    let res = get(harness.addr, Proto::H2, "/").await?;
    assert_eq!(res.version(), Version::HTTP_2);
    assert_eq!(body_string(res).await?, format!("HTTP/2.0 {GREETING}"));

    harness.server.shutdown(Duration::from_secs(5)).await?;
    harness.accept.await??;
    Ok(())
}

#[tokio::test]
async fn http1_still_works() -> eyre::Result<()> {
    let harness = Harness::start(ServerConf::default()).await?;

    let res = get(harness.addr, Proto::H1, "/").await?;
    assert_eq!(res.version(), Version::HTTP_11);
    assert_eq!(body_string(res).await?, format!("HTTP/1.1 {GREETING}"));

    let res = get(harness.addr, Proto::H1, "/nope").await?;
    assert_eq!(res.status(), hyper::StatusCode::NOT_FOUND);

    harness.server.shutdown(Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn prior_knowledge_can_be_turned_off() -> eyre::Result<()> {
    let harness = Harness::start(ServerConf {
        allow_prior_knowledge: false,
        ..Default::default()
    })
    .await?;

    // the HTTP/1.1 server refuses the preface, one way or another
    let res = tokio::time::timeout(Duration::from_secs(5), get(harness.addr, Proto::H2, "/"))
        .await?;
    assert!(res.is_err(), "{res:?}");

    harness.server.shutdown(Duration::from_secs(5)).await?;
    Ok(())
}
