use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod error;
mod extractor;
mod metadata;
mod orchestrator;
mod proxy;
mod routes;
mod source;
mod util;

pub use error::{Error, Result};

use crate::{
  cache::MetadataCache,
  config::Config,
  orchestrator::Orchestrator,
  proxy::{Proxy, UpstreamClient},
  util::RotatingUserAgents,
};

const DEFAULT_LOG_FILTER: &str = "video_stream_proxy=info,tower_http=info";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    )
    .init();

  let config = Config::from_env();
  let extractor = extractor::from_config(&config);
  info!(
    extractor = extractor.name(),
    cache_ttl = ?config.cache_ttl,
    "starting {}",
    env!("CARGO_PKG_NAME")
  );

  let metadata_cache = MetadataCache::new(config.cache_ttl);
  let upstream = UpstreamClient::new(
    config.upstream_connect_timeout,
    Arc::new(RotatingUserAgents),
  )?;
  let orchestrator =
    Orchestrator::new(metadata_cache.clone(), extractor, Proxy::new(upstream));
  let app = routes::router(Arc::new(orchestrator));

  let addr = config.bind_addr;
  let sweep_period = config.cache_sweep_interval;
  Toplevel::new(move |s| async move {
    s.start(SubsystemBuilder::new("cache-sweeper", move |h| {
      cache::sweeper(metadata_cache, sweep_period, h)
    }));
    s.start(SubsystemBuilder::new("http", move |h| serve(app, addr, h)));
  })
  .catch_signals()
  .handle_shutdown_requests(SHUTDOWN_TIMEOUT)
  .await
  .map_err(Into::into)
}

async fn serve(
  app: Router,
  addr: SocketAddr,
  subsys: SubsystemHandle,
) -> anyhow::Result<()> {
  let server = axum::Server::try_bind(&addr)?.serve(app.into_make_service());
  info!("listening on {}", server.local_addr());

  server
    .with_graceful_shutdown(subsys.on_shutdown_requested())
    .await?;
  Ok(())
}
