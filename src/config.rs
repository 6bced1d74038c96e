use std::{net::SocketAddr, str::FromStr, time::Duration};

use tracing::warn;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
  Ytdlp,
  // the extraction service is absent, platform sources fall back to embeds
  None,
}

impl FromStr for ExtractorKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "ytdlp" | "yt-dlp" => Ok(ExtractorKind::Ytdlp),
      "none" | "off" => Ok(ExtractorKind::None),
      other => Err(format!("unknown extractor {other:?}")),
    }
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub bind_addr: SocketAddr,
  pub cache_ttl: Duration,
  pub cache_sweep_interval: Duration,
  pub upstream_connect_timeout: Duration,
  pub extractor: ExtractorKind,
  pub ytdlp_path: String,
  pub ytdlp_proxy: Option<String>,
  pub ytdlp_concurrency: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      bind_addr: DEFAULT_BIND_ADDR.parse().expect("default address is valid"),
      cache_ttl: Duration::from_secs(5 * 60),
      cache_sweep_interval: Duration::from_secs(60),
      upstream_connect_timeout: Duration::from_secs(5),
      extractor: ExtractorKind::Ytdlp,
      ytdlp_path: "yt-dlp".to_string(),
      ytdlp_proxy: None,
      ytdlp_concurrency: 2,
    }
  }
}

impl Config {
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let default = Self::default();
    let secs = |key: &str, fallback: Duration| {
      Duration::from_secs(parse_or(&lookup, key, fallback.as_secs()))
    };

    Self {
      bind_addr: parse_or(&lookup, "BIND_ADDR", default.bind_addr),
      cache_ttl: secs("CACHE_TTL_SECS", default.cache_ttl),
      cache_sweep_interval: secs(
        "CACHE_SWEEP_SECS",
        default.cache_sweep_interval,
      )
      .max(Duration::from_secs(1)),
      upstream_connect_timeout: secs(
        "UPSTREAM_CONNECT_TIMEOUT_SECS",
        default.upstream_connect_timeout,
      ),
      extractor: parse_or(&lookup, "EXTRACTOR", default.extractor),
      ytdlp_path: lookup("YTDLP_PATH").unwrap_or(default.ytdlp_path),
      ytdlp_proxy: lookup("YTDLP_PROXY").filter(|s| !s.is_empty()),
      ytdlp_concurrency: parse_or(
        &lookup,
        "YTDLP_CONCURRENCY",
        default.ytdlp_concurrency,
      )
      .max(1),
    }
  }
}

fn parse_or<T: FromStr>(
  lookup: &impl Fn(&str) -> Option<String>,
  key: &str,
  default: T,
) -> T {
  let Some(raw) = lookup(key) else {
    return default;
  };

  match raw.trim().parse() {
    Ok(value) => value,
    Err(_) => {
      warn!("ignoring invalid {key}={raw:?}, using default");
      default
    }
  }
}
