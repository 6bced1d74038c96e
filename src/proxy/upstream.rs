use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{
  header::{self, HeaderName},
  HeaderMap, HeaderValue, StatusCode,
};
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use reqwest::Url;
use tracing::debug;

use crate::{
  error::UnavailableReason, metadata::StreamCandidate, util::UserAgentSource,
  Error, Result,
};

use super::range::RangeRequest;

const FALLBACK_REFERER: &str = "https://www.google.com";

/// Issues the upstream GETs for the proxy with browser-like headers.
pub struct UpstreamClient {
  http: reqwest::Client,
  user_agents: Arc<dyn UserAgentSource>,
  header_timeout: Duration,
}

/// One upstream response whose headers arrived and whose body is not read
/// yet. Owned by a single client request.
pub struct UpstreamFetch {
  pub url: Url,
  pub status: StatusCode,
  pub headers: HeaderMap,
  response: reqwest::Response,
}

impl UpstreamClient {
  pub fn new(
    connect_timeout: Duration,
    user_agents: Arc<dyn UserAgentSource>,
  ) -> Result<Self> {
    let http = reqwest::Client::builder()
      .connect_timeout(connect_timeout)
      .build()
      .context("failed to build upstream http client")?;

    Ok(Self {
      http,
      user_agents,
      // no bound on the transfer itself, videos are long
      header_timeout: connect_timeout,
    })
  }

  pub async fn fetch(
    &self,
    candidate: &StreamCandidate,
    range: Option<&RangeRequest>,
  ) -> Result<UpstreamFetch> {
    let url = Url::parse(&candidate.url).map_err(|e| {
      Error::invalid(format!("invalid stream url {:?}: {e}", candidate.url))
    })?;
    let headers = self.request_headers(&url, candidate, range);

    debug!(%url, range = ?range.map(ToString::to_string), "fetching upstream");
    let send = self.http.get(url.clone()).headers(headers).send();
    let response = tokio::time::timeout(self.header_timeout, send)
      .await
      .map_err(|_| Error::UpstreamUnreachable {
        message: format!("upstream {url} did not respond in time"),
        timed_out: true,
      })??;

    Ok(UpstreamFetch {
      status: response.status(),
      headers: response.headers().clone(),
      url,
      response,
    })
  }

  fn request_headers(
    &self,
    url: &Url,
    candidate: &StreamCandidate,
    range: Option<&RangeRequest>,
  ) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, header::USER_AGENT, &self.user_agents.user_agent());
    insert(&mut headers, header::REFERER, &referer(url));
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

    for (name, value) in &candidate.headers {
      let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
      ) else {
        continue;
      };
      headers.insert(name, value);
    }

    // offsets must refer to the stored bytes, not a compressed encoding
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.remove(header::RANGE);
    if let Some(range) = range {
      insert(&mut headers, header::RANGE, &range.to_string());
    }

    headers
  }
}

fn insert(headers: &mut HeaderMap, name: HeaderName, value: &str) {
  if let Ok(value) = HeaderValue::from_str(value) {
    headers.insert(name, value);
  }
}

/// The origin of the stream url, which most hosts accept as a referer.
pub fn referer(url: &Url) -> String {
  let origin = url.origin();
  if origin.is_tuple() {
    origin.ascii_serialization()
  } else {
    FALLBACK_REFERER.to_string()
  }
}

impl UpstreamFetch {
  pub fn header(&self, name: HeaderName) -> Option<&HeaderValue> {
    self.headers.get(name)
  }

  pub fn content_length(&self) -> Option<u64> {
    self
      .header(header::CONTENT_LENGTH)?
      .to_str()
      .ok()?
      .trim()
      .parse()
      .ok()
  }

  pub fn accepts_ranges(&self) -> bool {
    self
      .header(header::ACCEPT_RANGES)
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v.eq_ignore_ascii_case("bytes"))
  }

  /// Turn a non-2xx answer into the matching error.
  pub fn error_for_status(self) -> Result<Self> {
    let status = self.status;
    if status.is_success() {
      return Ok(self);
    }

    let message = format!("upstream {} answered {status}", self.url);
    Err(match status {
      StatusCode::NOT_FOUND | StatusCode::GONE => {
        Error::unavailable(UnavailableReason::Removed, message)
      }
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
        Error::unavailable(UnavailableReason::Forbidden, message)
      }
      _ => Error::unreachable(message),
    })
  }

  /// The body as a stream; transport failures become streaming failures
  /// since headers may already be on their way to the client.
  pub fn into_body(self) -> BoxStream<'static, Result<Bytes>> {
    let url = self.url;
    self
      .response
      .bytes_stream()
      .map_err(move |err| {
        Error::InternalStreamingFailure(format!("upstream {url}: {err}"))
      })
      .boxed()
  }
}
