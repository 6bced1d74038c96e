mod range;
mod upstream;

use axum::{
  body::StreamBody,
  http::{header, HeaderMap, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use tracing::{debug, info, warn};

use crate::{metadata::StreamCandidate, util::ByteStream, Error, Result};

use range::{content_range_size, ByteSpan};
use upstream::UpstreamFetch;

pub use range::RangeRequest;
pub use upstream::UpstreamClient;

pub const DEFAULT_CONTENT_TYPE: &str = "video/mp4";

/// What upstream told us before any body byte was read.
#[derive(Debug, Clone, Copy)]
struct UpstreamHead<'a> {
  status: StatusCode,
  content_length: Option<u64>,
  content_range: Option<&'a HeaderValue>,
  accepts_ranges: bool,
}

/// How the upstream body is relayed to the client.
#[derive(Debug, PartialEq)]
struct Relay {
  status: StatusCode,
  content_range: Option<HeaderValue>,
  content_length: Option<u64>,
  accept_ranges: &'static str,
  skip: u64,
  limit: Option<u64>,
}

impl Relay {
  fn full(
    status: StatusCode,
    content_length: Option<u64>,
    seekable: bool,
  ) -> Self {
    Relay {
      status,
      content_range: None,
      content_length,
      accept_ranges: if seekable { "bytes" } else { "none" },
      skip: 0,
      limit: None,
    }
  }

  // bytes cut out of a full upstream body by skipping and limiting
  fn sliced(span: ByteSpan, size: u64) -> Result<Self> {
    let value = format!("bytes {}-{}/{size}", span.start, span.end);
    let content_range =
      HeaderValue::try_from(value).map_err(|e| Error::Internal(e.into()))?;

    Ok(Relay {
      status: StatusCode::PARTIAL_CONTENT,
      content_range: Some(content_range),
      content_length: Some(span.len()),
      accept_ranges: "bytes",
      skip: span.start,
      limit: Some(span.len()),
    })
  }
}

/// Decide how to answer the client from the upstream response head.
///
/// Upstream 206s are relayed verbatim. When the client asked for a range and
/// upstream sent the whole body, the range is cut out locally if upstream
/// declared its length; otherwise the full body goes out as a 200 and the
/// resource is marked unseekable.
fn plan_relay(
  head: UpstreamHead<'_>,
  range: Option<RangeRequest>,
) -> Result<Relay> {
  if head.status == StatusCode::PARTIAL_CONTENT {
    return Ok(Relay {
      status: StatusCode::PARTIAL_CONTENT,
      content_range: head.content_range.cloned(),
      content_length: head.content_length,
      accept_ranges: "bytes",
      skip: 0,
      limit: None,
    });
  }

  let Some(range) = range else {
    let seekable = head.content_length.is_some() || head.accepts_ranges;
    return Ok(Relay::full(StatusCode::OK, head.content_length, seekable));
  };

  // without a size the span can be neither clamped nor checked against the
  // end of the resource before headers go out
  match head.content_length {
    Some(size) => Relay::sliced(range.resolve(size)?, size),
    None => Ok(Relay::full(StatusCode::OK, None, false)),
  }
}

/// Content type to announce: upstream's, unless missing or the generic
/// octet-stream, in which case the candidate's container decides.
fn content_type(
  fetch: &UpstreamFetch,
  candidate: &StreamCandidate,
) -> HeaderValue {
  fetch
    .header(header::CONTENT_TYPE)
    .filter(|v| {
      !v.as_bytes()
        .to_ascii_lowercase()
        .starts_with(b"application/octet-stream")
    })
    .cloned()
    .or_else(|| HeaderValue::from_str(&candidate.mime_type).ok())
    .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CONTENT_TYPE))
}

/// Fetches a stream from its origin and relays it with partial-content
/// semantics, whatever the origin supports.
pub struct Proxy {
  upstream: UpstreamClient,
}

impl Proxy {
  pub fn new(upstream: UpstreamClient) -> Self {
    Self { upstream }
  }

  pub async fn stream(
    &self,
    candidate: &StreamCandidate,
    range: Option<RangeRequest>,
    cache_control: &'static str,
  ) -> Result<Response> {
    let fetch = self.fetch(candidate, range).await?;

    let head = UpstreamHead {
      status: fetch.status,
      content_length: fetch.content_length(),
      content_range: fetch.header(header::CONTENT_RANGE),
      accepts_ranges: fetch.accepts_ranges(),
    };
    let relay = plan_relay(head, range)?;
    debug!(
      url = %fetch.url,
      upstream_status = %fetch.status,
      status = %relay.status,
      skip = relay.skip,
      limit = ?relay.limit,
      "relaying upstream body"
    );

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, content_type(&fetch, candidate));
    headers.insert(
      header::ACCEPT_RANGES,
      HeaderValue::from_static(relay.accept_ranges),
    );
    headers.insert(
      header::CACHE_CONTROL,
      HeaderValue::from_static(cache_control),
    );
    if let Some(content_range) = relay.content_range {
      headers.insert(header::CONTENT_RANGE, content_range);
    }
    if let Some(len) = relay.content_length {
      headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    let mut body = ByteStream::new(fetch.into_body()).skip_bytes(relay.skip);
    if let Some(limit) = relay.limit {
      body = body.limit_bytes(limit);
    }
    let body = body.inspect_err(|err| {
      warn!("aborting client response mid-stream: {err}");
    });

    Ok((relay.status, headers, StreamBody::new(body)).into_response())
  }

  // direct proxy first; an origin that rejects the ranged request gets one
  // whole-file request which is then sliced locally
  async fn fetch(
    &self,
    candidate: &StreamCandidate,
    range: Option<RangeRequest>,
  ) -> Result<UpstreamFetch> {
    let Some(range) = range else {
      return self.upstream.fetch(candidate, None).await?.error_for_status();
    };

    let fetch = self.upstream.fetch(candidate, Some(&range)).await?;
    if fetch.status == StatusCode::RANGE_NOT_SATISFIABLE {
      let size = fetch
        .header(header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(content_range_size);
      return Err(Error::RangeNotSatisfiable { size });
    }
    if fetch.status.is_success() {
      return Ok(fetch);
    }

    info!(
      url = %fetch.url,
      status = %fetch.status,
      "upstream rejected ranged request, fetching whole file"
    );
    self.upstream.fetch(candidate, None).await?.error_for_status()
  }
}
