use std::sync::Arc;

use axum::{
  extract::{rejection::QueryRejection, Query, State},
  http::{header, HeaderMap},
  response::Response,
  routing::get,
  Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};

use crate::{
  orchestrator::{document, Orchestrator},
  proxy::RangeRequest,
  source::VideoReference,
  Error, Result,
};

const ENDPOINTS: &[&str] =
  &["/stream", "/stream/direct", "/video/info", "/embed", "/health"];

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
  let cors = CorsLayer::new()
    .allow_origin(Any)
    .allow_methods(Any)
    .allow_headers(Any)
    // players read these to seek
    .expose_headers([
      header::CONTENT_RANGE,
      header::CONTENT_LENGTH,
      header::ACCEPT_RANGES,
    ]);

  Router::new()
    .route("/stream", get(stream))
    .route("/stream/direct", get(stream_direct))
    .route("/video/info", get(video_info))
    .route("/embed", get(embed))
    .route("/health", get(health))
    .layer(cors)
    .layer(TraceLayer::new_for_http())
    .with_state(orchestrator)
}

#[derive(Debug, Deserialize)]
pub struct UrlQuery {
  url: Option<String>,
}

fn video_reference(
  query: std::result::Result<Query<UrlQuery>, QueryRejection>,
) -> Result<VideoReference> {
  let Query(query) = query.map_err(|e| Error::invalid(e.body_text()))?;
  let url = query
    .url
    .ok_or_else(|| Error::invalid("missing url query parameter"))?;
  VideoReference::parse(&url)
}

async fn stream(
  State(orchestrator): State<Arc<Orchestrator>>,
  headers: HeaderMap,
  query: std::result::Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Response> {
  let video = video_reference(query)?;
  let range = RangeRequest::from_headers(&headers)?;
  orchestrator.stream(&video, range).await
}

async fn stream_direct(
  State(orchestrator): State<Arc<Orchestrator>>,
  headers: HeaderMap,
  query: std::result::Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Response> {
  let video = video_reference(query)?;
  let range = RangeRequest::from_headers(&headers)?;
  orchestrator.stream_direct(&video, range).await
}

async fn video_info(
  State(orchestrator): State<Arc<Orchestrator>>,
  query: std::result::Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Response> {
  let video = video_reference(query)?;
  let info = orchestrator.info(&video).await?;
  Ok(document(info))
}

async fn embed(
  State(orchestrator): State<Arc<Orchestrator>>,
  query: std::result::Result<Query<UrlQuery>, QueryRejection>,
) -> Result<Response> {
  let video = video_reference(query)?;
  Ok(document(orchestrator.embed(&video)?))
}

#[derive(Serialize)]
struct Health {
  status: &'static str,
  service: &'static str,
  version: &'static str,
  extractor: &'static str,
  cached_entries: usize,
  endpoints: &'static [&'static str],
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> Json<Health> {
  Json(Health {
    status: "ok",
    service: env!("CARGO_PKG_NAME"),
    version: env!("CARGO_PKG_VERSION"),
    extractor: orchestrator.extractor_name(),
    cached_entries: orchestrator.cached_entries(),
    endpoints: ENDPOINTS,
  })
}

#[cfg(test)]
mod tests {
  use std::{
    convert::Infallible,
    net::{SocketAddr, TcpListener},
    sync::Mutex,
    time::Duration,
  };

  use axum::{
    body::{Bytes, StreamBody},
    http::{header::HeaderName, StatusCode},
    response::IntoResponse,
  };
  use futures::{stream, StreamExt};
  use serde_json::Value;
  use tokio::sync::Notify;

  use super::*;
  use crate::{
    cache::MetadataCache,
    extractor::{testing::StaticExtractor, Extractor, Unavailable},
    metadata::{Container, StreamCandidate},
    proxy::{Proxy, UpstreamClient},
    util::FixedUserAgent,
  };

  const TEST_AGENT: &str = "proxy-test/1.0";
  const WATCH_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

  fn fixture() -> Vec<u8> {
    (0..5000u32).map(|i| (i % 251) as u8).collect()
  }

  async fn spawn(app: Router) -> SocketAddr {
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
  }

  struct NotifyOnDrop(Arc<Notify>);

  impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
      self.0.notify_one();
    }
  }

  /// An origin server with one route per upstream behavior.
  struct Upstream {
    addr: SocketAddr,
    closed: Arc<Notify>,
    seen: Arc<Mutex<Option<(String, String)>>>,
  }

  impl Upstream {
    async fn start() -> Self {
      let closed = Arc::new(Notify::new());
      let seen = Arc::new(Mutex::new(None));

      let endless = {
        let closed = closed.clone();
        move || {
          let guard = NotifyOnDrop(closed.clone());
          async move {
            let body =
              stream::repeat(Bytes::from_static(&[0; 8192])).map(move |chunk| {
                let _guard = &guard;
                Ok::<_, Infallible>(chunk)
              });
            StreamBody::new(body)
          }
        }
      };

      let echo = {
        let seen = seen.clone();
        move |headers: HeaderMap| {
          let value = |name: HeaderName| {
            headers
              .get(name)
              .and_then(|v| v.to_str().ok())
              .unwrap_or_default()
              .to_string()
          };
          *seen.lock().unwrap() =
            Some((value(header::USER_AGENT), value(header::REFERER)));
          async move { fixture() }
        }
      };

      let app = Router::new()
        .route("/ranged.mp4", get(ranged))
        .route("/plain.mp4", get(|| async { fixture() }))
        .route("/chunked.mp4", get(chunked))
        .route("/reject-range.mp4", get(reject_range))
        .route("/truncated.mp4", get(truncated))
        .route("/missing.mp4", get(|| async { StatusCode::NOT_FOUND }))
        .route("/endless.mp4", get(endless))
        .route("/echo.mp4", get(echo));

      Self {
        addr: spawn(app).await,
        closed,
        seen,
      }
    }

    fn url(&self, path: &str) -> String {
      format!("http://{}{path}", self.addr)
    }
  }

  async fn ranged(headers: HeaderMap) -> Response {
    let body = fixture();
    let size = body.len() as u64;
    let Some(range) = RangeRequest::from_headers(&headers).unwrap() else {
      return ([(header::ACCEPT_RANGES, "bytes")], body).into_response();
    };

    match range.resolve(size) {
      Ok(span) => (
        StatusCode::PARTIAL_CONTENT,
        [
          (header::ACCEPT_RANGES, "bytes".to_string()),
          (
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{size}", span.start, span.end),
          ),
        ],
        body[span.start as usize..=span.end as usize].to_vec(),
      )
        .into_response(),
      Err(_) => (
        StatusCode::RANGE_NOT_SATISFIABLE,
        [(header::CONTENT_RANGE, format!("bytes */{size}"))],
      )
        .into_response(),
    }
  }

  async fn chunked() -> impl IntoResponse {
    let chunks: Vec<Result<Bytes, Infallible>> = fixture()
      .chunks(1000)
      .map(|c| Ok(Bytes::copy_from_slice(c)))
      .collect();
    StreamBody::new(stream::iter(chunks))
  }

  // declares the full length, then fails after the first kilobyte
  async fn truncated() -> impl IntoResponse {
    let chunks: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
      Ok(Bytes::from(fixture()[..1000].to_vec())),
      Err(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "origin went away",
      )),
    ];
    (
      [(header::CONTENT_LENGTH, "5000")],
      StreamBody::new(stream::iter(chunks)),
    )
  }

  async fn reject_range(headers: HeaderMap) -> Response {
    if headers.contains_key(header::RANGE) {
      return StatusCode::FORBIDDEN.into_response();
    }
    fixture().into_response()
  }

  struct Harness {
    addr: SocketAddr,
    client: reqwest::Client,
  }

  impl Harness {
    async fn start(extractor: Arc<dyn Extractor>) -> Self {
      let upstream = UpstreamClient::new(
        Duration::from_secs(2),
        Arc::new(FixedUserAgent(TEST_AGENT.into())),
      )
      .unwrap();
      let orchestrator = Orchestrator::new(
        MetadataCache::new(Duration::from_secs(300)),
        extractor,
        Proxy::new(upstream),
      );

      Self {
        addr: spawn(router(Arc::new(orchestrator))).await,
        client: reqwest::Client::new(),
      }
    }

    async fn get(
      &self,
      route: &str,
      url: &str,
      range: Option<&str>,
    ) -> reqwest::Response {
      let mut req = self
        .client
        .get(format!("http://{}{route}", self.addr))
        .query(&[("url", url)]);
      if let Some(range) = range {
        req = req.header(header::RANGE, range);
      }
      req.send().await.unwrap()
    }
  }

  fn header<'a>(resp: &'a reqwest::Response, name: HeaderName) -> &'a str {
    resp.headers()[name].to_str().unwrap()
  }

  async fn error_kind(resp: reqwest::Response) -> (String, Option<String>) {
    let body: Value = resp.json().await.unwrap();
    let kind = body["error"]["kind"].as_str().unwrap().to_string();
    let reason = body["error"]["reason"].as_str().map(str::to_string);
    (kind, reason)
  }

  async fn direct_only() -> (Upstream, Harness) {
    let upstream = Upstream::start().await;
    let harness = Harness::start(Arc::new(StaticExtractor::new(vec![]))).await;
    (upstream, harness)
  }

  #[tokio::test]
  async fn relays_upstream_partial_content() {
    let (upstream, proxy) = direct_only().await;

    let resp = proxy
      .get("/stream/direct", &upstream.url("/ranged.mp4"), Some("bytes=0-999"))
      .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, header::CONTENT_RANGE), "bytes 0-999/5000");
    assert_eq!(header(&resp, header::CONTENT_LENGTH), "1000");
    assert_eq!(header(&resp, header::ACCEPT_RANGES), "bytes");
    assert_eq!(header(&resp, header::CONTENT_TYPE), "video/mp4");
    assert_eq!(
      header(&resp, header::CACHE_CONTROL),
      "public, max-age=31536000"
    );
    assert_eq!(resp.bytes().await.unwrap(), fixture()[..1000]);
  }

  #[tokio::test]
  async fn slices_ranges_out_of_full_bodies() {
    let (upstream, proxy) = direct_only().await;
    let url = upstream.url("/plain.mp4");
    let cases = [
      ("bytes=0-999", "bytes 0-999/5000", 0..1000),
      ("bytes=100-199", "bytes 100-199/5000", 100..200),
      ("bytes=-500", "bytes 4500-4999/5000", 4500..5000),
      ("bytes=4999-4999", "bytes 4999-4999/5000", 4999..5000),
      ("bytes=4000-", "bytes 4000-4999/5000", 4000..5000),
    ];

    for (range, content_range, span) in cases {
      let resp = proxy.get("/stream/direct", &url, Some(range)).await;
      assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT, "{range}");
      assert_eq!(header(&resp, header::CONTENT_RANGE), content_range);
      assert_eq!(
        header(&resp, header::CONTENT_LENGTH),
        span.len().to_string()
      );
      assert_eq!(resp.bytes().await.unwrap(), fixture()[span], "{range}");
    }
  }

  #[tokio::test]
  async fn start_beyond_size_is_not_satisfiable() {
    let (upstream, proxy) = direct_only().await;

    for path in ["/plain.mp4", "/ranged.mp4"] {
      let resp = proxy
        .get("/stream/direct", &upstream.url(path), Some("bytes=5000-"))
        .await;
      assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE, "{path}");
      assert_eq!(header(&resp, header::CONTENT_RANGE), "bytes */5000");
      assert_eq!(header(&resp, header::CACHE_CONTROL), "no-store");
      assert_eq!(error_kind(resp).await.0, "range_not_satisfiable");
    }
  }

  #[tokio::test]
  async fn full_body_matches_declared_length() {
    let (upstream, proxy) = direct_only().await;

    let resp = proxy
      .get("/stream/direct", &upstream.url("/plain.mp4"), None)
      .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.content_length(), Some(5000));
    assert_eq!(header(&resp, header::ACCEPT_RANGES), "bytes");
    assert!(resp.headers().get(header::CONTENT_RANGE).is_none());
    assert_eq!(resp.bytes().await.unwrap().len(), 5000);
  }

  #[tokio::test]
  async fn unknown_length_degrades_consistently() {
    let (upstream, proxy) = direct_only().await;
    let url = upstream.url("/chunked.mp4");

    let resp = proxy.get("/stream/direct", &url, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, header::ACCEPT_RANGES), "none");
    assert_eq!(resp.bytes().await.unwrap(), fixture());

    let ranges =
      ["bytes=10-19", "bytes=4000-5999", "bytes=6000-6999", "bytes=10-"];
    for range in ranges {
      let resp = proxy.get("/stream/direct", &url, Some(range)).await;
      assert_eq!(resp.status(), StatusCode::OK, "{range}");
      assert_eq!(header(&resp, header::ACCEPT_RANGES), "none");
      assert!(resp.headers().get(header::CONTENT_RANGE).is_none());
      assert_eq!(resp.bytes().await.unwrap(), fixture(), "{range}");
    }
  }

  #[tokio::test]
  async fn mid_stream_failure_ends_response_without_extra_bytes() {
    let (upstream, proxy) = direct_only().await;

    let mut resp = proxy
      .get("/stream/direct", &upstream.url("/truncated.mp4"), None)
      .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.content_length(), Some(5000));

    let mut received = Vec::new();
    let failed = loop {
      match resp.chunk().await {
        Ok(Some(chunk)) => received.extend_from_slice(&chunk),
        Ok(None) => break false,
        Err(_) => break true,
      }
    };
    assert!(failed, "body completed despite the upstream failure");
    assert!(received.len() <= 1000);
    assert_eq!(received, fixture()[..received.len()]);
  }

  #[tokio::test]
  async fn rejected_ranges_fall_back_to_whole_file() {
    let (upstream, proxy) = direct_only().await;

    let resp = proxy
      .get(
        "/stream/direct",
        &upstream.url("/reject-range.mp4"),
        Some("bytes=100-199"),
      )
      .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(header(&resp, header::CONTENT_RANGE), "bytes 100-199/5000");
    assert_eq!(resp.bytes().await.unwrap(), fixture()[100..200]);
  }

  #[tokio::test]
  async fn upstream_failures_are_structured() {
    let (upstream, proxy) = direct_only().await;

    for range in [None, Some("bytes=0-9")] {
      let resp = proxy
        .get("/stream/direct", &upstream.url("/missing.mp4"), range)
        .await;
      assert_eq!(resp.status(), StatusCode::NOT_FOUND);
      let (kind, reason) = error_kind(resp).await;
      assert_eq!(kind, "source_unavailable");
      assert_eq!(reason.as_deref(), Some("removed"));
    }

    let port = {
      let listener = TcpListener::bind("127.0.0.1:0").unwrap();
      listener.local_addr().unwrap().port()
    };
    let resp = proxy
      .get("/stream/direct", &format!("http://127.0.0.1:{port}/a.mp4"), None)
      .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(error_kind(resp).await.0, "upstream_unreachable");
  }

  #[tokio::test]
  async fn forwards_browser_like_headers() {
    let (upstream, proxy) = direct_only().await;

    let resp = proxy
      .get("/stream/direct", &upstream.url("/echo.mp4"), None)
      .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let seen = upstream.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.0, TEST_AGENT);
    assert_eq!(seen.1, format!("http://{}", upstream.addr));
  }

  #[tokio::test]
  async fn client_disconnect_closes_upstream() {
    let (upstream, proxy) = direct_only().await;

    let mut resp = proxy
      .get("/stream/direct", &upstream.url("/endless.mp4"), None)
      .await;
    assert_eq!(resp.status(), StatusCode::OK);
    for _ in 0..4 {
      assert!(resp.chunk().await.unwrap().is_some());
    }
    drop(resp);

    tokio::time::timeout(Duration::from_secs(5), upstream.closed.notified())
      .await
      .expect("upstream connection kept open after client left");
  }

  #[tokio::test]
  async fn stream_dispatches_direct_files() {
    let (upstream, proxy) = direct_only().await;

    let resp = proxy
      .get("/stream", &upstream.url("/ranged.mp4"), Some("bytes=100-199"))
      .await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.bytes().await.unwrap(), fixture()[100..200]);
  }

  #[tokio::test]
  async fn extracted_streams_are_cached() {
    let upstream = Upstream::start().await;
    let extractor = Arc::new(StaticExtractor::new(vec![
      StreamCandidate::new(upstream.url("/master.m3u8"), Container::Hls),
      StreamCandidate::new(upstream.url("/ranged.mp4"), Container::Mp4),
    ]));
    let proxy = Harness::start(extractor.clone()).await;

    for _ in 0..2 {
      let resp = proxy.get("/stream", WATCH_URL, Some("bytes=0-99")).await;
      assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
      assert_eq!(header(&resp, header::CACHE_CONTROL), "no-cache");
      assert_eq!(resp.bytes().await.unwrap(), fixture()[..100]);
    }
    assert_eq!(extractor.calls(), 1);

    let resp = proxy.get("/health", WATCH_URL, None).await;
    let health: Value = resp.json().await.unwrap();
    assert_eq!(health["cached_entries"], 1);
  }

  #[tokio::test]
  async fn zero_candidates_are_never_cached() {
    let extractor = Arc::new(StaticExtractor::new(vec![]));
    let proxy = Harness::start(extractor.clone()).await;

    for _ in 0..2 {
      let resp = proxy.get("/stream", WATCH_URL, None).await;
      assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
      let (kind, reason) = error_kind(resp).await;
      assert_eq!(kind, "source_unavailable");
      assert_eq!(reason.as_deref(), Some("no_streams"));
    }
    assert_eq!(extractor.calls(), 2);
  }

  #[tokio::test]
  async fn absent_extractor_yields_embed() {
    let proxy = Harness::start(Arc::new(Unavailable)).await;

    let resp = proxy.get("/stream", WATCH_URL, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "embed");
    assert_eq!(body["platform"], "youtube");
    assert_eq!(body["embed_url"], "https://www.youtube.com/embed/dQw4w9WgXcQ");
    assert_eq!(body["video_url"], WATCH_URL);

    let resp = proxy.get("/embed", WATCH_URL, None).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = proxy.get("/embed", "https://example.com/a.mp4", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn video_info_documents() {
    let upstream = Upstream::start().await;
    let extractor = Arc::new(StaticExtractor::new(vec![StreamCandidate::new(
      upstream.url("/ranged.mp4"),
      Container::Mp4,
    )]));
    let proxy = Harness::start(extractor).await;

    let resp = proxy.get("/video/info", WATCH_URL, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(header(&resp, header::CACHE_CONTROL), "no-cache");
    let info: Value = resp.json().await.unwrap();
    assert_eq!(info["source_kind"], "embeddable");
    assert_eq!(info["platform"], "youtube");
    assert_eq!(info["title"], "static video");
    assert_eq!(info["candidate_streams"][0]["container"], "mp4");
    assert_eq!(
      info["embed_url"],
      "https://www.youtube.com/embed/dQw4w9WgXcQ"
    );

    let resp = proxy
      .get("/video/info", "https://example.com/media/clip.webm", None)
      .await;
    let info: Value = resp.json().await.unwrap();
    assert_eq!(info["source_kind"], "direct_file");
    assert_eq!(info["title"], "clip.webm");
    assert_eq!(info["embed_url"], Value::Null);
  }

  #[tokio::test]
  async fn invalid_requests_are_rejected() {
    let proxy = Harness::start(Arc::new(Unavailable)).await;

    let resp = proxy
      .client
      .get(format!("http://{}/stream", proxy.addr))
      .send()
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_kind(resp).await.0, "invalid_request");

    for url in ["not a url", "ftp://example.com/a.mp4", "https://example.com/"]
    {
      let resp = proxy.get("/stream", url, None).await;
      assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{url}");
    }

    let resp = proxy
      .get("/stream/direct", "https://example.com/a.mp4", Some("bytes=x-y"))
      .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn health_describes_service() {
    let proxy = Harness::start(Arc::new(Unavailable)).await;

    let resp = proxy
      .client
      .get(format!("http://{}/health", proxy.addr))
      .send()
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let health: Value = resp.json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["extractor"], "none");
    assert_eq!(health["cached_entries"], 0);
    assert_eq!(health["endpoints"].as_array().unwrap().len(), 5);
  }
}
