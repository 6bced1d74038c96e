use std::{fmt, sync::Arc};

use axum::{
  http::{header, HeaderValue},
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
  cache::MetadataCache,
  error::UnavailableReason,
  extractor::Extractor,
  metadata::{StreamCandidate, VideoMetadata},
  proxy::{Proxy, RangeRequest},
  source::{Classification, Platform, VideoReference},
  Error, Result,
};

// direct files don't change behind a url; extracted platform urls are
// signed and expire
const DIRECT_CACHE_CONTROL: &str = "public, max-age=31536000";
const EXTRACTED_CACHE_CONTROL: &str = "no-cache";
pub const DOCUMENT_CACHE_CONTROL: &str = "no-cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Classifying,
  Resolving,
  Delivering,
  Done,
  Failed,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Classifying => "classifying",
      Stage::Resolving => "resolving",
      Stage::Delivering => "delivering",
      Stage::Done => "done",
      Stage::Failed => "failed",
    };
    f.write_str(name)
  }
}

/// An iframe-style player target for platforms we can't stream directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmbedDescriptor {
  pub kind: &'static str,
  pub platform: Platform,
  pub embed_url: String,
  pub video_url: String,
}

/// The delivery strategy chosen for one request.
#[derive(Debug)]
pub enum Plan {
  Stream {
    candidate: StreamCandidate,
    cache_control: &'static str,
  },
  Embed(EmbedDescriptor),
}

/// `VideoMetadata` as served by the info route.
#[derive(Debug, Serialize)]
pub struct VideoInfo {
  #[serde(flatten)]
  pub metadata: VideoMetadata,
  pub embed_url: Option<String>,
}

pub struct Orchestrator {
  cache: MetadataCache,
  extractor: Arc<dyn Extractor>,
  proxy: Proxy,
}

impl Orchestrator {
  pub fn new(
    cache: MetadataCache,
    extractor: Arc<dyn Extractor>,
    proxy: Proxy,
  ) -> Self {
    Self {
      cache,
      extractor,
      proxy,
    }
  }

  pub fn extractor_name(&self) -> &'static str {
    self.extractor.name()
  }

  pub fn cached_entries(&self) -> usize {
    self.cache.len()
  }

  /// Entry point of `/stream`: classify, resolve, then proxy or embed.
  pub async fn stream(
    &self,
    video: &VideoReference,
    range: Option<RangeRequest>,
  ) -> Result<Response> {
    debug!(stage = %Stage::Classifying, url = video.raw(), kind = ?video.kind());
    let plan = self.plan(video).await.map_err(|err| failed(video, err))?;
    self.deliver(video, plan, range).await
  }

  /// Entry point of `/stream/direct`: the url is proxied as is.
  pub async fn stream_direct(
    &self,
    video: &VideoReference,
    range: Option<RangeRequest>,
  ) -> Result<Response> {
    let plan = Plan::Stream {
      candidate: StreamCandidate::direct(video),
      cache_control: DIRECT_CACHE_CONTROL,
    };
    self.deliver(video, plan, range).await
  }

  pub async fn info(&self, video: &VideoReference) -> Result<VideoInfo> {
    let metadata = self.metadata(video).await?;
    let embed_url = video
      .platform()
      .and_then(|platform| platform.embed_url(video.url()));
    Ok(VideoInfo {
      metadata,
      embed_url,
    })
  }

  pub async fn metadata(&self, video: &VideoReference) -> Result<VideoMetadata> {
    match video.classification() {
      Classification::DirectFile => Ok(VideoMetadata::direct(video)),
      Classification::Embeddable(_) => self.resolve(video).await,
      Classification::Unknown => Err(unrecognized(video)),
    }
  }

  pub fn embed(&self, video: &VideoReference) -> Result<EmbedDescriptor> {
    let platform = video.platform().ok_or_else(|| {
      Error::invalid(format!(
        "{} is not hosted on an embeddable platform",
        video.raw()
      ))
    })?;

    let embed_url = platform.embed_url(video.url()).ok_or_else(|| {
      Error::unavailable(
        None,
        format!("no {} video id found in {}", platform.name(), video.raw()),
      )
    })?;

    Ok(EmbedDescriptor {
      kind: "embed",
      platform,
      embed_url,
      video_url: video.raw().to_string(),
    })
  }

  /// Pick the delivery strategy: a direct file streams itself; a platform
  /// video streams its preferred extracted candidate, or degrades to an
  /// embed when the extraction service is absent or found no progressive
  /// stream.
  pub async fn plan(&self, video: &VideoReference) -> Result<Plan> {
    debug!(stage = %Stage::Resolving, url = video.raw());
    match video.classification() {
      Classification::DirectFile => Ok(Plan::Stream {
        candidate: StreamCandidate::direct(video),
        cache_control: DIRECT_CACHE_CONTROL,
      }),
      Classification::Unknown => Err(unrecognized(video)),
      Classification::Embeddable(_) => {
        let metadata = match self.resolve(video).await {
          Ok(metadata) => metadata,
          Err(Error::SourceUnavailable {
            reason: Some(UnavailableReason::ServiceAbsent),
            ..
          }) => return self.embed(video).map(Plan::Embed),
          Err(err) => return Err(err),
        };

        match metadata.preferred_stream() {
          Some(candidate) => Ok(Plan::Stream {
            candidate: candidate.clone(),
            cache_control: EXTRACTED_CACHE_CONTROL,
          }),
          None => {
            info!(url = video.raw(), "no progressive stream, embedding");
            self.embed(video).map(Plan::Embed)
          }
        }
      }
    }
  }

  // cache first, then one extraction attempt; failures are never cached
  async fn resolve(&self, video: &VideoReference) -> Result<VideoMetadata> {
    if let Some(metadata) = self.cache.get(video.cache_key()) {
      debug!(key = video.cache_key(), "metadata cache hit");
      return Ok(metadata);
    }

    debug!(
      key = video.cache_key(),
      extractor = self.extractor.name(),
      "metadata cache miss, extracting"
    );
    let metadata = self.extractor.extract(video).await?;
    if metadata.candidate_streams.is_empty() {
      return Err(Error::unavailable(
        UnavailableReason::NoStreams,
        format!("no playable streams found for {}", video.raw()),
      ));
    }

    self.cache.put(video.cache_key(), metadata.clone());
    Ok(metadata)
  }

  async fn deliver(
    &self,
    video: &VideoReference,
    plan: Plan,
    range: Option<RangeRequest>,
  ) -> Result<Response> {
    debug!(stage = %Stage::Delivering, url = video.raw());
    let resp = match plan {
      Plan::Stream {
        candidate,
        cache_control,
      } => self
        .proxy
        .stream(&candidate, range, cache_control)
        .await
        .map_err(|err| failed(video, err))?,
      Plan::Embed(descriptor) => document(descriptor),
    };

    debug!(stage = %Stage::Done, url = video.raw(), status = %resp.status());
    Ok(resp)
  }
}

fn unrecognized(video: &VideoReference) -> Error {
  Error::invalid(format!(
    "{} is neither a supported platform nor a recognized media file",
    video.raw()
  ))
}

fn failed(video: &VideoReference, err: Error) -> Error {
  warn!(stage = %Stage::Failed, url = video.raw(), kind = err.kind(), "{err}");
  err
}

/// A JSON document response that browsers shouldn't reuse without
/// revalidating.
pub fn document(body: impl Serialize) -> Response {
  let mut resp = Json(body).into_response();
  resp.headers_mut().insert(
    header::CACHE_CONTROL,
    HeaderValue::from_static(DOCUMENT_CACHE_CONTROL),
  );
  resp
}
