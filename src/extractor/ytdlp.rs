use std::{cmp::Reverse, collections::HashMap, process::Stdio};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::{process::Command, sync::Semaphore};
use tracing::{debug, info, warn};

use crate::{
  config::Config,
  error::UnavailableReason,
  metadata::{Container, StreamCandidate, VideoMetadata},
  source::VideoReference,
  util::redact_credentials,
};

use super::{ExtractionError, Extractor};

// run yt-dlp command line to get the playable formats of a video page.
// requires yt-dlp executable to be in PATH (or YTDLP_PATH).
pub struct Ytdlp {
  program: String,
  proxy: Option<String>,
  // limits how many yt-dlp processes run at a time
  permits: Semaphore,
}

impl Ytdlp {
  pub fn new(config: &Config) -> Self {
    Self {
      program: config.ytdlp_path.clone(),
      proxy: config.ytdlp_proxy.clone(),
      permits: Semaphore::new(config.ytdlp_concurrency),
    }
  }
}

#[derive(Debug, Deserialize)]
struct YtdlpInfo {
  title: Option<String>,
  thumbnail: Option<String>,
  #[serde(default)]
  formats: Vec<Format>,
  // single-format extractors only report the top level url
  url: Option<String>,
  ext: Option<String>,
  #[serde(default)]
  http_headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Format {
  url: Option<String>,
  ext: Option<String>,
  protocol: Option<String>,
  format_note: Option<String>,
  height: Option<u32>,
  vcodec: Option<String>,
  acodec: Option<String>,
  #[serde(default)]
  http_headers: HashMap<String, String>,
}

impl Format {
  fn has_audio_and_video(&self) -> bool {
    let present = |codec: &Option<String>| codec.as_deref() != Some("none");
    present(&self.vcodec) && present(&self.acodec)
  }

  fn container(&self) -> Container {
    match self.protocol.as_deref() {
      Some("m3u8" | "m3u8_native") => Container::Hls,
      Some("http_dash_segments") => Container::Dash,
      _ => Container::from_extension(self.ext.as_deref().unwrap_or_default()),
    }
  }

  fn quality(&self) -> Option<String> {
    self
      .format_note
      .clone()
      .or_else(|| self.height.map(|h| format!("{h}p")))
  }

  fn into_candidate(self) -> Option<StreamCandidate> {
    let container = self.container();
    let quality = self.quality();
    let mut candidate = StreamCandidate::new(self.url?, container);
    candidate.quality = quality;
    candidate.headers = self.http_headers.into_iter().collect();
    Some(candidate)
  }
}

#[async_trait]
impl Extractor for Ytdlp {
  fn name(&self) -> &'static str {
    "ytdlp"
  }

  async fn extract(
    &self,
    video: &VideoReference,
  ) -> Result<VideoMetadata, ExtractionError> {
    let mut cmd = Command::new(&self.program);
    cmd
      // emit the info of the single video as one json object
      .arg("-J")
      .arg("--no-warnings")
      .arg("--no-playlist");

    if let Some(proxy) = &self.proxy {
      info!("using proxy: {}", redact_credentials(proxy));
      cmd.arg("--proxy").arg(proxy);
    }

    cmd
      .arg(video.raw())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true);

    let guard = self.permits.acquire().await.map_err(|_| {
      ExtractionError::new(None, "extraction service is shutting down")
    })?;
    debug!(url = video.raw(), "running {}", self.program);
    let output = cmd.output().await.map_err(|e| {
      ExtractionError::new(None, format!("failed to run {}: {e}", self.program))
    })?;
    drop(guard);

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      warn!(url = video.raw(), "yt-dlp failed: {}", stderr.trim());
      return Err(detect_error(&stderr));
    }

    let info: YtdlpInfo =
      serde_json::from_slice(&output.stdout).map_err(|e| {
        ExtractionError::new(None, format!("unexpected yt-dlp output: {e}"))
      })?;

    Ok(VideoMetadata {
      source_kind: video.kind(),
      platform: video.platform(),
      title: info.title.clone(),
      thumbnail_url: info.thumbnail.clone(),
      candidate_streams: candidates(info),
      resolved_at: Utc::now(),
    })
  }
}

// formats with both audio and video, progressive downloads first, then by
// height descending
fn candidates(info: YtdlpInfo) -> Vec<StreamCandidate> {
  let mut formats: Vec<Format> = info
    .formats
    .into_iter()
    .filter(|f| f.url.is_some() && f.has_audio_and_video())
    .collect();

  if formats.is_empty() {
    if let Some(url) = info.url {
      formats.push(Format {
        url: Some(url),
        ext: info.ext,
        protocol: None,
        format_note: None,
        height: None,
        vcodec: None,
        acodec: None,
        http_headers: info.http_headers,
      });
    }
  }

  formats.sort_by_key(|f| (f.container().is_manifest(), Reverse(f.height)));
  formats
    .into_iter()
    .filter_map(Format::into_candidate)
    .collect()
}

fn detect_error(stderr: &str) -> ExtractionError {
  let lower = stderr.to_ascii_lowercase();
  let reason = if lower.contains("private video") {
    Some(UnavailableReason::Private)
  } else if lower.contains("age-restricted")
    || lower.contains("confirm your age")
  {
    Some(UnavailableReason::AgeRestricted)
  } else if lower.contains("not available in your country")
    || lower.contains("geo restriction")
  {
    Some(UnavailableReason::RegionBlocked)
  } else if lower.contains("video unavailable")
    || lower.contains("has been removed")
    || lower.contains("http error 404")
  {
    Some(UnavailableReason::Removed)
  } else {
    None
  };

  let message = stderr
    .lines()
    .find(|line| line.contains("ERROR:"))
    .unwrap_or("yt-dlp could not extract the video")
    .trim()
    .to_string();

  ExtractionError::new(reason, message)
}
