use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::source::{media_extension, Platform, SourceKind, VideoReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
  Mp4,
  Webm,
  Mov,
  Mkv,
  Ogg,
  Ts,
  Avi,
  #[serde(rename = "3gp")]
  ThreeGp,
  Flv,
  Hls,
  Dash,
  Other,
}

impl Container {
  pub fn from_extension(ext: &str) -> Container {
    match ext.to_ascii_lowercase().as_str() {
      "mp4" | "m4v" => Container::Mp4,
      "webm" => Container::Webm,
      "mov" => Container::Mov,
      "mkv" => Container::Mkv,
      "ogv" | "ogg" => Container::Ogg,
      "ts" => Container::Ts,
      "avi" => Container::Avi,
      "3gp" => Container::ThreeGp,
      "flv" => Container::Flv,
      "m3u8" => Container::Hls,
      "mpd" => Container::Dash,
      _ => Container::Other,
    }
  }

  pub fn mime_type(self) -> &'static str {
    match self {
      Container::Mp4 | Container::Other => "video/mp4",
      Container::Webm => "video/webm",
      Container::Mov => "video/quicktime",
      Container::Mkv => "video/x-matroska",
      Container::Ogg => "video/ogg",
      Container::Ts => "video/mp2t",
      Container::Avi => "video/x-msvideo",
      Container::ThreeGp => "video/3gpp",
      Container::Flv => "video/x-flv",
      Container::Hls => "application/vnd.apple.mpegurl",
      Container::Dash => "application/dash+xml",
    }
  }

  /// Manifests describe segmented streams and can't be relayed as one
  /// byte-addressable resource.
  pub fn is_manifest(self) -> bool {
    matches!(self, Container::Hls | Container::Dash)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamCandidate {
  pub url: String,
  pub container: Container,
  pub mime_type: String,
  pub quality: Option<String>,
  // request headers the origin expects, e.g. those reported by the extractor
  #[serde(skip)]
  pub headers: Vec<(String, String)>,
}

impl StreamCandidate {
  pub fn new(url: impl Into<String>, container: Container) -> Self {
    Self {
      url: url.into(),
      container,
      mime_type: container.mime_type().to_string(),
      quality: None,
      headers: vec![],
    }
  }

  /// The requested url itself, for sources that need no extraction.
  pub fn direct(video: &VideoReference) -> Self {
    let container = media_extension(video.url())
      .map(|ext| Container::from_extension(&ext))
      .unwrap_or(Container::Other);
    Self::new(video.raw(), container)
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoMetadata {
  pub source_kind: SourceKind,
  pub platform: Option<Platform>,
  pub title: Option<String>,
  pub thumbnail_url: Option<String>,
  pub candidate_streams: Vec<StreamCandidate>,
  pub resolved_at: DateTime<Utc>,
}

impl VideoMetadata {
  /// Metadata for a direct file: the url is its own only stream.
  pub fn direct(video: &VideoReference) -> Self {
    let title = video
      .url()
      .path_segments()
      .and_then(|mut segs| segs.next_back())
      .filter(|name| !name.is_empty())
      .map(str::to_string);

    Self {
      source_kind: SourceKind::DirectFile,
      platform: None,
      title,
      thumbnail_url: None,
      candidate_streams: vec![StreamCandidate::direct(video)],
      resolved_at: Utc::now(),
    }
  }

  /// The stream to proxy: first MP4, then first WebM, then the first
  /// progressive candidate of any container. Manifests never qualify.
  pub fn preferred_stream(&self) -> Option<&StreamCandidate> {
    let progressive = || {
      self
        .candidate_streams
        .iter()
        .filter(|c| !c.container.is_manifest())
    };

    progressive()
      .find(|c| c.container == Container::Mp4)
      .or_else(|| progressive().find(|c| c.container == Container::Webm))
      .or_else(|| progressive().next())
  }
}
