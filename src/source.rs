use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde::Serialize;

use crate::{Error, Result};

const MEDIA_EXTENSIONS: &[&str] = &[
  "mp4", "m4v", "webm", "mov", "mkv", "ogv", "ogg", "avi", "ts", "3gp", "flv",
];

const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "mpd"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
  Embeddable,
  DirectFile,
  Unknown,
}

/// Video platforms that expose an iframe player but restrict direct file
/// access. The platform decides which embed target is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
  Youtube,
  Vimeo,
  Dailymotion,
}

static YOUTUBE_ID_REGEX: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap());

impl Platform {
  const ALL: [Platform; 3] =
    [Platform::Youtube, Platform::Vimeo, Platform::Dailymotion];

  fn domains(self) -> &'static [&'static str] {
    match self {
      Platform::Youtube => &["youtube.com", "youtu.be", "youtube-nocookie.com"],
      Platform::Vimeo => &["vimeo.com"],
      Platform::Dailymotion => &["dailymotion.com", "dai.ly"],
    }
  }

  pub fn from_host(host: &str) -> Option<Platform> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    Self::ALL.into_iter().find(|platform| {
      platform.domains().iter().any(|domain| {
        host == *domain
          || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
      })
    })
  }

  pub fn name(self) -> &'static str {
    match self {
      Platform::Youtube => "youtube",
      Platform::Vimeo => "vimeo",
      Platform::Dailymotion => "dailymotion",
    }
  }

  pub fn video_id(self, url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    let segments: Vec<&str> = url
      .path_segments()
      .map(|segs| segs.filter(|s| !s.is_empty()).collect())
      .unwrap_or_default();

    let id = match self {
      Platform::Youtube => {
        let from_query = url
          .query_pairs()
          .find_map(|(k, v)| (k == "v").then(|| v.into_owned()));
        let from_path = match segments.as_slice() {
          [id] if host.ends_with("youtu.be") => Some(id.to_string()),
          ["shorts" | "embed" | "live" | "v", id, ..] => Some(id.to_string()),
          _ => None,
        };
        from_query
          .or(from_path)
          .filter(|id| YOUTUBE_ID_REGEX.is_match(id))?
      }
      Platform::Vimeo => segments
        .iter()
        .find(|seg| seg.bytes().all(|b| b.is_ascii_digit()))?
        .to_string(),
      Platform::Dailymotion => {
        let raw = match segments.as_slice() {
          [id] if host.ends_with("dai.ly") => *id,
          [.., "video", id] => *id,
          _ => return None,
        };
        // legacy urls append the slug: /video/x7tgad0_some-title
        raw.split('_').next()?.to_string()
      }
    };

    (!id.is_empty()).then_some(id)
  }

  pub fn embed_url(self, url: &Url) -> Option<String> {
    let id = self.video_id(url)?;
    let embed = match self {
      Platform::Youtube => format!("https://www.youtube.com/embed/{id}"),
      Platform::Vimeo => format!("https://player.vimeo.com/video/{id}"),
      Platform::Dailymotion => {
        format!("https://www.dailymotion.com/embed/video/{id}")
      }
    };
    Some(embed)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
  Embeddable(Platform),
  DirectFile,
  Unknown,
}

impl Classification {
  pub fn kind(self) -> SourceKind {
    match self {
      Classification::Embeddable(_) => SourceKind::Embeddable,
      Classification::DirectFile => SourceKind::DirectFile,
      Classification::Unknown => SourceKind::Unknown,
    }
  }

  pub fn platform(self) -> Option<Platform> {
    match self {
      Classification::Embeddable(platform) => Some(platform),
      _ => None,
    }
  }
}

/// Classify a raw url without touching the network. Never fails:
/// anything unparsable is `Unknown`.
pub fn classify(raw: &str) -> Classification {
  match Url::parse(raw.trim()) {
    Ok(url) => classify_url(&url),
    Err(_) => Classification::Unknown,
  }
}

fn classify_url(url: &Url) -> Classification {
  if let Some(platform) = url.host_str().and_then(Platform::from_host) {
    return Classification::Embeddable(platform);
  }

  if media_extension(url).is_some() {
    return Classification::DirectFile;
  }

  Classification::Unknown
}

/// The recognized media or manifest extension of a url, looking at the last
/// path segment first and then at query values (`?file=clip.mp4`).
pub fn media_extension(url: &Url) -> Option<String> {
  let from_path = url
    .path_segments()
    .and_then(|mut segs| segs.next_back())
    .and_then(recognized_extension);

  from_path.or_else(|| {
    url
      .query_pairs()
      .find_map(|(_, value)| recognized_extension(&value))
  })
}

fn recognized_extension(name: &str) -> Option<String> {
  let (_, ext) = name.rsplit_once('.')?;
  let ext = ext.to_ascii_lowercase();
  let known = MEDIA_EXTENSIONS.contains(&ext.as_str())
    || MANIFEST_EXTENSIONS.contains(&ext.as_str());
  known.then_some(ext)
}

/// Identity of one requested video. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct VideoReference {
  raw: String,
  url: Url,
  cache_key: String,
  classification: Classification,
}

impl VideoReference {
  pub fn parse(raw: &str) -> Result<Self> {
    let raw = raw.trim();
    if raw.is_empty() {
      return Err(Error::invalid("url is required"));
    }

    let url = Url::parse(raw)
      .map_err(|e| Error::invalid(format!("invalid url {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
      return Err(Error::invalid(format!(
        "unsupported url {raw:?}: only http(s) urls can be streamed"
      )));
    }

    Ok(Self {
      raw: raw.to_string(),
      cache_key: normalize(&url),
      classification: classify(raw),
      url,
    })
  }

  pub fn raw(&self) -> &str {
    &self.raw
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn cache_key(&self) -> &str {
    &self.cache_key
  }

  pub fn classification(&self) -> Classification {
    self.classification
  }

  pub fn kind(&self) -> SourceKind {
    self.classification.kind()
  }

  pub fn platform(&self) -> Option<Platform> {
    self.classification.platform()
  }
}

// scheme + host (+ explicit port) + path + sorted query, fragment dropped
fn normalize(url: &Url) -> String {
  let mut key = format!(
    "{}://{}",
    url.scheme(),
    url.host_str().unwrap_or_default().to_ascii_lowercase()
  );
  if let Some(port) = url.port() {
    key.push_str(&format!(":{port}"));
  }
  key.push_str(url.path());

  let query = url
    .query_pairs()
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .sorted()
    .map(|(k, v)| format!("{k}={v}"))
    .join("&");
  if !query.is_empty() {
    key.push('?');
    key.push_str(&query);
  }

  key
}
