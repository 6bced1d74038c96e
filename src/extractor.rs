mod unavailable;
mod ytdlp;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
  config::{Config, ExtractorKind},
  error::UnavailableReason,
  metadata::VideoMetadata,
  source::VideoReference,
  Error,
};

pub use unavailable::Unavailable;
pub use ytdlp::Ytdlp;

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExtractionError {
  pub reason: Option<UnavailableReason>,
  pub message: String,
}

impl ExtractionError {
  pub fn new(
    reason: impl Into<Option<UnavailableReason>>,
    message: impl Into<String>,
  ) -> Self {
    Self {
      reason: reason.into(),
      message: message.into(),
    }
  }
}

impl From<ExtractionError> for Error {
  fn from(err: ExtractionError) -> Self {
    Error::SourceUnavailable {
      reason: err.reason,
      message: err.message,
    }
  }
}

/// Resolves a platform page to directly fetchable streams.
///
/// Implementations may take seconds and fail for platform specific reasons;
/// they are called once per cache miss and never retried.
#[async_trait]
pub trait Extractor: Send + Sync {
  fn name(&self) -> &'static str;

  async fn extract(
    &self,
    video: &VideoReference,
  ) -> Result<VideoMetadata, ExtractionError>;
}

pub fn from_config(config: &Config) -> Arc<dyn Extractor> {
  match config.extractor {
    ExtractorKind::Ytdlp => Arc::new(Ytdlp::new(config)),
    ExtractorKind::None => Arc::new(Unavailable),
  }
}
