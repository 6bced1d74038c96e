use async_trait::async_trait;

use crate::{
  error::UnavailableReason, metadata::VideoMetadata, source::VideoReference,
};

use super::{ExtractionError, Extractor};

// no extraction service is configured; every platform lookup fails with a
// reason the orchestrator answers with an embed target.
pub struct Unavailable;

#[async_trait]
impl Extractor for Unavailable {
  fn name(&self) -> &'static str {
    "none"
  }

  async fn extract(
    &self,
    video: &VideoReference,
  ) -> Result<VideoMetadata, ExtractionError> {
    Err(ExtractionError::new(
      UnavailableReason::ServiceAbsent,
      format!("no extraction service configured for {}", video.raw()),
    ))
  }
}
