use axum::{
  http::{header, HeaderValue, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use serde::Serialize;
use tracing::error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a platform source could not be resolved, when the extractor can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
  Private,
  AgeRestricted,
  RegionBlocked,
  Removed,
  Forbidden,
  NoStreams,
  ServiceAbsent,
}

impl UnavailableReason {
  fn status(self) -> StatusCode {
    match self {
      Self::Removed => StatusCode::NOT_FOUND,
      Self::Private
      | Self::AgeRestricted
      | Self::RegionBlocked
      | Self::Forbidden => StatusCode::FORBIDDEN,
      Self::NoStreams | Self::ServiceAbsent => StatusCode::BAD_GATEWAY,
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("{0}")]
  InvalidRequest(String),
  #[error("{message}")]
  SourceUnavailable {
    reason: Option<UnavailableReason>,
    message: String,
  },
  #[error("{message}")]
  UpstreamUnreachable { message: String, timed_out: bool },
  #[error("requested range not satisfiable")]
  RangeNotSatisfiable { size: Option<u64> },
  #[error("stream interrupted: {0}")]
  InternalStreamingFailure(String),
  #[error(transparent)]
  Internal(#[from] anyhow::Error),
}

impl Error {
  pub fn invalid(message: impl Into<String>) -> Self {
    Error::InvalidRequest(message.into())
  }

  pub fn unavailable(
    reason: impl Into<Option<UnavailableReason>>,
    message: impl Into<String>,
  ) -> Self {
    Error::SourceUnavailable {
      reason: reason.into(),
      message: message.into(),
    }
  }

  pub fn unreachable(message: impl Into<String>) -> Self {
    Error::UpstreamUnreachable {
      message: message.into(),
      timed_out: false,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      Error::InvalidRequest(_) => "invalid_request",
      Error::SourceUnavailable { .. } => "source_unavailable",
      Error::UpstreamUnreachable { .. } => "upstream_unreachable",
      Error::RangeNotSatisfiable { .. } => "range_not_satisfiable",
      Error::InternalStreamingFailure(_) => "internal_streaming_failure",
      Error::Internal(_) => "internal",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
      Error::SourceUnavailable { reason, .. } => reason
        .map(UnavailableReason::status)
        .unwrap_or(StatusCode::BAD_GATEWAY),
      Error::UpstreamUnreachable { timed_out: true, .. } => {
        StatusCode::SERVICE_UNAVAILABLE
      }
      Error::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
      Error::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
      Error::InternalStreamingFailure(_) | Error::Internal(_) => {
        StatusCode::INTERNAL_SERVER_ERROR
      }
    }
  }

  fn reason(&self) -> Option<UnavailableReason> {
    match self {
      Error::SourceUnavailable { reason, .. } => *reason,
      _ => None,
    }
  }
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    Error::UpstreamUnreachable {
      message: format!("upstream request failed: {err}"),
      timed_out: err.is_timeout(),
    }
  }
}

#[derive(Serialize)]
struct ErrorBody {
  error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
  kind: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  reason: Option<UnavailableReason>,
  message: String,
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(kind = self.kind(), "{self:#}");
    }

    let body = ErrorBody {
      error: ErrorDetail {
        kind: self.kind(),
        reason: self.reason(),
        message: self.to_string(),
      },
    };

    let mut resp = (status, Json(body)).into_response();
    let headers = resp.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Error::RangeNotSatisfiable { size: Some(size) } = self {
      if let Ok(value) = HeaderValue::try_from(format!("bytes */{size}")) {
        headers.insert(header::CONTENT_RANGE, value);
      }
    }
    resp
  }
}
