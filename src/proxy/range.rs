use std::fmt;

use axum::http::{header, HeaderMap};

use crate::{Error, Result};

/// A single byte range asked for by a client `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
  /// `bytes=start-end` or the open-ended `bytes=start-`
  From { start: u64, end: Option<u64> },
  /// `bytes=-length`, the last `length` bytes
  Suffix { length: u64 },
}

/// An inclusive byte span of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteSpan {
  pub start: u64,
  pub end: u64,
}

impl ByteSpan {
  pub fn len(&self) -> u64 {
    self.end - self.start + 1
  }
}

impl RangeRequest {
  pub fn parse(value: &str) -> Result<Self> {
    let invalid = || Error::invalid(format!("invalid range {value:?}"));

    let spec = value.trim().strip_prefix("bytes=").ok_or_else(invalid)?;
    if spec.contains(',') {
      return Err(Error::invalid("multiple byte ranges are not supported"));
    }

    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let (start, end) = (start.trim(), end.trim());
    let number = |s: &str| s.parse::<u64>().map_err(|_| invalid());

    match (start.is_empty(), end.is_empty()) {
      (true, true) => Err(invalid()),
      (true, false) => Ok(RangeRequest::Suffix {
        length: number(end)?,
      }),
      (false, true) => Ok(RangeRequest::From {
        start: number(start)?,
        end: None,
      }),
      (false, false) => {
        let (start, end) = (number(start)?, number(end)?);
        if end < start {
          return Err(invalid());
        }
        Ok(RangeRequest::From {
          start,
          end: Some(end),
        })
      }
    }
  }

  pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>> {
    let Some(value) = headers.get(header::RANGE) else {
      return Ok(None);
    };
    let value = value
      .to_str()
      .map_err(|_| Error::invalid("range header is not valid ascii"))?;
    Self::parse(value).map(Some)
  }

  /// Clamp the request to a resource of `size` bytes.
  pub fn resolve(&self, size: u64) -> Result<ByteSpan> {
    let unsatisfiable = Error::RangeNotSatisfiable { size: Some(size) };
    if size == 0 {
      return Err(unsatisfiable);
    }

    match *self {
      RangeRequest::From { start, .. } if start >= size => Err(unsatisfiable),
      RangeRequest::From { start, end } => Ok(ByteSpan {
        start,
        end: end.map_or(size - 1, |end| end.min(size - 1)),
      }),
      RangeRequest::Suffix { length: 0 } => Err(unsatisfiable),
      RangeRequest::Suffix { length } => Ok(ByteSpan {
        start: size.saturating_sub(length),
        end: size - 1,
      }),
    }
  }
}

impl fmt::Display for RangeRequest {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RangeRequest::From { start, end: None } => write!(f, "bytes={start}-"),
      RangeRequest::From {
        start,
        end: Some(end),
      } => write!(f, "bytes={start}-{end}"),
      RangeRequest::Suffix { length } => write!(f, "bytes=-{length}"),
    }
  }
}

/// Total size out of a `Content-Range` value such as `bytes 0-99/5000` or
/// `bytes */5000`.
pub fn content_range_size(value: &str) -> Option<u64> {
  let (_, size) = value.trim().strip_prefix("bytes")?.rsplit_once('/')?;
  size.trim().parse().ok()
}
