use std::{
  pin::Pin,
  task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;

use crate::Result;

/// Relays a byte stream after dropping the first `skip_bytes` bytes and
/// stopping once `limit_bytes` bytes went through.
///
/// The stream ends for good after the limit is reached or the inner stream
/// yields an error, so nothing is written past a failure.
pub struct ByteStream<T> {
  stream: T,
  skip_bytes: u64,
  limit_bytes: Option<u64>,
  done: bool,
}

impl<T> ByteStream<T> {
  pub fn new(stream: T) -> Self {
    ByteStream {
      stream,
      skip_bytes: 0,
      limit_bytes: None,
      done: false,
    }
  }

  pub fn skip_bytes(self, bytes: u64) -> Self {
    ByteStream {
      skip_bytes: bytes,
      ..self
    }
  }

  pub fn limit_bytes(self, bytes: u64) -> Self {
    ByteStream {
      limit_bytes: Some(bytes),
      ..self
    }
  }
}

impl<T> Stream for ByteStream<T>
where
  T: Stream<Item = Result<Bytes>> + Unpin,
{
  type Item = Result<Bytes>;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let this = &mut *self;

    loop {
      if this.done || this.limit_bytes == Some(0) {
        this.done = true;
        return Poll::Ready(None);
      }

      let bytes = match Pin::new(&mut this.stream).poll_next(cx) {
        Poll::Pending => return Poll::Pending,
        Poll::Ready(None) => {
          this.done = true;
          return Poll::Ready(None);
        }
        Poll::Ready(Some(Err(err))) => {
          this.done = true;
          return Poll::Ready(Some(Err(err)));
        }
        Poll::Ready(Some(Ok(bytes))) => bytes,
      };

      let len = bytes.len() as u64;
      if len <= this.skip_bytes {
        this.skip_bytes -= len;
        continue;
      }

      let mut bytes = bytes.slice(this.skip_bytes as usize..);
      this.skip_bytes = 0;

      if let Some(limit) = this.limit_bytes {
        if bytes.len() as u64 > limit {
          bytes = bytes.slice(..limit as usize);
        }
        this.limit_bytes = Some(limit - bytes.len() as u64);
      }

      return Poll::Ready(Some(Ok(bytes)));
    }
  }
}
