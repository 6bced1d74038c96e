use std::{
  collections::HashMap,
  sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
  time::Duration,
};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::debug;

use crate::metadata::VideoMetadata;

struct CacheEntry {
  metadata: VideoMetadata,
  expires_at: Instant,
}

impl CacheEntry {
  fn is_expired(&self, now: Instant) -> bool {
    self.expires_at <= now
  }
}

/// Process-wide TTL map from normalized url to resolved metadata.
///
/// Expired entries read as a miss and are dropped on access; a periodic
/// sweep removes the ones nobody asks for again.
#[derive(Clone)]
pub struct MetadataCache {
  entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
  ttl: Duration,
}

impl MetadataCache {
  pub fn new(ttl: Duration) -> Self {
    Self {
      entries: Default::default(),
      ttl,
    }
  }

  pub fn get(&self, key: &str) -> Option<VideoMetadata> {
    let now = Instant::now();
    match self.read().get(key) {
      None => return None,
      Some(entry) if !entry.is_expired(now) => {
        return Some(entry.metadata.clone())
      }
      Some(_) => {}
    }

    // re-check under the write lock, a concurrent put may have refreshed it
    let mut entries = self.write();
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
      entries.remove(key);
      debug!(key, "evicted expired metadata on read");
    }
    None
  }

  pub fn put(&self, key: impl Into<String>, metadata: VideoMetadata) {
    let entry = CacheEntry {
      metadata,
      expires_at: Instant::now() + self.ttl,
    };
    self.write().insert(key.into(), entry);
  }

  /// Remove every expired entry, returning how many were dropped.
  pub fn sweep(&self) -> usize {
    let now = Instant::now();
    let mut entries = self.write();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(now));
    before - entries.len()
  }

  pub fn len(&self) -> usize {
    self.read().len()
  }

  pub async fn sweep_periodically(&self, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      let removed = self.sweep();
      if removed > 0 {
        debug!(removed, remaining = self.len(), "swept expired metadata");
      }
    }
  }

  // writes are single map operations, so a poisoned map is still consistent
  fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.read().unwrap_or_else(PoisonError::into_inner)
  }

  fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
    self.entries.write().unwrap_or_else(PoisonError::into_inner)
  }
}

pub async fn sweeper(
  cache: MetadataCache,
  period: Duration,
  subsys: SubsystemHandle,
) -> anyhow::Result<()> {
  tokio::select! {
    _ = subsys.on_shutdown_requested() => {},
    _ = cache.sweep_periodically(period) => {},
  }
  Ok(())
}
