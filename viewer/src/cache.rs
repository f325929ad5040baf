use async_trait::async_trait;
use cloudcasting::{CloudcastingApi, FetchError, MAX_TIME_STEPS};
use log::debug;
use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::decode::{decode_geotiff, DecodeError, DecodedFrame};

/// Default frame capacity: four full variables worth of steps.
pub const DEFAULT_CACHE_CAPACITY: usize = 4 * MAX_TIME_STEPS as usize;

/// Identifies one decodable unit of data: a forecast variable at a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub variable: String,
    pub step: u32,
}

impl FrameKey {
    pub fn new(variable: &str, step: u32) -> Self {
        Self {
            variable: variable.to_string(),
            step,
        }
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.variable, self.step)
    }
}

/// Source of raw raster payloads. Implemented by the HTTP client and by
/// test stubs.
#[async_trait]
pub trait LayerSource: Send + Sync {
    async fn fetch_layer(&self, variable: &str, step: u32) -> Result<Vec<u8>, FetchError>;
}

#[async_trait]
impl LayerSource for CloudcastingApi {
    async fn fetch_layer(&self, variable: &str, step: u32) -> Result<Vec<u8>, FetchError> {
        CloudcastingApi::fetch_layer(self, variable, step).await
    }
}

#[derive(Debug, Error)]
pub enum LayerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// Result of a cache lookup. When inserting the frame pushed an older
/// entry out, `evicted` names it so the caller can drop the matching map
/// overlay and keep cache and map consistent.
#[derive(Debug)]
pub struct CacheOutcome {
    pub frame: Arc<DecodedFrame>,
    pub evicted: Option<FrameKey>,
}

/// Bounded LRU cache of decoded frames keyed by (variable, step).
///
/// A hit returns the stored frame without any I/O. A miss runs fetch then
/// decode and stores the result only on success; a failure from either
/// stage is never cached, so the next request for that key retries from
/// scratch.
pub struct FrameCache {
    source: Arc<dyn LayerSource>,
    entries: Mutex<LruCache<FrameKey, Arc<DecodedFrame>>>,
    stats: Mutex<CacheStats>,
}

impl FrameCache {
    pub fn new(source: Arc<dyn LayerSource>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).expect("cache capacity must be > 0");
        Self {
            source,
            entries: Mutex::new(LruCache::new(capacity)),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Return the decoded frame for `key`, fetching and decoding on miss.
    ///
    /// The cache lock is released across fetch/decode, so two concurrent
    /// misses for the same key may both do the work; the second insert
    /// replaces an identical immutable frame. Duplicate in-flight requests
    /// are deliberately not coalesced.
    pub async fn get_or_create(&self, key: &FrameKey) -> Result<CacheOutcome, LayerError> {
        {
            let mut entries = self.entries.lock().await;
            if let Some(frame) = entries.get(key) {
                debug!("cache hit for {}", key);
                self.stats.lock().await.hits += 1;
                return Ok(CacheOutcome {
                    frame: Arc::clone(frame),
                    evicted: None,
                });
            }
        }

        debug!("cache miss for {}, fetching", key);
        let bytes = self.source.fetch_layer(&key.variable, key.step).await?;
        let frame = Arc::new(decode_geotiff(&bytes)?);

        let evicted = {
            let mut entries = self.entries.lock().await;
            entries
                .push(key.clone(), Arc::clone(&frame))
                .and_then(|(old_key, _)| (old_key != *key).then_some(old_key))
        };

        let mut stats = self.stats.lock().await;
        stats.misses += 1;
        if let Some(old_key) = &evicted {
            debug!("evicted {} to make room for {}", old_key, key);
            stats.evictions += 1;
        }

        Ok(CacheOutcome { frame, evicted })
    }

    /// Key presence without touching recency order.
    pub async fn contains(&self, key: &FrameKey) -> bool {
        self.entries.lock().await.peek(key).is_some()
    }

    /// Number of cached steps for one variable.
    pub async fn cached_steps(&self, variable: &str) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|(key, _)| key.variable == variable)
            .count()
    }

    /// Whether every step of the horizon is cached for `variable`.
    pub async fn all_steps_cached(&self, variable: &str) -> bool {
        self.cached_steps(variable).await == MAX_TIME_STEPS as usize
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        self.stats.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
        *self.stats.lock().await = CacheStats::default();
    }
}
