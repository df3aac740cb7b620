use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

/// Bounds and memory for adaptive TTLs.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveTtlConfig {
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    /// Keys tracked at once; the least recently seen key is forgotten first.
    pub capacity: usize,
}

impl Default for AdaptiveTtlConfig {
    fn default() -> Self {
        Self {
            min_ttl: Duration::from_secs(15 * 60),
            max_ttl: Duration::from_secs(24 * 60 * 60),
            capacity: 10_000,
        }
    }
}

// halve both counters past this many samples so old traffic fades out
const DECAY_AT: u64 = 1_000;

#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    hits: u64,
    misses: u64,
}

impl Sample {
    fn ratio(&self) -> Option<f64> {
        let total = self.hits + self.misses;
        (total > 0).then(|| self.hits as f64 / total as f64)
    }

    fn decay(&mut self) {
        if self.hits + self.misses > DECAY_AT {
            self.hits /= 2;
            self.misses /= 2;
        }
    }
}

/// Per-key rolling hit ratio mapped onto `[min_ttl, max_ttl]`.
///
/// State is in-process and lost on restart; that only affects tuning.
pub struct AdaptiveTtl {
    config: AdaptiveTtlConfig,
    samples: Mutex<LruCache<String, Sample>>,
}

impl AdaptiveTtl {
    pub fn new(config: AdaptiveTtlConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            samples: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn record_hit(&self, key: &str) {
        self.record(key, |s| s.hits += 1);
    }

    pub fn record_miss(&self, key: &str) {
        self.record(key, |s| s.misses += 1);
    }

    pub fn hit_ratio(&self, key: &str) -> Option<f64> {
        let samples = self
            .samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        samples.peek(key).and_then(Sample::ratio)
    }

    /// `min + (max - min) * ratio`; without samples, `base` clamped to the bounds.
    pub fn ttl_for(&self, key: &str, base: Duration) -> Duration {
        let (min, max) = (self.config.min_ttl, self.config.max_ttl);
        match self.hit_ratio(key) {
            Some(ratio) => min + (max - min).mul_f64(ratio.clamp(0.0, 1.0)),
            None => base.clamp(min, max),
        }
    }

    fn record(&self, key: &str, update: impl FnOnce(&mut Sample)) {
        let mut samples = self
            .samples
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(sample) = samples.get_mut(key) {
            update(sample);
            sample.decay();
        } else {
            let mut sample = Sample::default();
            update(&mut sample);
            samples.put(key.to_string(), sample);
        }
    }
}
