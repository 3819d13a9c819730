//! Rolling-window abuse detection.
//!
//! Each key owns a ring buffer of at most `capacity` timestamps; the map of
//! keys is capped at `max_keys` and idle keys are evicted explicitly.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub window_secs: i64,
    /// Events inside the window that trip the guard.
    pub threshold: usize,
    pub max_keys: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { window_secs: 5, threshold: 5, max_keys: 10_000 }
    }
}

#[derive(Debug)]
pub struct RateWindow<K> {
    cfg: WindowConfig,
    capacity: usize,
    buckets: Mutex<HashMap<K, VecDeque<i64>>>,
}

impl<K: Eq + Hash + Clone> RateWindow<K> {
    pub fn new(cfg: WindowConfig) -> Self {
        let capacity = cfg.threshold.max(1) * 2;
        Self { cfg, capacity, buckets: Mutex::new(HashMap::new()) }
    }

    /// Record one event for `key` at `now` (epoch seconds). Returns true when
    /// the key has reached the threshold within the window.
    pub fn record(&self, key: K, now: i64) -> bool {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !buckets.contains_key(&key) && buckets.len() >= self.cfg.max_keys {
            Self::evict_idle_locked(&mut buckets, now, self.cfg.window_secs);
            if buckets.len() >= self.cfg.max_keys {
                Self::evict_stalest_locked(&mut buckets);
            }
        }

        let ring = buckets.entry(key).or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(now);

        let cutoff = now - self.cfg.window_secs;
        let recent = ring.iter().filter(|ts| **ts > cutoff).count();
        recent >= self.cfg.threshold.max(1)
    }

    /// Drop keys with no event inside the window. Returns how many were removed.
    pub fn evict_idle(&self, now: i64) -> usize {
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Self::evict_idle_locked(&mut buckets, now, self.cfg.window_secs)
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }

    fn evict_idle_locked(buckets: &mut HashMap<K, VecDeque<i64>>, now: i64, window: i64) -> usize {
        let before = buckets.len();
        let cutoff = now - window;
        buckets.retain(|_, ring| ring.back().map_or(false, |last| *last > cutoff));
        before - buckets.len()
    }

    fn evict_stalest_locked(buckets: &mut HashMap<K, VecDeque<i64>>) {
        let stalest = buckets
            .iter()
            .min_by_key(|(_, ring)| ring.back().copied().unwrap_or(i64::MIN))
            .map(|(k, _)| k.clone());
        if let Some(k) = stalest {
            buckets.remove(&k);
        }
    }
}
