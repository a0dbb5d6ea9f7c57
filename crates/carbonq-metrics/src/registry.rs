// Copyright 2025 carbonq Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Instant;

use crate::snapshot::MetricsSnapshot;

type Gauge = Box<dyn Fn() -> u64 + Send + Sync>;

/// Process-wide request counters.
///
/// Counters are shared `AtomicU64`s so collaborators that cannot depend on
/// this crate (the memcached cache holds the timeout counter) can still feed
/// them. Gauges are registered as closures and sampled at snapshot time, the
/// same way the in-memory cache publishes its size.
pub struct ApiMetrics {
    pub requests: Arc<AtomicU64>,
    pub request_cache_hits: Arc<AtomicU64>,
    pub find_requests: Arc<AtomicU64>,
    pub find_cache_hits: Arc<AtomicU64>,
    pub render_requests: Arc<AtomicU64>,
    pub memcache_timeouts: Arc<AtomicU64>,
    gauges: StdRwLock<BTreeMap<String, Gauge>>,
    start_time: Instant,
}

impl ApiMetrics {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(AtomicU64::new(0)),
            request_cache_hits: Arc::new(AtomicU64::new(0)),
            find_requests: Arc::new(AtomicU64::new(0)),
            find_cache_hits: Arc::new(AtomicU64::new(0)),
            render_requests: Arc::new(AtomicU64::new(0)),
            memcache_timeouts: Arc::new(AtomicU64::new(0)),
            gauges: StdRwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn inc_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_request_cache_hits(&self) {
        self.request_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_find_requests(&self) {
        self.find_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_find_cache_hits(&self) {
        self.find_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_render_requests(&self) {
        self.render_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Registers a named gauge sampled at snapshot time.
    pub fn register_gauge(&self, name: impl Into<String>, f: impl Fn() -> u64 + Send + Sync + 'static) {
        if let Ok(mut gauges) = self.gauges.write() {
            gauges.insert(name.into(), Box::new(f));
        }
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Samples every counter and gauge.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut gauges = BTreeMap::new();
        if let Ok(registered) = self.gauges.read() {
            for (name, f) in registered.iter() {
                gauges.insert(name.clone(), f());
            }
        }
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            request_cache_hits: self.request_cache_hits.load(Ordering::Relaxed),
            find_requests: self.find_requests.load(Ordering::Relaxed),
            find_cache_hits: self.find_cache_hits.load(Ordering::Relaxed),
            render_requests: self.render_requests.load(Ordering::Relaxed),
            memcache_timeouts: self.memcache_timeouts.load(Ordering::Relaxed),
            gauges,
        }
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_counter_increments() {
        let metrics = ApiMetrics::new();
        metrics.inc_requests();
        metrics.inc_requests();
        metrics.inc_request_cache_hits();
        metrics.inc_find_requests();
        metrics.inc_render_requests();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.request_cache_hits, 1);
        assert_eq!(snap.find_requests, 1);
        assert_eq!(snap.find_cache_hits, 0);
        assert_eq!(snap.render_requests, 1);
    }

    #[test]
    fn test_shared_counter_handle() {
        let metrics = ApiMetrics::new();
        let handle = metrics.memcache_timeouts.clone();
        handle.fetch_add(3, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().memcache_timeouts, 3);
    }

    #[test]
    fn test_gauges_sampled_at_snapshot() {
        let metrics = ApiMetrics::new();
        let value = Arc::new(AtomicU64::new(10));
        let sampled = value.clone();
        metrics.register_gauge("cache_size", move || sampled.load(Ordering::Relaxed));

        assert_eq!(metrics.snapshot().gauges.get("cache_size"), Some(&10));
        value.store(20, Ordering::Relaxed);
        assert_eq!(metrics.snapshot().gauges.get("cache_size"), Some(&20));
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(ApiMetrics::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let metrics = metrics.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    metrics.inc_requests();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().requests, 8000);
    }
}
