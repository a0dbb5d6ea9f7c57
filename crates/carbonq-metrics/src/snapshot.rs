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

use serde::Serialize;

/// Point-in-time view of every counter and gauge, served by the debug
/// endpoint and pushed to Graphite.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub request_cache_hits: u64,
    pub find_requests: u64,
    pub find_cache_hits: u64,
    pub render_requests: u64,
    pub memcache_timeouts: u64,
    #[serde(flatten)]
    pub gauges: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Flattens the snapshot to `(name, value)` pairs, gauges included, in a
    /// stable order.
    pub fn entries(&self) -> Vec<(String, u64)> {
        let mut out = vec![
            ("requests".to_owned(), self.requests),
            ("request_cache_hits".to_owned(), self.request_cache_hits),
            ("find_requests".to_owned(), self.find_requests),
            ("find_cache_hits".to_owned(), self.find_cache_hits),
            ("render_requests".to_owned(), self.render_requests),
            ("memcache_timeouts".to_owned(), self.memcache_timeouts),
        ];
        for (name, value) in &self.gauges {
            out.push((name.clone(), *value));
        }
        out
    }
}
