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

//! carbonq Metrics
//!
//! Process-wide request counters with gauge registration, a serializable
//! snapshot for the debug endpoint, and a plaintext Graphite pusher.
//!
//! # Main Components
//!
//! - [`ApiMetrics`] - the counter registry (one per process)
//! - [`MetricsSnapshot`] - point-in-time sample of counters and gauges
//! - [`GraphitePusher`] - 60 s push loop to a Graphite host

pub mod graphite;
pub mod registry;
pub mod snapshot;

pub use graphite::GraphitePusher;
pub use registry::ApiMetrics;
pub use snapshot::MetricsSnapshot;
