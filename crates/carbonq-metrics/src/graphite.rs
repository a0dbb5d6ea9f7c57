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

//! Graphite Export
//!
//! Pushes the counter snapshot to a Graphite host over the plaintext
//! protocol (`key value timestamp\n`), once a minute, under the key prefix
//! `carbon.api.{hostname}` with the hostname's dots replaced by
//! underscores. Push failures are logged and retried on the next tick.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::registry::ApiMetrics;

/// Interval between pushes.
pub const PUSH_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic plaintext-protocol pusher.
pub struct GraphitePusher {
    host: String,
    prefix: String,
    metrics: Arc<ApiMetrics>,
}

impl GraphitePusher {
    /// `host` is `host[:port]`; the standard plaintext port 2003 is assumed
    /// when missing.
    pub fn new(host: impl Into<String>, metrics: Arc<ApiMetrics>) -> Self {
        let mut host = host.into();
        if !host.contains(':') {
            host.push_str(":2003");
        } else if host.ends_with(':') {
            host.push_str("2003");
        }
        let name = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "unknown".to_owned());
        Self {
            prefix: format!("carbon.api.{}", name.replace('.', "_")),
            host,
            metrics,
        }
    }

    /// Spawns the push loop. The handle is detached; the task runs for the
    /// life of the process.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PUSH_INTERVAL).await;
                if let Err(e) = self.push().await {
                    tracing::warn!(host = %self.host, "graphite push failed: {e}");
                }
            }
        })
    }

    async fn push(&self) -> std::io::Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let payload = self.render_payload(now);
        let mut stream = TcpStream::connect(&self.host).await?;
        stream.write_all(payload.as_bytes()).await?;
        stream.shutdown().await
    }

    fn render_payload(&self, now: u64) -> String {
        let mut out = String::new();
        for (name, value) in self.metrics.snapshot().entries() {
            out.push_str(&format!("{}.{} {} {}\n", self.prefix, name, value, now));
        }
        out
    }
}
