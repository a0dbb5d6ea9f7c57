//! Bytes Cache
//!
//! A pluggable key-to-bytes store with per-entry TTLs, used for both query
//! results and glob-resolution (find) responses. The cache is advisory: every
//! failure mode reads as a miss and must never stall the request path.
//!
//! # Variants
//!
//! - **Null**: always misses; used when caching is disabled and in tests.
//! - **Mem**: in-memory store with a byte budget and a background sweeper.
//! - **Memcached**: networked store speaking the memcached text protocol,
//!   with a hard 50 ms deadline on reads.
//!
//! Variants are dispatched through the [`BytesCache`] enum; cloning a cache
//! clones a handle to the same store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Hard deadline for networked cache reads. A get that cannot answer within
/// this bound is a miss.
pub const MEMCACHE_GET_DEADLINE: Duration = Duration::from_millis(50);

/// How often the in-memory sweeper reclaims expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// A key-to-bytes cache with per-entry TTLs.
#[derive(Clone)]
pub enum BytesCache {
    /// Always misses, never stores.
    Null,
    /// In-memory expiring store.
    Mem(ExpiringCache),
    /// Networked memcached-backed store.
    Memcached(McCache),
}

impl BytesCache {
    /// Looks up `key`. Any error or deadline overrun reads as a miss.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self {
            BytesCache::Null => None,
            BytesCache::Mem(c) => c.get(key),
            BytesCache::Memcached(c) => c.get(key).await,
        }
    }

    /// Stores `value` under `key` for `ttl_secs` seconds. Failures are
    /// swallowed.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl_secs: i32) {
        match self {
            BytesCache::Null => {}
            BytesCache::Mem(c) => c.set(key, value, ttl_secs),
            BytesCache::Memcached(c) => c.set(key, value, ttl_secs),
        }
    }
}

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

struct Store {
    entries: HashMap<String, Entry>,
    total_bytes: u64,
}

impl Store {
    fn remove(&mut self, key: &str) {
        if let Some(e) = self.entries.remove(key) {
            self.total_bytes -= e.value.len() as u64;
        }
    }
}

/// In-memory expiring cache with a byte budget.
///
/// A budget of zero means unbounded. When an insert would exceed the budget,
/// expired entries are reclaimed first, then the entries closest to expiry
/// are evicted until the new value fits.
#[derive(Clone)]
pub struct ExpiringCache {
    store: Arc<Mutex<Store>>,
    max_bytes: u64,
}

impl ExpiringCache {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            store: Arc::new(Mutex::new(Store {
                entries: HashMap::new(),
                total_bytes: 0,
            })),
            max_bytes,
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let store = self.store.lock().ok()?;
        let entry = store.entries.get(key)?;
        if entry.expires_at <= Instant::now() {
            // Leave reclamation to the sweeper.
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl_secs: i32) {
        let ttl = Duration::from_secs(ttl_secs.max(0) as u64);
        let Ok(mut store) = self.store.lock() else {
            return;
        };
        store.remove(key);
        if self.max_bytes > 0 {
            let need = value.len() as u64;
            if store.total_bytes + need > self.max_bytes {
                Self::evict(&mut store, self.max_bytes.saturating_sub(need));
            }
        }
        store.total_bytes += value.len() as u64;
        store.entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Total bytes currently held.
    pub fn size(&self) -> u64 {
        self.store.lock().map(|s| s.total_bytes).unwrap_or(0)
    }

    /// Number of entries currently held.
    pub fn items(&self) -> u64 {
        self.store.lock().map(|s| s.entries.len() as u64).unwrap_or(0)
    }

    /// Removes every expired entry.
    pub fn sweep_expired(&self) {
        let Ok(mut store) = self.store.lock() else {
            return;
        };
        let now = Instant::now();
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            store.remove(&k);
        }
    }

    /// Spawns the periodic sweeper. The handle is detached; the task runs for
    /// the life of the process.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                cache.sweep_expired();
            }
        })
    }

    fn evict(store: &mut Store, budget: u64) {
        let now = Instant::now();
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            store.remove(&k);
        }
        while store.total_bytes > budget {
            // Closest to expiry goes first.
            let victim = store
                .entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => store.remove(&k),
                None => break,
            }
        }
    }
}

/// Networked cache over memcached's text protocol.
///
/// Keys are MD5-hexed before use to bound their length. Each operation opens
/// its own connection; gets race a hard deadline and sets are fire-and-forget
/// on a detached task. A get that misses its deadline abandons the in-flight
/// fetch rather than cancelling it and bumps the shared timeout counter.
#[derive(Clone)]
pub struct McCache {
    servers: Arc<Vec<String>>,
    timeouts: Arc<AtomicU64>,
}

impl McCache {
    /// `timeouts` is shared with the metrics registry so deadline overruns
    /// show up as `memcache_timeouts`.
    pub fn new(servers: Vec<String>, timeouts: Arc<AtomicU64>) -> Self {
        Self {
            servers: Arc::new(servers),
            timeouts,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let hashed = hash_key(key);
        let server = self.pick_server(&hashed).to_owned();
        let task = tokio::spawn(Self::fetch(server, hashed));
        match tokio::time::timeout(MEMCACHE_GET_DEADLINE, task).await {
            Ok(joined) => joined.ok().flatten(),
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl_secs: i32) {
        let hashed = hash_key(key);
        let server = self.pick_server(&hashed).to_owned();
        tokio::spawn(async move {
            let _ = Self::store(server, hashed, value, ttl_secs).await;
        });
    }

    /// Number of deadline overruns observed on gets.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    fn pick_server(&self, hashed_key: &str) -> &str {
        if self.servers.len() == 1 {
            return &self.servers[0];
        }
        let mut h: u64 = 0;
        for b in hashed_key.bytes() {
            h = h.wrapping_mul(31).wrapping_add(b as u64);
        }
        &self.servers[(h % self.servers.len() as u64) as usize]
    }

    async fn fetch(server: String, key: String) -> Option<Vec<u8>> {
        let stream = TcpStream::connect(&server).await.ok()?;
        let mut reader = BufReader::new(stream);
        reader
            .get_mut()
            .write_all(format!("get {}\r\n", key).as_bytes())
            .await
            .ok()?;

        let mut header = String::new();
        reader.read_line(&mut header).await.ok()?;
        // "VALUE <key> <flags> <bytes>\r\n" on a hit, "END\r\n" on a miss.
        let mut parts = header.split_whitespace();
        if parts.next() != Some("VALUE") {
            return None;
        }
        let len: usize = parts.nth(2).and_then(|n| n.parse().ok())?;

        let mut value = vec![0u8; len + 2];
        reader.read_exact(&mut value).await.ok()?;
        value.truncate(len);

        let mut end = String::new();
        reader.read_line(&mut end).await.ok()?;
        Some(value)
    }

    async fn store(server: String, key: String, value: Vec<u8>, ttl_secs: i32) -> std::io::Result<()> {
        let mut stream = TcpStream::connect(&server).await?;
        let header = format!("set {} 0 {} {}\r\n", key, ttl_secs.max(0), value.len());
        stream.write_all(header.as_bytes()).await?;
        stream.write_all(&value).await?;
        stream.write_all(b"\r\n").await?;
        let mut reply = [0u8; 8];
        let _ = stream.read(&mut reply).await?;
        Ok(())
    }
}

fn hash_key(key: &str) -> String {
    format!("{:x}", md5::compute(key))
}

/// Canonicalizes a render query string into a cache key.
///
/// Cache-busting parameters are stripped and the remaining pairs are
/// re-encoded in sorted order, so logically identical requests share a key
/// regardless of parameter order.
pub fn normalize_key(query: &str) -> String {
    const STRIP: &[&str] = &["noCache", "jsonp", "_salt", "_ts", "_t"];
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| !STRIP.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    let mut out = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        out.append_pair(k, v);
    }
    out.finish()
}
