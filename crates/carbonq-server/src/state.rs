//! Shared Server State
//!
//! One [`AppState`] is built at startup and handed to every handler. It owns
//! the process-wide singletons: the zipper client, the two caches, the
//! render limiter, the counter registry and the rendering backend.

use std::sync::Arc;

use carbonq_common::cache::BytesCache;
use carbonq_common::limiter::Limiter;
use carbonq_common::timeparse::TimeParser;
use carbonq_metrics::ApiMetrics;
use carbonq_zipper::ZipperClient;

use crate::backend::Renderer;

/// Query-result cache TTL when the client does not override it.
pub const DEFAULT_CACHE_TIMEOUT: i32 = 60;

/// Find-response cache TTL.
pub const FIND_CACHE_TTL: i32 = 5 * 60;

pub struct AppState {
    pub zipper: ZipperClient,
    pub query_cache: BytesCache,
    pub find_cache: BytesCache,
    pub limiter: Limiter,
    pub metrics: Arc<ApiMetrics>,
    pub time_parser: TimeParser,
    /// Reverse-proxy target for unrecognized paths (the co-located web
    /// front-end).
    pub frontend: String,
    pub renderer: Arc<dyn Renderer>,
}

impl AppState {
    /// A state with null caches, a disabled renderer and default knobs.
    /// Callers replace the pieces they care about.
    pub fn new(zipper: ZipperClient) -> Self {
        Self {
            zipper,
            query_cache: BytesCache::Null,
            find_cache: BytesCache::Null,
            limiter: Limiter::new(20),
            metrics: Arc::new(ApiMetrics::new()),
            time_parser: TimeParser::default(),
            frontend: "http://127.0.0.1:8080/".to_owned(),
            renderer: Arc::new(crate::backend::DisabledRenderer),
        }
    }
}
