//! Fetch Coordinator
//!
//! Resolves the metric fetches a request needs: glob expansion through the
//! find cache (or a Find call), then one render fetch per leaf match, fanned
//! out in parallel under the process-wide limiter and funneled back through
//! a bounded channel. The coordinating task is the only writer of the
//! per-request metric map, so the map needs no locking.
//!
//! Failure policy: a failed find or render drops that metric's series and
//! the request carries on. Only the caller decides what an empty result
//! means.

use std::sync::Arc;

use carbonq_common::pb::GlobResponse;
use carbonq_common::series::{MetricMap, MetricRequest};
use prost::Message;

use crate::state::{AppState, FIND_CACHE_TTL};

/// Per-request fetch accounting, logged with the request timing line.
#[derive(Debug, Default)]
pub struct RenderStats {
    pub zipper_requests: usize,
}

/// Fetches every request not already in `metric_map` and assigns its series.
///
/// Requests are deduplicated by key: a metric that appears in several
/// targets is expanded and fetched once.
pub async fn fetch_metrics(
    state: &Arc<AppState>,
    requests: &[MetricRequest],
    use_cache: bool,
    metric_map: &mut MetricMap,
    stats: &mut RenderStats,
) {
    for req in requests {
        if metric_map.contains_key(req) {
            // Already fetched for this request.
            continue;
        }

        let Some(glob) = resolve_glob(state, &req.metric, use_cache, stats).await else {
            continue;
        };

        // Fetch each leaf in parallel; render data is deliberately not
        // cached, only whole response bodies are.
        let leaves: Vec<String> = glob
            .matches
            .iter()
            .filter(|m| m.is_leaf)
            .map(|m| m.path.clone())
            .collect();

        let (tx, mut rx) = tokio::sync::mpsc::channel(leaves.len().max(1));
        let launched = leaves.len();
        for path in leaves {
            state.metrics.inc_render_requests();
            stats.zipper_requests += 1;
            let permit = state.limiter.acquire().await;
            let zipper = state.zipper.clone();
            let tx = tx.clone();
            let (from, until) = (req.from, req.until);
            tokio::spawn(async move {
                let result = match zipper.render(&path, from, until).await {
                    Ok(series) => Some(series),
                    Err(e) => {
                        tracing::error!("render: {path}: {e}");
                        None
                    }
                };
                // Channel capacity covers every leaf; this never blocks.
                let _ = tx.send(result).await;
                drop(permit);
            });
        }
        drop(tx);

        let mut series = Vec::with_capacity(launched);
        for _ in 0..launched {
            match rx.recv().await {
                Some(Some(s)) => series.push(s),
                Some(None) => {}
                None => break,
            }
        }
        metric_map.insert(req.clone(), series);
    }
}

/// Expands one glob, consulting the find cache first.
async fn resolve_glob(
    state: &Arc<AppState>,
    glob: &str,
    use_cache: bool,
    stats: &mut RenderStats,
) -> Option<GlobResponse> {
    if use_cache {
        if let Some(bytes) = state.find_cache.get(glob).await {
            state.metrics.inc_find_cache_hits();
            match GlobResponse::decode_bytes(&bytes) {
                Ok(decoded) => return Some(decoded),
                Err(e) => tracing::warn!("find cache: {glob}: {e}"),
            }
        }
    }

    state.metrics.inc_find_requests();
    stats.zipper_requests += 1;
    match state.zipper.find(glob).await {
        Ok(decoded) => {
            state
                .find_cache
                .set(glob, decoded.encode_to_vec(), FIND_CACHE_TTL);
            Some(decoded)
        }
        Err(e) => {
            tracing::error!("find: {glob}: {e}");
            None
        }
    }
}
