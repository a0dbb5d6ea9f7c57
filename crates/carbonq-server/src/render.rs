//! Render Handler
//!
//! The `/render` entry point. Flow: canonical cache key, query-cache
//! lookup, time-parameter normalization, then per target: parse, enumerate
//! fetches, resolve through the coordinator, evaluate inside a fault
//! boundary, and finally encode and store the body back in the query cache.
//!
//! A malformed target fails the whole request with a 400 that shows the
//! parsed prefix and the offending suffix. A failing backend or a panicking
//! evaluation only drops the affected target's series.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use carbonq_common::series::MetricMap;
use carbonq_expr::{eval_expr, parse, ParseError};

use crate::coordinator::{fetch_metrics, RenderStats};
use crate::formats;
use crate::params::RenderParams;
use crate::pickle::marshal_pickle;
use crate::state::AppState;

const FORMATS: &[&str] = &["json", "protobuf", "raw", "csv", "pickle", "png"];

pub async fn handle(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    let t0 = Instant::now();
    state.metrics.inc_requests();

    let query = query.unwrap_or_default();
    let params = RenderParams::from_query(&query);

    if params.targets.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing parameter `target`").into_response();
    }
    if !FORMATS.contains(&params.format.as_str()) {
        return (
            StatusCode::BAD_REQUEST,
            format!("unsupported format: {}", params.format),
        )
            .into_response();
    }

    if params.use_cache {
        if let Some(body) = state.query_cache.get(&params.cache_key).await {
            state.metrics.inc_request_cache_hits();
            return formats::write_response(&params.format, &params.jsonp, body);
        }
    }

    let now = chrono::Utc::now().timestamp() as i32;
    let from32 = state.time_parser.parse(&params.from, now - 24 * 3600, now);
    let until32 = state.time_parser.parse(&params.until, now, now);
    if from32 == until32 {
        return (StatusCode::BAD_REQUEST, "Invalid empty time range").into_response();
    }

    let mut results = Vec::new();
    let mut metric_map = MetricMap::new();
    let mut stats = RenderStats::default();

    for target in &params.targets {
        let target = if params.max_data_points > 0 {
            format!("maxDataPoints({}, {})", target, params.max_data_points)
        } else {
            target.clone()
        };

        let expr = match parse(&target) {
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    build_parse_error(&target, "", Some(e)),
                )
                    .into_response()
            }
            Ok((expr, rest)) => {
                if !rest.is_empty() {
                    return (
                        StatusCode::BAD_REQUEST,
                        build_parse_error(&target, rest, None),
                    )
                        .into_response();
                }
                expr
            }
        };

        let mut requests = expr.metrics();
        for r in &mut requests {
            r.from += from32;
            r.until += until32;
        }
        fetch_metrics(&state, &requests, params.use_cache, &mut metric_map, &mut stats).await;

        // One pathological target must not take down the whole request.
        match std::panic::catch_unwind(AssertUnwindSafe(|| {
            eval_expr(&expr, from32, until32, &metric_map)
        })) {
            Ok(Ok(series)) => results.extend(series),
            Ok(Err(e)) => tracing::error!("eval: {target}: {e}"),
            Err(_) => tracing::error!("panic during eval: {}", params.cache_key),
        }
    }

    let body = match params.format.as_str() {
        "json" => formats::marshal_json(&results),
        "protobuf" => formats::marshal_protobuf(&results),
        "raw" => formats::marshal_raw(&results),
        "csv" => formats::marshal_csv(&results, state.time_parser.tz()),
        "pickle" => marshal_pickle(&results),
        "png" => match state.renderer.render(&results, &params) {
            Ok(bytes) => bytes,
            Err(e) => return (StatusCode::NOT_IMPLEMENTED, e.to_string()).into_response(),
        },
        _ => Vec::new(),
    };

    if !results.is_empty() {
        state
            .query_cache
            .set(&params.cache_key, body.clone(), params.cache_timeout);
    }

    tracing::info!(
        elapsed_ms = t0.elapsed().as_millis() as u64,
        zipper_requests = stats.zipper_requests,
        targets = ?params.targets,
        "render"
    );

    formats::write_response(&params.format, &params.jsonp, body)
}

/// Human-readable 400 body naming the parsed prefix and the unparsable
/// suffix of a target.
fn build_parse_error(target: &str, remainder: &str, err: Option<ParseError>) -> String {
    let mut msg = format!("Bad Request\n\n{:<20}: {}\n", "Target", target);
    if let Some(e) = err {
        msg.push_str(&format!("{:<20}: {}\n", "Error", e));
    }
    if !remainder.is_empty() {
        let prefix = target.strip_suffix(remainder).unwrap_or("");
        msg.push_str(&format!(
            "{:<20}: {}\n{:<20}: {}\n",
            "Parsed so far", prefix, "Could not parse", remainder
        ));
    }
    msg
}
