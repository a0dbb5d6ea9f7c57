//! Render Parameter Handling
//!
//! Decodes the `/render` query string. The raw query is parsed by hand
//! (rather than through an extractor) because `target` repeats and because
//! the canonical cache key is derived from the same pairs.

use carbonq_common::cache::normalize_key;

use crate::state::DEFAULT_CACHE_TIMEOUT;

/// Decoded `/render` parameters.
#[derive(Clone, Debug)]
pub struct RenderParams {
    pub targets: Vec<String>,
    pub from: String,
    pub until: String,
    pub format: String,
    pub jsonp: String,
    pub use_cache: bool,
    pub cache_timeout: i32,
    pub max_data_points: i32,
    /// Canonical cache key: busters stripped, pairs sorted.
    pub cache_key: String,
}

/// Graphite-style truthiness: `1`, `true`, `True`, `yes` and friends.
pub fn truthy(v: &str) -> bool {
    matches!(v, "1" | "true" | "True" | "yes" | "Yes")
}

impl RenderParams {
    pub fn from_query(query: &str) -> Self {
        let mut targets = Vec::new();
        let mut from = String::new();
        let mut until = String::new();
        let mut format = String::new();
        let mut jsonp = String::new();
        let mut no_cache = false;
        let mut raw_data = false;
        let mut cache_timeout = DEFAULT_CACHE_TIMEOUT;
        let mut max_data_points = 0;

        for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
            match k.as_ref() {
                "target" => targets.push(v.into_owned()),
                "from" => from = v.into_owned(),
                "until" => until = v.into_owned(),
                "format" => format = v.into_owned(),
                "jsonp" => jsonp = v.into_owned(),
                "noCache" => no_cache = truthy(&v),
                "rawData" | "rawdata" => raw_data = raw_data || truthy(&v),
                "cacheTimeout" => match v.parse() {
                    Ok(t) => cache_timeout = t,
                    Err(e) => tracing::warn!("failed to parse cacheTimeout {v:?}: {e}"),
                },
                "maxDataPoints" => match v.parse() {
                    Ok(m) => max_data_points = m,
                    Err(e) => tracing::warn!("failed to parse maxDataPoints {v:?}: {e}"),
                },
                _ => {}
            }
        }

        // jsonp callbacks only make sense for json output.
        if format.is_empty() && raw_data {
            format = "raw".to_owned();
        }
        if format.is_empty() {
            format = "png".to_owned();
        }
        if format != "json" {
            jsonp.clear();
        }

        Self {
            targets,
            from,
            until,
            format,
            jsonp,
            use_cache: !no_cache,
            cache_timeout,
            max_data_points,
            cache_key: normalize_key(query),
        }
    }
}
