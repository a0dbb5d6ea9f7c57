//! Find Handler
//!
//! `/metrics/find` expands a metric glob through the zipper and answers in
//! either the tree shape the graphite-web browser expects (`treejson`) or
//! the flat `completer` shape.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use carbonq_common::pb::GlobResponse;

use crate::formats;
use crate::state::AppState;

pub async fn handle(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Response {
    let query = query.unwrap_or_default();
    let mut q = String::new();
    let mut format = String::new();
    let mut jsonp = String::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        match k.as_ref() {
            "query" => q = v.into_owned(),
            "format" => format = v.into_owned(),
            "jsonp" => jsonp = v.into_owned(),
            _ => {}
        }
    }
    if q.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing parameter `query`").into_response();
    }
    if format.is_empty() {
        format = "treejson".to_owned();
    }

    let globs = match state.zipper.find(&q).await {
        Ok(globs) => globs,
        Err(e) => {
            tracing::error!("find: {q}: {e}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let encoded = match format.as_str() {
        "treejson" | "json" => find_treejson(&globs),
        "completer" => find_completer(&globs),
        other => {
            return (
                StatusCode::BAD_REQUEST,
                format!("unsupported format: {other}"),
            )
                .into_response()
        }
    };

    match encoded {
        Ok(body) => formats::write_response("json", &jsonp, body),
        Err(e) => {
            tracing::error!("find encode: {q}: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

#[derive(Serialize)]
struct TreeJsonNode {
    #[serde(rename = "allowChildren")]
    allow_children: i32,
    expandable: i32,
    leaf: i32,
    id: String,
    text: String,
    context: HashMap<String, i32>,
}

/// Tree nodes for the graphite-web metric browser. Matches are deduplicated
/// by their last name component; ids extend the query's base path.
fn find_treejson(globs: &GlobResponse) -> serde_json::Result<Vec<u8>> {
    let mut basepath = globs.name.clone();
    if let Some(i) = basepath.rfind('.') {
        basepath.truncate(i + 1);
    }

    let mut seen = HashSet::new();
    let mut tree = Vec::new();
    for m in &globs.matches {
        let name = match m.path.rfind('.') {
            Some(i) => &m.path[i + 1..],
            None => m.path.as_str(),
        };
        if !seen.insert(name.to_owned()) {
            continue;
        }
        let mut node = TreeJsonNode {
            allow_children: 0,
            expandable: 0,
            leaf: 0,
            id: format!("{basepath}{name}"),
            text: name.to_owned(),
            context: HashMap::new(),
        };
        if m.is_leaf {
            node.leaf = 1;
        } else {
            node.allow_children = 1;
            node.expandable = 1;
        }
        tree.push(node);
    }
    serde_json::to_vec(&tree)
}

#[derive(Serialize)]
struct Completer {
    path: String,
    name: String,
    is_leaf: String,
}

#[derive(Serialize)]
struct CompleterResponse {
    metrics: Vec<Completer>,
}

/// Flat completion entries; `is_leaf` is the string `"0"` or `"1"`.
fn find_completer(globs: &GlobResponse) -> serde_json::Result<Vec<u8>> {
    let metrics = globs
        .matches
        .iter()
        .map(|m| {
            let name = match m.path.rfind('.') {
                Some(i) => m.path[i + 1..].to_owned(),
                None => String::new(),
            };
            Completer {
                path: m.path.clone(),
                name,
                is_leaf: if m.is_leaf { "1" } else { "0" }.to_owned(),
            }
        })
        .collect();
    serde_json::to_vec(&CompleterResponse { metrics })
}
