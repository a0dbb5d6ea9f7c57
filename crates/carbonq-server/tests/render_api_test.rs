//! End-to-end tests: the full HTTP surface against a stub zipper speaking
//! the real wire format.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use prost::Message;

use carbonq_common::cache::{BytesCache, ExpiringCache};
use carbonq_common::pb::{FetchResponse, GlobMatch, GlobResponse};
use carbonq_server::{AppState, HttpServer};
use carbonq_zipper::ZipperClient;

/// Scripted zipper: glob expansions and per-path series, plus call counters.
struct StubZipper {
    finds: AtomicUsize,
    renders: AtomicUsize,
    globs: HashMap<String, Vec<(String, bool)>>,
    series: HashMap<String, Vec<f64>>,
}

impl StubZipper {
    fn new() -> Self {
        let mut globs = HashMap::new();
        globs.insert("a.b".to_owned(), vec![("a.b".to_owned(), true)]);
        globs.insert("a.c".to_owned(), vec![("a.c".to_owned(), true)]);
        globs.insert(
            "a.*".to_owned(),
            vec![("a.b".to_owned(), true), ("a.c".to_owned(), false)],
        );
        globs.insert("x".to_owned(), vec![("x".to_owned(), true)]);
        globs.insert("counter".to_owned(), vec![("counter".to_owned(), true)]);

        let mut series = HashMap::new();
        series.insert("a.b".to_owned(), vec![1.0, 2.0, 3.0]);
        series.insert("a.c".to_owned(), vec![10.0, 20.0, 30.0]);
        series.insert("x".to_owned(), vec![5.0, 6.0, 7.0]);
        series.insert("counter".to_owned(), vec![1.0, 3.0, 2.0, 5.0]);

        Self {
            finds: AtomicUsize::new(0),
            renders: AtomicUsize::new(0),
            globs,
            series,
        }
    }
}

async fn stub_find(
    State(stub): State<Arc<StubZipper>>,
    Query(params): Query<HashMap<String, String>>,
) -> Vec<u8> {
    stub.finds.fetch_add(1, Ordering::SeqCst);
    let query = params.get("query").cloned().unwrap_or_default();
    let matches = stub
        .globs
        .get(&query)
        .map(|paths| {
            paths
                .iter()
                .map(|(path, is_leaf)| GlobMatch {
                    path: path.clone(),
                    is_leaf: *is_leaf,
                })
                .collect()
        })
        .unwrap_or_default();
    GlobResponse { name: query, matches }.encode_to_vec()
}

async fn stub_render(
    State(stub): State<Arc<StubZipper>>,
    Query(params): Query<HashMap<String, String>>,
) -> Vec<u8> {
    stub.renders.fetch_add(1, Ordering::SeqCst);
    let target = params.get("target").cloned().unwrap_or_default();
    let from: i32 = params.get("from").unwrap().parse().unwrap();
    let values = stub.series.get(&target).cloned().unwrap_or_default();
    FetchResponse {
        name: target,
        start_time: from,
        stop_time: from + 60 * values.len() as i32,
        step_time: 60,
        is_absent: vec![false; values.len()],
        values,
    }
    .encode_to_vec()
}

async fn spawn_zipper(stub: Arc<StubZipper>) -> String {
    let app = Router::new()
        .route("/metrics/find/", get(stub_find))
        .route("/render/", get(stub_render))
        .route("/info/", get(|| async { "{\"zipper\":\"stub\"}" }))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn spawn_api(zipper_base: &str) -> (String, Arc<AppState>) {
    let mut state = AppState::new(ZipperClient::new(zipper_base, 20));
    state.query_cache = BytesCache::Mem(ExpiringCache::new(0));
    state.find_cache = BytesCache::Mem(ExpiringCache::new(0));
    let state = Arc::new(state);

    let app = HttpServer::router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

async fn setup() -> (String, Arc<AppState>, Arc<StubZipper>) {
    let stub = Arc::new(StubZipper::new());
    let zipper_base = spawn_zipper(stub.clone()).await;
    let (api_base, state) = spawn_api(&zipper_base).await;
    (api_base, state, stub)
}

#[tokio::test]
async fn test_render_raw_sums_two_metrics() {
    let (api, _state, _stub) = setup().await;
    let body = reqwest::get(format!(
        "{api}/render/?target=sumSeries(a.b,a.c)&from=1000&until=1180&format=raw"
    ))
    .await
    .unwrap()
    .text()
    .await
    .unwrap();
    assert_eq!(body, "sumSeries(a.b,a.c),1000,1180,60|11,22,33\n");
}

#[tokio::test]
async fn test_render_deduplicates_fetches() {
    let (api, _state, stub) = setup().await;
    let res = reqwest::get(format!(
        "{api}/render/?target=scale(x,2)&target=scale(x,3)&from=1000&until=1180&format=json"
    ))
    .await
    .unwrap();
    assert!(res.status().is_success());
    let parsed: serde_json::Value = res.json().await.unwrap();

    assert_eq!(stub.finds.load(Ordering::SeqCst), 1, "one find for x");
    assert_eq!(stub.renders.load(Ordering::SeqCst), 1, "one render for x");

    let targets: Vec<&str> = parsed
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["target"].as_str().unwrap())
        .collect();
    assert_eq!(targets, vec!["scale(x,2)", "scale(x,3)"]);
    assert_eq!(parsed[0]["datapoints"][0][0], 10.0);
    assert_eq!(parsed[1]["datapoints"][0][0], 15.0);
}

#[tokio::test]
async fn test_render_skips_non_leaves() {
    let (api, _state, stub) = setup().await;
    let body = reqwest::get(format!(
        "{api}/render/?target=sumSeries(a.*)&from=1000&until=1180&format=raw"
    ))
    .await
    .unwrap()
    .text()
    .await
    .unwrap();
    // a.* expands to the leaf a.b and the namespace a.c; only the leaf is
    // fetched.
    assert_eq!(stub.renders.load(Ordering::SeqCst), 1);
    assert_eq!(body, "sumSeries(a.*),1000,1180,60|1,2,3\n");
}

#[tokio::test]
async fn test_find_completer() {
    let (api, _state, _stub) = setup().await;
    let parsed: serde_json::Value = reqwest::get(format!(
        "{api}/metrics/find/?query=a.*&format=completer"
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(
        parsed,
        serde_json::json!({"metrics": [
            {"path": "a.b", "name": "b", "is_leaf": "1"},
            {"path": "a.c", "name": "c", "is_leaf": "0"},
        ]})
    );
}

#[tokio::test]
async fn test_find_requires_query() {
    let (api, _state, _stub) = setup().await;
    let res = reqwest::get(format!("{api}/metrics/find/")).await.unwrap();
    assert_eq!(res.status(), 400);
}

#[tokio::test]
async fn test_non_negative_derivative_counter_reset() {
    let (api, _state, _stub) = setup().await;
    let parsed: serde_json::Value = reqwest::get(format!(
        "{api}/render/?target=nonNegativeDerivative(counter)&from=1000&until=1240&format=json"
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let points = parsed[0]["datapoints"].as_array().unwrap();
    assert!(points[0][0].is_null());
    assert_eq!(points[1][0], 2.0);
    assert!(points[2][0].is_null());
    assert_eq!(points[3][0], 3.0);
}

#[tokio::test]
async fn test_query_cache_short_circuits_second_request() {
    let (api, state, stub) = setup().await;
    let url =
        format!("{api}/render/?target=scale(x,2)&from=1000&until=1180&format=json");

    let first = reqwest::get(&url).await.unwrap().text().await.unwrap();
    let finds = stub.finds.load(Ordering::SeqCst);
    let renders = stub.renders.load(Ordering::SeqCst);

    let second = reqwest::get(&url).await.unwrap().text().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(stub.finds.load(Ordering::SeqCst), finds, "no further finds");
    assert_eq!(stub.renders.load(Ordering::SeqCst), renders, "no further renders");
    assert_eq!(state.metrics.snapshot().request_cache_hits, 1);
}

#[tokio::test]
async fn test_no_cache_bypasses_query_cache() {
    let (api, state, stub) = setup().await;
    let url = format!(
        "{api}/render/?target=scale(x,2)&from=1000&until=1180&format=json&noCache=1"
    );
    reqwest::get(&url).await.unwrap();
    reqwest::get(&url).await.unwrap();
    assert_eq!(stub.renders.load(Ordering::SeqCst), 2);
    assert_eq!(state.metrics.snapshot().request_cache_hits, 0);
}

#[tokio::test]
async fn test_find_cache_deduplicates_across_requests() {
    let (api, state, stub) = setup().await;
    let first = format!("{api}/render/?target=scale(x,2)&from=1000&until=1180&format=json");
    let second = format!("{api}/render/?target=scale(x,3)&from=1000&until=1180&format=json");
    reqwest::get(&first).await.unwrap();
    reqwest::get(&second).await.unwrap();
    // The second request has a different cache key but the glob expansion
    // of x is served from the find cache.
    assert_eq!(stub.finds.load(Ordering::SeqCst), 1);
    assert_eq!(state.metrics.snapshot().find_cache_hits, 1);
}

#[tokio::test]
async fn test_empty_time_range_is_a_400() {
    let (api, _state, _stub) = setup().await;
    let res = reqwest::get(format!(
        "{api}/render/?target=a.b&from=1000&until=1000&format=json"
    ))
    .await
    .unwrap();
    assert_eq!(res.status(), 400);
    assert_eq!(res.text().await.unwrap(), "Invalid empty time range");
}

#[tokio::test]
async fn test_parse_error_reports_prefix_and_suffix() {
    let (api, _state, _stub) = setup().await;
    let res = reqwest::get(format!(
        "{api}/render/?target=scale(a.b&from=1000&until=1180&format=json"
    ))
    .await
    .unwrap();
    assert_eq!(res.status(), 400);
    let body = res.text().await.unwrap();
    assert!(body.contains("Target"), "unexpected body: {body}");
}

#[tokio::test]
async fn test_max_data_points_limits_output() {
    let (api, _state, _stub) = setup().await;
    let parsed: serde_json::Value = reqwest::get(format!(
        "{api}/render/?target=x&from=1000&until=1180&format=json&maxDataPoints=1"
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let points = parsed[0]["datapoints"].as_array().unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0][0], 6.0);
    assert_eq!(parsed[0]["target"], "x");
}

#[tokio::test]
async fn test_failed_upstream_drops_series_but_answers() {
    let (api, _state, _stub) = setup().await;
    // Unknown glob: the find succeeds with no matches, the expression sees
    // an empty list, and the response is an empty result set.
    let res = reqwest::get(format!(
        "{api}/render/?target=sumSeries(no.such.metric)&from=1000&until=1180&format=json"
    ))
    .await
    .unwrap();
    assert!(res.status().is_success());
    let parsed: serde_json::Value = res.json().await.unwrap();
    assert_eq!(parsed, serde_json::json!([]));
}

#[tokio::test]
async fn test_lb_check() {
    let (api, _state, _stub) = setup().await;
    let res = reqwest::get(format!("{api}/lb_check")).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "Ok\n");
}

#[tokio::test]
async fn test_info_passthrough() {
    let (api, _state, _stub) = setup().await;
    let res = reqwest::get(format!("{api}/info/?target=a.b")).await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "{\"zipper\":\"stub\"}");
}

#[tokio::test]
async fn test_debug_vars_exposes_counters() {
    let (api, _state, _stub) = setup().await;
    reqwest::get(format!(
        "{api}/render/?target=x&from=1000&until=1180&format=json"
    ))
    .await
    .unwrap();
    let parsed: serde_json::Value = reqwest::get(format!("{api}/debug/vars"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(parsed["requests"], 1);
    assert_eq!(parsed["find_requests"], 1);
    assert_eq!(parsed["render_requests"], 1);
    assert!(parsed["BuildVersion"].is_string());
}

#[tokio::test]
async fn test_cors_preflight() {
    let (api, _state, _stub) = setup().await;
    let client = reqwest::Client::new();
    let res = client
        .request(reqwest::Method::OPTIONS, format!("{api}/render/"))
        .header("Origin", "http://grafana.example")
        .header("Access-Control-Request-Method", "GET")
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success());
    assert_eq!(
        res.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

#[tokio::test]
async fn test_png_answers_not_implemented_without_backend() {
    let (api, _state, _stub) = setup().await;
    let res = reqwest::get(format!("{api}/render/?target=x&from=1000&until=1180"))
        .await
        .unwrap();
    assert_eq!(res.status(), 501);
}

#[tokio::test]
async fn test_jsonp_wrapping() {
    let (api, _state, _stub) = setup().await;
    let res = reqwest::get(format!(
        "{api}/render/?target=x&from=1000&until=1180&format=json&jsonp=cb"
    ))
    .await
    .unwrap();
    assert_eq!(
        res.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("text/javascript")
    );
    let body = res.text().await.unwrap();
    assert!(body.starts_with("cb(["));
    assert!(body.ends_with(")"));
}
