//! HTTP Surface
//!
//! The axum application: render and find endpoints (with and without the
//! trailing slash), the `/info` passthrough, the load-balancer check, the
//! counter debug endpoint, and a fallback reverse proxy to the co-located
//! web front-end. CORS answers every origin and allows GET, POST and
//! OPTIONS.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use carbonq_common::error::{CarbonqError, Result};

use crate::state::AppState;
use crate::{find, render};

/// The query API server.
pub struct HttpServer {
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Builds the application router. Exposed so tests can drive the full
    /// surface against an ephemeral listener.
    pub fn router(state: Arc<AppState>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

        Router::new()
            .route("/render", get(render::handle))
            .route("/render/", get(render::handle))
            .route("/metrics/find", get(find::handle))
            .route("/metrics/find/", get(find::handle))
            .route("/info", get(passthrough))
            .route("/info/", get(passthrough))
            .route("/lb_check", get(lb_check))
            .route("/debug/vars", get(debug_vars))
            .fallback(proxy)
            .layer(cors)
            .with_state(state)
    }

    /// Binds and serves until the process exits.
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let app = Self::router(self.state);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CarbonqError::Http(format!("failed to bind to {addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| CarbonqError::Http(format!("failed to get local addr: {e}")))?;
        tracing::info!("listening on {local}");
        axum::serve(listener, app)
            .await
            .map_err(|e| CarbonqError::Http(format!("server error: {e}")))?;
        Ok(())
    }
}

async fn lb_check() -> &'static str {
    "Ok\n"
}

/// Counter snapshot as flat JSON, plus build metadata.
async fn debug_vars(State(state): State<Arc<AppState>>) -> Response {
    let mut vars = serde_json::to_value(state.metrics.snapshot()).unwrap_or_default();
    if let Some(obj) = vars.as_object_mut() {
        obj.insert("BuildVersion".into(), env!("CARGO_PKG_VERSION").into());
        obj.insert("uptime_ms".into(), state.metrics.uptime_ms().into());
    }
    axum::Json(vars).into_response()
}

/// Forwards the verbatim request-URI to the zipper and relays its body.
async fn passthrough(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let request_uri = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/info/");
    match state.zipper.passthrough(request_uri).await {
        Ok(body) => body.into_response(),
        Err(e) => {
            tracing::error!("passthrough: {request_uri}: {e}");
            (StatusCode::BAD_REQUEST, "Bad Request").into_response()
        }
    }
}

/// Reverse proxy for everything else, aimed at the co-located front-end.
async fn proxy(State(state): State<Arc<AppState>>, req: axum::extract::Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    let target = format!("{}{}", state.frontend.trim_end_matches('/'), path_and_query);
    let Ok(uri) = target.parse::<hyper::Uri>() else {
        return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
    };

    let method = req.method().clone();
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::error!("proxy: failed to read request body: {e}");
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build_http();
    let forwarded = match hyper::Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(body))
    {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("proxy: failed to build request: {e}");
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    match client.request(forwarded).await {
        Ok(res) => {
            let (parts, body) = res.into_parts();
            match body.collect().await {
                Ok(collected) => Response::from_parts(parts, Body::from(collected.to_bytes())),
                Err(e) => {
                    tracing::error!("proxy: failed to read upstream body: {e}");
                    (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
                }
            }
        }
        Err(e) => {
            tracing::error!("proxy: {target}: {e}");
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carbonq_zipper::ZipperClient;

    #[tokio::test]
    async fn test_router_builds() {
        let state = AppState::new(ZipperClient::new("http://127.0.0.1:1", 20));
        let _router = HttpServer::router(Arc::new(state));
    }

    #[tokio::test]
    async fn test_lb_check_body() {
        assert_eq!(lb_check().await, "Ok\n");
    }
}
