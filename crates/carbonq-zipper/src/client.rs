//! Zipper Client
//!
//! HTTP client for the upstream aggregation layer. Three operations:
//!
//! - `find`: expand a metric glob into concrete paths and namespaces
//! - `render`: fetch the series for one concrete path over a window
//! - `passthrough`: forward a verbatim request-URI and return the raw body
//!
//! Find and render speak protobuf; any non-2xx status or decode failure
//! surfaces as an error and the caller decides whether the request survives.
//! Connections are pooled, with the idle pool sized to half the render
//! concurrency limit.

use carbonq_common::error::{CarbonqError, Result};
use carbonq_common::pb::{FetchResponse, GlobResponse};
use carbonq_common::series::MetricData;

use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

/// Client for the upstream zipper.
#[derive(Clone)]
pub struct ZipperClient {
    base: String,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl ZipperClient {
    /// Creates a client for the zipper at `base` (scheme and authority, no
    /// trailing slash). `concurrency` is the render limiter capacity; the
    /// idle connection pool is sized to half of it.
    pub fn new(base: impl Into<String>, concurrency: usize) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host((concurrency / 2).max(1))
            .build_http();
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base, client }
    }

    /// Expands a metric glob.
    pub async fn find(&self, query: &str) -> Result<GlobResponse> {
        let uri = format!(
            "{}/metrics/find/?format=protobuf&query={}",
            self.base,
            encode(query)
        );
        let body = self.get_bytes(&uri).await?;
        GlobResponse::decode_bytes(&body)
    }

    /// Fetches one concrete metric over `[from, until)`.
    pub async fn render(&self, path: &str, from: i32, until: i32) -> Result<MetricData> {
        let uri = format!(
            "{}/render/?format=protobuf&target={}&from={}&until={}",
            self.base,
            encode(path),
            from,
            until
        );
        let body = self.get_bytes(&uri).await?;
        Ok(FetchResponse::decode_bytes(&body)?.into())
    }

    /// Forwards a verbatim request-URI (path plus query) and returns the raw
    /// response body.
    pub async fn passthrough(&self, request_uri: &str) -> Result<Vec<u8>> {
        let uri = format!("{}{}", self.base, request_uri);
        self.get_bytes(&uri).await
    }

    async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>> {
        let parsed: hyper::Uri = uri
            .parse()
            .map_err(|e| CarbonqError::Http(format!("bad zipper uri {uri}: {e}")))?;
        let req = hyper::Request::builder()
            .method(hyper::Method::GET)
            .uri(parsed)
            .body(Empty::new())
            .map_err(|e| CarbonqError::Http(format!("bad zipper request {uri}: {e}")))?;
        let res = self
            .client
            .request(req)
            .await
            .map_err(|e| CarbonqError::Upstream(format!("{uri}: {e}")))?;
        let status = res.status();
        if !status.is_success() {
            return Err(CarbonqError::Upstream(format!("{uri}: status {status}")));
        }
        let body = res
            .into_body()
            .collect()
            .await
            .map_err(|e| CarbonqError::Upstream(format!("{uri}: {e}")))?
            .to_bytes();
        Ok(body.to_vec())
    }
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let c = ZipperClient::new("http://zipper:8080/", 20);
        assert_eq!(c.base, "http://zipper:8080");
    }

    #[test]
    fn test_query_encoding() {
        assert_eq!(encode("a.b.*"), "a.b.*");
        assert_eq!(encode("a b&c"), "a+b%26c");
    }
}
