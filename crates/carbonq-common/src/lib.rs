//! carbonq Common Types
//!
//! Shared infrastructure for the carbonq query pipeline:
//!
//! - [`series`] - the time-series data model ([`MetricData`],
//!   [`MetricRequest`]) and viewport consolidation
//! - [`pb`] - the protobuf wire messages exchanged with the zipper
//! - [`cache`] - the advisory bytes cache (null / in-memory / memcached) and
//!   cache-key normalization
//! - [`limiter`] - the process-wide render concurrency cap
//! - [`timeparse`] - `from`/`until` parameter parsing
//! - [`error`] - the shared error type
//!
//! Everything here is consumed by the expression engine, the zipper client
//! and the HTTP surface; nothing in this crate talks to the network except
//! the memcached cache variant.

pub mod cache;
pub mod error;
pub mod limiter;
pub mod pb;
pub mod series;
pub mod timeparse;

pub use cache::BytesCache;
pub use error::{CarbonqError, Result};
pub use limiter::Limiter;
pub use series::{MetricData, MetricMap, MetricRequest};
