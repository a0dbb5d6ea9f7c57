//! carbonq Zipper Client
//!
//! HTTP client for the upstream zipper, the aggregation layer that fans
//! queries out to storage nodes and merges the results. See [`client`].

pub mod client;

pub use client::ZipperClient;
