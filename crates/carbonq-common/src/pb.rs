//! Zipper Wire Format
//!
//! Protobuf messages exchanged with the upstream zipper, declared by hand
//! with `prost` derives so no protoc step is needed at build time. The
//! schema is proto2: scalar fields are `required` and repeated fields are
//! encoded unpacked, which keeps the bytes identical to what the deployed
//! zipper produces and consumes.

use crate::error::Result;
use crate::series::MetricData;
use prost::Message;

/// One fetched series as it appears on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct FetchResponse {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(int32, required, tag = "2")]
    pub start_time: i32,
    #[prost(int32, required, tag = "3")]
    pub stop_time: i32,
    #[prost(int32, required, tag = "4")]
    pub step_time: i32,
    #[prost(double, repeated, packed = "false", tag = "5")]
    pub values: Vec<f64>,
    #[prost(bool, repeated, packed = "false", tag = "6")]
    pub is_absent: Vec<bool>,
}

/// Render response body for the protobuf output format.
#[derive(Clone, PartialEq, Message)]
pub struct MultiFetchResponse {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<FetchResponse>,
}

/// One glob-expansion result: a concrete path and whether it is fetchable.
#[derive(Clone, PartialEq, Message)]
pub struct GlobMatch {
    #[prost(string, required, tag = "1")]
    pub path: String,
    #[prost(bool, required, tag = "2")]
    pub is_leaf: bool,
}

/// Find response: the original query plus its matches.
#[derive(Clone, PartialEq, Message)]
pub struct GlobResponse {
    #[prost(string, required, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub matches: Vec<GlobMatch>,
}

impl FetchResponse {
    pub fn decode_bytes(buf: &[u8]) -> Result<Self> {
        Ok(FetchResponse::decode(buf)?)
    }
}

impl GlobResponse {
    pub fn decode_bytes(buf: &[u8]) -> Result<Self> {
        Ok(GlobResponse::decode(buf)?)
    }
}

impl From<FetchResponse> for MetricData {
    fn from(r: FetchResponse) -> Self {
        let mut out = MetricData::new("", r.start_time, r.step_time, r.values, r.is_absent);
        out.name = r.name;
        out.stop_time = r.stop_time;
        out
    }
}

impl From<&MetricData> for FetchResponse {
    fn from(s: &MetricData) -> Self {
        FetchResponse {
            name: s.name.clone(),
            start_time: s.start_time,
            stop_time: s.stop_time,
            step_time: s.step_time,
            values: s.values.clone(),
            is_absent: s.is_absent.clone(),
        }
    }
}
