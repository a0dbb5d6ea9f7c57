//! Response Encoders
//!
//! Serializers from evaluated series to the supported output formats. JSON
//! output consolidates through each series' `maxDataPoints` setting; the
//! text formats emit raw samples.

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use carbonq_common::series::MetricData;
use chrono::{DateTime, FixedOffset, Utc};
use prost::Message;
use serde_json::json;

use carbonq_common::pb::MultiFetchResponse;

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
pub const CONTENT_TYPE_JAVASCRIPT: &str = "text/javascript";
pub const CONTENT_TYPE_RAW: &str = "text/plain";
pub const CONTENT_TYPE_PICKLE: &str = "application/pickle";
pub const CONTENT_TYPE_PNG: &str = "image/png";
pub const CONTENT_TYPE_CSV: &str = "text/csv";

/// Builds the HTTP response for an encoded body, applying the content-type
/// table and JSONP wrapping.
pub fn write_response(format: &str, jsonp: &str, body: Vec<u8>) -> Response {
    let (content_type, body) = match format {
        "json" if !jsonp.is_empty() => {
            let mut wrapped = Vec::with_capacity(body.len() + jsonp.len() + 2);
            wrapped.extend_from_slice(jsonp.as_bytes());
            wrapped.push(b'(');
            wrapped.extend_from_slice(&body);
            wrapped.push(b')');
            (CONTENT_TYPE_JAVASCRIPT, wrapped)
        }
        "json" => (CONTENT_TYPE_JSON, body),
        "protobuf" => (CONTENT_TYPE_PROTOBUF, body),
        "raw" => (CONTENT_TYPE_RAW, body),
        "pickle" => (CONTENT_TYPE_PICKLE, body),
        "csv" => (CONTENT_TYPE_CSV, body),
        "png" => (CONTENT_TYPE_PNG, body),
        _ => ("application/octet-stream", body),
    };
    ([(CONTENT_TYPE, content_type)], body).into_response()
}

/// `[{"target": name, "datapoints": [[value|null, timestamp], ...]}, ...]`
/// over the consolidated values.
pub fn marshal_json(results: &[MetricData]) -> Vec<u8> {
    let out: Vec<serde_json::Value> = results
        .iter()
        .map(|s| {
            let step = s.aggregated_time_step();
            let values = s.aggregated_values();
            let absent = s.aggregated_absent();
            let datapoints: Vec<serde_json::Value> = values
                .iter()
                .zip(absent)
                .enumerate()
                .map(|(i, (v, a))| {
                    let t = s.start_time + i as i32 * step;
                    if *a || v.is_nan() {
                        json!([serde_json::Value::Null, t])
                    } else {
                        json!([v, t])
                    }
                })
                .collect();
            json!({"target": s.name, "datapoints": datapoints})
        })
        .collect();
    serde_json::to_vec(&out).unwrap_or_default()
}

/// One series per line: `name,start,stop,step|v1,v2,...` with `None` for
/// absent samples.
pub fn marshal_raw(results: &[MetricData]) -> Vec<u8> {
    let mut out = String::new();
    for s in results {
        out.push_str(&format!(
            "{},{},{},{}|",
            s.name, s.start_time, s.stop_time, s.step_time
        ));
        for i in 0..s.values.len() {
            if i > 0 {
                out.push(',');
            }
            match s.value_at(i) {
                Some(v) => out.push_str(&format_value(v)),
                None => out.push_str("None"),
            }
        }
        out.push('\n');
    }
    out.into_bytes()
}

/// One row per sample: `"name",timestamp,value` with an empty value for
/// absent samples. Timestamps render in the configured fixed zone, UTC
/// otherwise.
pub fn marshal_csv(results: &[MetricData], tz: Option<FixedOffset>) -> Vec<u8> {
    let mut out = String::new();
    for s in results {
        for i in 0..s.values.len() {
            let t = (s.start_time + i as i32 * s.step_time) as i64;
            let stamp = match tz {
                Some(tz) => DateTime::<Utc>::from_timestamp(t, 0)
                    .map(|dt| dt.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()),
                None => DateTime::<Utc>::from_timestamp(t, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string()),
            }
            .unwrap_or_default();
            out.push_str(&format!("\"{}\",{},", s.name, stamp));
            if let Some(v) = s.value_at(i) {
                out.push_str(&format_value(v));
            }
            out.push('\n');
        }
    }
    out.into_bytes()
}

/// Wire-format body: a `MultiFetchResponse` over the raw samples.
pub fn marshal_protobuf(results: &[MetricData]) -> Vec<u8> {
    let msg = MultiFetchResponse {
        metrics: results.iter().map(Into::into).collect(),
    };
    msg.encode_to_vec()
}

fn format_value(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series() -> MetricData {
        MetricData::from_options("a.b", 60, 60, &[Some(1.0), None, Some(3.5)])
    }

    #[test]
    fn test_marshal_json() {
        let body = marshal_json(&[series()]);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed[0]["target"], "a.b");
        assert_eq!(parsed[0]["datapoints"][0][0], 1.0);
        assert_eq!(parsed[0]["datapoints"][0][1], 60);
        assert!(parsed[0]["datapoints"][1][0].is_null());
        assert_eq!(parsed[0]["datapoints"][2][0], 3.5);
        assert_eq!(parsed[0]["datapoints"][2][1], 180);
    }

    #[test]
    fn test_marshal_json_uses_consolidation() {
        let mut s = MetricData::new("m", 0, 60, vec![1.0, 3.0, 5.0, 7.0], vec![false; 4]);
        s.consolidate(2);
        let body = marshal_json(&[s]);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let points = parsed[0]["datapoints"].as_array().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0][0], 2.0);
        assert_eq!(points[1][0], 6.0);
        assert_eq!(points[1][1], 120);
    }

    #[test]
    fn test_marshal_raw() {
        let body = String::from_utf8(marshal_raw(&[series()])).unwrap();
        assert_eq!(body, "a.b,60,240,60|1,None,3.5\n");
    }

    #[test]
    fn test_marshal_csv() {
        let body = String::from_utf8(marshal_csv(&[series()], None)).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "\"a.b\",1970-01-01 00:01:00,1");
        assert_eq!(lines[1], "\"a.b\",1970-01-01 00:02:00,");
        assert_eq!(lines[2], "\"a.b\",1970-01-01 00:03:00,3.5");
    }

    #[test]
    fn test_marshal_csv_fixed_zone() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let body = String::from_utf8(marshal_csv(&[series()], Some(tz))).unwrap();
        assert!(body.starts_with("\"a.b\",1970-01-01 01:01:00,1\n"));
    }

    #[test]
    fn test_marshal_protobuf_round_trips() {
        let body = marshal_protobuf(&[series()]);
        let decoded = MultiFetchResponse::decode(body.as_slice()).unwrap();
        assert_eq!(decoded.metrics.len(), 1);
        assert_eq!(decoded.metrics[0].name, "a.b");
        assert_eq!(decoded.metrics[0].is_absent, vec![false, true, false]);
    }

    #[test]
    fn test_write_response_content_types() {
        for (format, want) in [
            ("json", CONTENT_TYPE_JSON),
            ("protobuf", CONTENT_TYPE_PROTOBUF),
            ("raw", CONTENT_TYPE_RAW),
            ("pickle", CONTENT_TYPE_PICKLE),
            ("csv", CONTENT_TYPE_CSV),
            ("png", CONTENT_TYPE_PNG),
        ] {
            let res = write_response(format, "", b"x".to_vec());
            assert_eq!(res.headers().get(CONTENT_TYPE).unwrap(), want, "format {format}");
        }
    }

    #[test]
    fn test_jsonp_wrapping() {
        let res = write_response("json", "cb", b"[]".to_vec());
        assert_eq!(res.headers().get(CONTENT_TYPE).unwrap(), CONTENT_TYPE_JAVASCRIPT);
    }
}
