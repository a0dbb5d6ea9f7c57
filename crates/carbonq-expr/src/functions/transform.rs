//! Per-series transformations: scaling, derivatives, gap handling, windows
//! and bucketing.

use carbonq_common::error::Result;
use carbonq_common::series::{MetricData, MetricMap};

use crate::parser::{fmt_f64, parse_interval, CallExpr};

pub fn scale(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let factor = call.f64_arg(1)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut out = s.renamed(format!("scale({},{})", s.name, fmt_f64(factor)));
            for v in &mut out.values {
                *v *= factor;
            }
            out
        })
        .collect())
}

/// Rescales rate series to per-`seconds` rates based on each series' step.
pub fn scale_to_seconds(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let seconds = call.i64_arg(1)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let factor = seconds as f64 / s.step_time as f64;
            let mut out = s.renamed(format!("scaleToSeconds({},{})", s.name, seconds));
            for v in &mut out.values {
                *v *= factor;
            }
            out
        })
        .collect())
}

pub fn derivative(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let points: Vec<Option<f64>> = (0..s.values.len())
                .map(|i| {
                    if i == 0 {
                        return None;
                    }
                    match (s.value_at(i - 1), s.value_at(i)) {
                        (Some(prev), Some(cur)) => Some(cur - prev),
                        _ => None,
                    }
                })
                .collect();
            MetricData::from_options(format!("derivative({})", s.name), s.start_time, s.step_time, &points)
        })
        .collect())
}

/// Like `derivative` but counter-aware: a negative delta reads as a counter
/// reset and the slot is absent.
pub fn non_negative_derivative(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let points: Vec<Option<f64>> = (0..s.values.len())
                .map(|i| {
                    if i == 0 {
                        return None;
                    }
                    match (s.value_at(i - 1), s.value_at(i)) {
                        (Some(prev), Some(cur)) if cur >= prev => Some(cur - prev),
                        _ => None,
                    }
                })
                .collect();
            MetricData::from_options(
                format!("nonNegativeDerivative({})", s.name),
                s.start_time,
                s.step_time,
                &points,
            )
        })
        .collect())
}

pub fn logarithm(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let base = call.f64_arg_default(1, 10.0)?;
    let with_base = call.args.len() > 1;
    Ok(series
        .into_iter()
        .map(|s| {
            let name = if with_base {
                format!("logarithm({},{})", s.name, fmt_f64(base))
            } else {
                format!("logarithm({})", s.name)
            };
            let points: Vec<Option<f64>> = (0..s.values.len())
                .map(|i| match s.value_at(i) {
                    Some(v) if v > 0.0 => Some(v.ln() / base.ln()),
                    _ => None,
                })
                .collect();
            MetricData::from_options(name, s.start_time, s.step_time, &points)
        })
        .collect())
}

/// Fills gaps with the last seen value. Gaps longer than `limit` points are
/// left alone; the default limit is unbounded.
pub fn keep_last_value(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let limit = call.i64_arg_default(1, -1)?;
    let limit = if limit < 0 { usize::MAX } else { limit as usize };
    Ok(series
        .into_iter()
        .map(|s| {
            let mut out = s.renamed(format!("keepLastValue({})", s.name));
            let mut run = 0usize;
            let mut last: Option<f64> = None;
            for i in 0..out.values.len() {
                if out.is_absent[i] {
                    run += 1;
                    continue;
                }
                if run > 0 && run <= limit {
                    if let Some(v) = last {
                        for j in i - run..i {
                            out.values[j] = v;
                            out.is_absent[j] = false;
                        }
                    }
                }
                run = 0;
                last = Some(out.values[i]);
            }
            if run > 0 && run <= limit {
                if let Some(v) = last {
                    let n = out.values.len();
                    for j in n - run..n {
                        out.values[j] = v;
                        out.is_absent[j] = false;
                    }
                }
            }
            out
        })
        .collect())
}

pub fn transform_null(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let default = call.f64_arg_default(1, 0.0)?;
    let with_default = call.args.len() > 1;
    Ok(series
        .into_iter()
        .map(|s| {
            let name = if with_default {
                format!("transformNull({},{})", s.name, fmt_f64(default))
            } else {
                format!("transformNull({})", s.name)
            };
            let mut out = s.renamed(name);
            for i in 0..out.values.len() {
                if out.is_absent[i] {
                    out.values[i] = default;
                    out.is_absent[i] = false;
                }
            }
            out
        })
        .collect())
}

/// Fetches the underlying series from a shifted window and re-labels it onto
/// the request window.
pub fn time_shift(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let shift_str = call.str_arg(1)?.to_owned();
    let offset = parse_interval(&shift_str, -1)?;
    let series = call.series_arg(0, from + offset, until + offset, map)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut out = s.renamed(format!("timeShift({},\"{}\")", s.name, shift_str));
            out.start_time -= offset;
            out.stop_time -= offset;
            out
        })
        .collect())
}

/// Mean over a sliding window of `n` points ending at each index. The first
/// `n-1` slots are absent.
pub fn moving_average(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let n = call.i64_arg(1)?.max(1) as usize;
    Ok(series
        .into_iter()
        .map(|s| windowed(&s, n, format!("movingAverage({},{})", s.name, n), |w| {
            w.iter().sum::<f64>() / w.len() as f64
        }))
        .collect())
}

/// Population standard deviation over a sliding window of `n` points.
pub fn stdev(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let n = call.i64_arg(1)?.max(1) as usize;
    Ok(series
        .into_iter()
        .map(|s| {
            windowed(&s, n, format!("stdev({},{})", s.name, n), |w| {
                let mean = w.iter().sum::<f64>() / w.len() as f64;
                (w.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / w.len() as f64).sqrt()
            })
        })
        .collect())
}

fn windowed(s: &MetricData, n: usize, name: String, f: impl Fn(&[f64]) -> f64) -> MetricData {
    let points: Vec<Option<f64>> = (0..s.values.len())
        .map(|i| {
            if i + 1 < n {
                return None;
            }
            let window: Vec<f64> = (i + 1 - n..=i).filter_map(|j| s.value_at(j)).collect();
            if window.is_empty() {
                None
            } else {
                Some(f(&window))
            }
        })
        .collect();
    MetricData::from_options(name, s.start_time, s.step_time, &points)
}

/// Buckets each series into `interval`-second spans reduced by `func`.
///
/// Buckets are aligned to epoch multiples of the interval unless
/// `alignToFrom` is set, in which case they start at the series start.
pub fn summarize(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let interval_str = call.str_arg(1)?.to_owned();
    let bucket = parse_interval(&interval_str, 1)?;
    if bucket <= 0 {
        return Err(carbonq_common::CarbonqError::BadArgument(format!(
            "summarize: non-positive interval {interval_str:?}"
        )));
    }
    let func_expr = call.named.get("func").or_else(|| call.args.get(2));
    let func = match func_expr {
        Some(e) => e.as_str()?.to_owned(),
        None => "sum".to_owned(),
    };
    let align = call.bool_arg_default(3, "alignToFrom", false)?;

    let mut out = Vec::with_capacity(series.len());
    for s in series {
        let start = if align {
            s.start_time
        } else {
            s.start_time - s.start_time.rem_euclid(bucket)
        };
        let mut points = Vec::new();
        let mut t = start;
        while t < s.stop_time {
            let present: Vec<f64> = (0..s.values.len())
                .filter(|&i| {
                    let ts = s.start_time + i as i32 * s.step_time;
                    ts >= t && ts < t + bucket
                })
                .filter_map(|i| s.value_at(i))
                .collect();
            points.push(reduce_bucket(&func, &present)?);
            t += bucket;
        }
        let mut name = format!("summarize({},\"{}\"", s.name, interval_str);
        if func_expr.is_some() {
            name.push_str(&format!(",\"{func}\""));
        }
        if align {
            name.push_str(",true");
        }
        name.push(')');
        out.push(MetricData::from_options(name, start, bucket, &points));
    }
    Ok(out)
}

fn reduce_bucket(func: &str, present: &[f64]) -> Result<Option<f64>> {
    if present.is_empty() {
        return Ok(None);
    }
    let v = match func {
        "sum" => present.iter().sum(),
        "avg" | "average" => present.iter().sum::<f64>() / present.len() as f64,
        "last" => present[present.len() - 1],
        "max" => present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "min" => present.iter().copied().fold(f64::INFINITY, f64::min),
        other => {
            return Err(carbonq_common::CarbonqError::BadArgument(format!(
                "summarize: unknown function {other:?}"
            )))
        }
    };
    Ok(Some(v))
}

/// Replaces the metric name with a slice of its dot-separated components.
pub fn substr(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let start = call.i64_arg_default(1, 0)?;
    let stop = call.i64_arg_default(2, 0)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let fields: Vec<&str> = s.name.split('.').collect();
            let len = fields.len() as i64;
            let lo = if start < 0 { start + len } else { start }.clamp(0, len) as usize;
            let hi = if stop == 0 {
                fields.len()
            } else {
                (if stop < 0 { stop + len } else { stop }).clamp(lo as i64, len) as usize
            };
            let name = fields[lo..hi].join(".");
            s.renamed(name)
        })
        .collect())
}

/// Consolidation wrapper: caps the rendered point count per series. The
/// render handler injects this around each target when the client passes
/// `maxDataPoints`.
pub fn max_data_points(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let mut series = call.series_arg(0, from, until, map)?;
    let limit = call.i64_arg(1)?.max(1) as usize;
    for s in &mut series {
        s.consolidate(limit);
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::eval_expr;
    use crate::parser::parse;
    use carbonq_common::series::MetricRequest;
    use std::collections::HashMap;

    fn window() -> (i32, i32) {
        (0, 240)
    }

    fn map_with(name: &str, series: MetricData) -> MetricMap {
        let (from, until) = window();
        let mut map = HashMap::new();
        map.insert(
            MetricRequest { metric: name.into(), from, until },
            vec![series],
        );
        map
    }

    fn eval(target: &str, map: &MetricMap) -> Vec<MetricData> {
        let (e, rest) = parse(target).unwrap();
        assert_eq!(rest, "");
        let (from, until) = window();
        eval_expr(&e, from, until, map).unwrap()
    }

    #[test]
    fn test_scale() {
        let map = map_with("x", MetricData::new("x", 0, 60, vec![1.0, 2.0], vec![false; 2]));
        let out = eval("scale(x,2.5)", &map);
        assert_eq!(out[0].name, "scale(x,2.5)");
        assert_eq!(out[0].values, vec![2.5, 5.0]);
    }

    #[test]
    fn test_scale_by_one_is_identity() {
        let map = map_with(
            "x",
            MetricData::from_options("x", 0, 60, &[Some(1.0), None, Some(3.0)]),
        );
        let out = eval("scale(x,1)", &map);
        assert_eq!(out[0].values[0], 1.0);
        assert!(out[0].is_absent[1]);
        assert_eq!(out[0].values[2], 3.0);
        assert_eq!(out[0].start_time, 0);
        assert_eq!(out[0].step_time, 60);
    }

    #[test]
    fn test_scale_to_seconds() {
        let map = map_with("x", MetricData::new("x", 0, 60, vec![60.0, 120.0], vec![false; 2]));
        let out = eval("scaleToSeconds(x,1)", &map);
        assert_eq!(out[0].values, vec![1.0, 2.0]);
        assert_eq!(out[0].name, "scaleToSeconds(x,1)");
    }

    #[test]
    fn test_derivative() {
        let map = map_with("x", MetricData::new("x", 0, 60, vec![1.0, 4.0, 2.0], vec![false; 3]));
        let out = eval("derivative(x)", &map);
        assert!(out[0].is_absent[0]);
        assert_eq!(out[0].values[1], 3.0);
        assert_eq!(out[0].values[2], -2.0);
    }

    #[test]
    fn test_non_negative_derivative_counter_reset() {
        let map = map_with(
            "counter",
            MetricData::new("counter", 0, 60, vec![1.0, 3.0, 2.0, 5.0], vec![false; 4]),
        );
        let out = eval("nonNegativeDerivative(counter)", &map);
        assert_eq!(out[0].is_absent, vec![true, false, true, false]);
        assert_eq!(out[0].values[1], 2.0);
        assert_eq!(out[0].values[3], 3.0);
        assert!(out[0].values[0].is_nan());
        assert!(out[0].values[2].is_nan());
    }

    #[test]
    fn test_logarithm() {
        let map = map_with(
            "x",
            MetricData::from_options("x", 0, 60, &[Some(100.0), Some(0.0), Some(-3.0), None]),
        );
        let out = eval("logarithm(x)", &map);
        assert!((out[0].values[0] - 2.0).abs() < 1e-9);
        assert!(out[0].is_absent[1]);
        assert!(out[0].is_absent[2]);
        assert!(out[0].is_absent[3]);
    }

    #[test]
    fn test_keep_last_value() {
        let map = map_with(
            "x",
            MetricData::from_options("x", 0, 60, &[Some(1.0), None, None, Some(4.0), None]),
        );
        let out = eval("keepLastValue(x)", &map);
        assert_eq!(out[0].values, vec![1.0, 1.0, 1.0, 4.0, 4.0]);
        assert_eq!(out[0].is_absent, vec![false; 5]);
    }

    #[test]
    fn test_keep_last_value_respects_limit() {
        let map = map_with(
            "x",
            MetricData::from_options("x", 0, 60, &[Some(1.0), None, None, Some(4.0)]),
        );
        let out = eval("keepLastValue(x,1)", &map);
        assert!(out[0].is_absent[1]);
        assert!(out[0].is_absent[2]);
    }

    #[test]
    fn test_transform_null() {
        let map = map_with("x", MetricData::from_options("x", 0, 60, &[Some(1.0), None]));
        let out = eval("transformNull(x)", &map);
        assert_eq!(out[0].values, vec![1.0, 0.0]);
        assert_eq!(out[0].is_absent, vec![false, false]);

        let out = eval("transformNull(x,-1)", &map);
        assert_eq!(out[0].values[1], -1.0);
        assert_eq!(out[0].name, "transformNull(x,-1)");
    }

    #[test]
    fn test_time_shift_fetches_shifted_window() {
        let mut map = HashMap::new();
        map.insert(
            MetricRequest { metric: "x".into(), from: -3600, until: 240 - 3600 },
            vec![MetricData::new("x", -3600, 60, vec![7.0, 8.0], vec![false; 2])],
        );
        let out = eval("timeShift(x,\"-1h\")", &map);
        assert_eq!(out[0].name, "timeShift(x,\"-1h\")");
        assert_eq!(out[0].start_time, 0);
        assert_eq!(out[0].values, vec![7.0, 8.0]);
    }

    #[test]
    fn test_time_shift_zero_is_identity() {
        let map = map_with("x", MetricData::new("x", 0, 60, vec![1.0, 2.0], vec![false; 2]));
        let out = eval("timeShift(x,\"0s\")", &map);
        assert_eq!(out[0].start_time, 0);
        assert_eq!(out[0].values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_moving_average_leading_absents() {
        let map = map_with(
            "x",
            MetricData::new("x", 0, 60, vec![1.0, 2.0, 3.0, 4.0], vec![false; 4]),
        );
        let out = eval("movingAverage(x,2)", &map);
        assert!(out[0].is_absent[0]);
        assert_eq!(out[0].values[1], 1.5);
        assert_eq!(out[0].values[2], 2.5);
        assert_eq!(out[0].values[3], 3.5);
    }

    #[test]
    fn test_stdev_window() {
        let map = map_with(
            "x",
            MetricData::new("x", 0, 60, vec![2.0, 4.0, 4.0], vec![false; 3]),
        );
        let out = eval("stdev(x,2)", &map);
        assert!(out[0].is_absent[0]);
        assert_eq!(out[0].values[1], 1.0);
        assert_eq!(out[0].values[2], 0.0);
    }

    #[test]
    fn test_summarize_sum() {
        let map = map_with(
            "x",
            MetricData::new("x", 0, 60, vec![1.0, 2.0, 3.0, 4.0], vec![false; 4]),
        );
        let out = eval("summarize(x,\"2min\")", &map);
        assert_eq!(out[0].name, "summarize(x,\"2min\")");
        assert_eq!(out[0].values, vec![3.0, 7.0]);
        assert_eq!(out[0].step_time, 120);
    }

    #[test]
    fn test_summarize_epoch_alignment() {
        // Series starts off an interval boundary; the first bucket snaps back.
        let map = map_with(
            "x",
            MetricData::new("x", 60, 60, vec![1.0, 2.0, 3.0], vec![false; 3]),
        );
        let out = eval("summarize(x,\"2min\")", &map);
        assert_eq!(out[0].start_time, 0);
        assert_eq!(out[0].values, vec![1.0, 5.0]);
    }

    #[test]
    fn test_summarize_align_to_from() {
        let map = map_with(
            "x",
            MetricData::new("x", 60, 60, vec![1.0, 2.0, 3.0], vec![false; 3]),
        );
        let out = eval("summarize(x,\"2min\",\"sum\",true)", &map);
        assert_eq!(out[0].start_time, 60);
        assert_eq!(out[0].values, vec![3.0, 3.0]);
        assert_eq!(out[0].name, "summarize(x,\"2min\",\"sum\",true)");
    }

    #[test]
    fn test_summarize_reducers() {
        let map = map_with(
            "x",
            MetricData::new("x", 0, 60, vec![1.0, 4.0], vec![false; 2]),
        );
        assert_eq!(eval("summarize(x,\"2min\",\"max\")", &map)[0].values, vec![4.0]);
        assert_eq!(eval("summarize(x,\"2min\",\"min\")", &map)[0].values, vec![1.0]);
        assert_eq!(eval("summarize(x,\"2min\",\"last\")", &map)[0].values, vec![4.0]);
        assert_eq!(eval("summarize(x,\"2min\",\"avg\")", &map)[0].values, vec![2.5]);
    }

    #[test]
    fn test_substr() {
        let map = map_with(
            "a.b.c.d",
            MetricData::new("a.b.c.d", 0, 60, vec![1.0], vec![false]),
        );
        assert_eq!(eval("substr(a.b.c.d,1,3)", &map)[0].name, "b.c");
        assert_eq!(eval("substr(a.b.c.d,2)", &map)[0].name, "c.d");
    }

    #[test]
    fn test_max_data_points_consolidates() {
        let map = map_with(
            "x",
            MetricData::new("x", 0, 60, (0..100).map(|i| i as f64).collect(), vec![false; 100]),
        );
        let out = eval("maxDataPoints(x,10)", &map);
        assert_eq!(out[0].name, "x");
        assert!(out[0].aggregated_values().len() <= 10);

        let out = eval("maxDataPoints(x,1)", &map);
        assert_eq!(out[0].aggregated_values().len(), 1);
    }
}
