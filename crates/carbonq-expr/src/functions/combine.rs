//! Functions that fold several series into one (or one per group).

use std::collections::BTreeMap;

use carbonq_common::error::{CarbonqError, Result};
use carbonq_common::series::{MetricData, MetricMap};

use crate::eval::{combine, normalize, percentile};
use crate::parser::CallExpr;

fn mean(vs: &[f64]) -> f64 {
    vs.iter().sum::<f64>() / vs.len() as f64
}

fn fold_max(vs: &[f64]) -> f64 {
    vs.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn fold_min(vs: &[f64]) -> f64 {
    vs.iter().copied().fold(f64::INFINITY, f64::min)
}

fn stddev(vs: &[f64]) -> f64 {
    let m = mean(vs);
    (vs.iter().map(|v| (v - m).powi(2)).sum::<f64>() / vs.len() as f64).sqrt()
}

/// Resolves an aggregation callback name for `groupByNode`.
fn reducer_for(name: &str) -> Result<fn(&[f64]) -> f64> {
    match name {
        "sum" | "sumSeries" => Ok(|vs| vs.iter().sum()),
        "avg" | "average" | "averageSeries" => Ok(mean),
        "max" | "maxSeries" => Ok(fold_max),
        "min" | "minSeries" => Ok(fold_min),
        other => Err(CarbonqError::BadArgument(format!(
            "unsupported aggregation callback: {other}"
        ))),
    }
}

pub fn sum_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    Ok(combine(
        format!("sumSeries({})", call.arg_string),
        &series,
        |vs| vs.iter().sum(),
    ))
}

pub fn average_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    Ok(combine(
        format!("averageSeries({})", call.arg_string),
        &series,
        mean,
    ))
}

pub fn max_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    Ok(combine(format!("maxSeries({})", call.arg_string), &series, fold_max))
}

pub fn min_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    Ok(combine(format!("minSeries({})", call.arg_string), &series, fold_min))
}

pub fn stddev_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    Ok(combine(format!("stddevSeries({})", call.arg_string), &series, stddev))
}

pub fn range_of_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    Ok(combine(
        format!("rangeOfSeries({})", call.arg_string),
        &series,
        |vs| fold_max(vs) - fold_min(vs),
    ))
}

/// First series minus the sum of the rest. Absent values subtract as zero;
/// a slot is absent only when every input is absent there.
pub fn diff_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    if series.is_empty() {
        return Ok(vec![]);
    }
    let (norm, start, _stop, step) = normalize(&series);
    let n = norm[0].values.len();
    let mut points = Vec::with_capacity(n);
    for i in 0..n {
        if norm.iter().all(|s| s.is_absent[i]) {
            points.push(None);
            continue;
        }
        let head = norm[0].value_at(i).unwrap_or(0.0);
        let rest: f64 = norm[1..].iter().filter_map(|s| s.value_at(i)).sum();
        points.push(Some(head - rest));
    }
    Ok(vec![MetricData::from_options(
        format!("diffSeries({})", call.arg_string),
        start,
        step,
        &points,
    )])
}

/// Per-point product. Any absent input makes the slot absent.
pub fn multiply_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_args(from, until, map)?;
    if series.is_empty() {
        return Ok(vec![]);
    }
    let (norm, start, _stop, step) = normalize(&series);
    let n = norm[0].values.len();
    let mut points = Vec::with_capacity(n);
    for i in 0..n {
        if norm.iter().any(|s| s.is_absent[i]) {
            points.push(None);
        } else {
            points.push(Some(norm.iter().map(|s| s.values[i]).product()));
        }
    }
    Ok(vec![MetricData::from_options(
        format!("multiplySeries({})", call.arg_string),
        start,
        step,
        &points,
    )])
}

/// Divides each series of the first argument by the first series of the
/// second. Division by zero and absent inputs read as absent.
pub fn divide_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let dividends = call.series_arg(0, from, until, map)?;
    let divisors = call.series_arg(1, from, until, map)?;
    let Some(divisor) = divisors.into_iter().next() else {
        return Ok(vec![]);
    };

    let mut out = Vec::with_capacity(dividends.len());
    for dividend in dividends {
        let (norm, start, _stop, step) = normalize(&[dividend, divisor.clone()]);
        let n = norm[0].values.len();
        let mut points = Vec::with_capacity(n);
        for i in 0..n {
            match (norm[0].value_at(i), norm[1].value_at(i)) {
                (Some(a), Some(b)) if b != 0.0 => points.push(Some(a / b)),
                _ => points.push(None),
            }
        }
        out.push(MetricData::from_options(
            format!("divideSeries({},{})", norm[0].name, norm[1].name),
            start,
            step,
            &points,
        ));
    }
    Ok(out)
}

/// At each time index, the nth percentile across the list.
pub fn percentile_of_series(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let p = call.f64_arg(1)?;
    Ok(combine(
        format!("percentileOfSeries({})", call.arg_string),
        &series,
        move |vs| {
            let mut vals = vs.to_vec();
            // vs is never empty here.
            percentile(&mut vals, p).unwrap_or(f64::NAN)
        },
    ))
}

/// Concatenates its arguments into one list.
pub fn group(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    call.series_args(from, until, map)
}

/// Groups series by one name component and aggregates each group.
pub fn group_by_node(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let node = call.i64_arg(1)?;
    let callback = call.str_arg(2)?;
    let reducer = reducer_for(callback)?;

    let mut groups: BTreeMap<String, Vec<MetricData>> = BTreeMap::new();
    for s in series {
        let key = name_node(&s.name, node).unwrap_or_default();
        groups.entry(key).or_default().push(s);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        out.extend(combine(key, &members, reducer));
    }
    Ok(out)
}

/// The `node`th dot-separated component of a metric name. Negative indices
/// count from the end.
pub(crate) fn name_node(name: &str, node: i64) -> Option<String> {
    let fields: Vec<&str> = name.split('.').collect();
    let idx = if node < 0 { node + fields.len() as i64 } else { node };
    if idx < 0 || idx as usize >= fields.len() {
        return None;
    }
    Some(fields[idx as usize].to_owned())
}
