//! Functions that select or mask series from a list.

use carbonq_common::error::{CarbonqError, Result};
use carbonq_common::series::{MetricData, MetricMap};

use crate::eval::{current_value, max_value, min_value, percentile, variance};
use crate::parser::{fmt_f64, CallExpr, Expr};

fn top_by<F>(mut series: Vec<MetricData>, n: usize, score: F, descending: bool) -> Vec<MetricData>
where
    F: Fn(&MetricData) -> Option<f64>,
{
    let missing = if descending { f64::NEG_INFINITY } else { f64::INFINITY };
    series.sort_by(|a, b| {
        let sa = score(a).unwrap_or(missing);
        let sb = score(b).unwrap_or(missing);
        let ord = sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });
    series.truncate(n);
    series
}

/// Top `n` series by most recent value.
pub fn highest_current(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let n = call.i64_arg(1)?.max(0) as usize;
    Ok(top_by(series, n, current_value, true))
}

/// Bottom `n` series by most recent value.
pub fn lowest_current(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let n = call.i64_arg(1)?.max(0) as usize;
    Ok(top_by(series, n, current_value, false))
}

/// Top `n` series by maximum value.
pub fn highest_max(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let n = call.i64_arg(1)?.max(0) as usize;
    Ok(top_by(series, n, max_value, true))
}

pub fn maximum_above(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let threshold = call.f64_arg(1)?;
    Ok(series
        .into_iter()
        .filter(|s| max_value(s).is_some_and(|m| m > threshold))
        .collect())
}

pub fn minimum_above(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let threshold = call.f64_arg(1)?;
    Ok(series
        .into_iter()
        .filter(|s| min_value(s).is_some_and(|m| m > threshold))
        .collect())
}

/// Top `n` series by variance. Accepts both argument orders,
/// `mostDeviant(n, seriesList)` and `mostDeviant(seriesList, n)`.
pub fn most_deviant(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let (series_idx, n_idx) = match call.arg(0)? {
        Expr::Const(_) => (1, 0),
        _ => (0, 1),
    };
    let series = call.series_arg(series_idx, from, until, map)?;
    let n = call.i64_arg(n_idx)?.max(0) as usize;
    Ok(top_by(series, n, variance, true))
}

pub fn remove_above_value(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let threshold = call.f64_arg(1)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let name = format!("removeAboveValue({},{})", s.name, fmt_f64(threshold));
            mask(s, |v| v > threshold, name)
        })
        .collect())
}

pub fn remove_below_value(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let threshold = call.f64_arg(1)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let name = format!("removeBelowValue({},{})", s.name, fmt_f64(threshold));
            mask(s, |v| v < threshold, name)
        })
        .collect())
}

pub fn remove_above_percentile(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let p = call.f64_arg(1)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut present: Vec<f64> = (0..s.values.len()).filter_map(|i| s.value_at(i)).collect();
            match percentile(&mut present, p) {
                Some(threshold) => {
                    let name = format!("removeAbovePercentile({},{})", s.name, fmt_f64(p));
                    mask(s, move |v| v > threshold, name)
                }
                None => s,
            }
        })
        .collect())
}

pub fn remove_below_percentile(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let p = call.f64_arg(1)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut present: Vec<f64> = (0..s.values.len()).filter_map(|i| s.value_at(i)).collect();
            match percentile(&mut present, p) {
                Some(threshold) => {
                    let name = format!("removeBelowPercentile({},{})", s.name, fmt_f64(p));
                    mask(s, move |v| v < threshold, name)
                }
                None => s,
            }
        })
        .collect())
}

fn mask(s: MetricData, drop: impl Fn(f64) -> bool, name: String) -> MetricData {
    let mut out = s.renamed(name);
    for i in 0..out.values.len() {
        if !out.is_absent[i] && drop(out.values[i]) {
            out.values[i] = f64::NAN;
            out.is_absent[i] = true;
        }
    }
    out
}

/// Drops series whose name matches the pattern.
pub fn exclude(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let pattern = call.str_arg(1)?;
    let re = regex::Regex::new(pattern)
        .map_err(|e| CarbonqError::BadArgument(format!("exclude: bad pattern: {e}")))?;
    Ok(series.into_iter().filter(|s| !re.is_match(&s.name)).collect())
}

/// Keeps only the first `n` series.
pub fn limit(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let mut series = call.series_arg(0, from, until, map)?;
    let n = call.i64_arg(1)?.max(0) as usize;
    series.truncate(n);
    Ok(series)
}
