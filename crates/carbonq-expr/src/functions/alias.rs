//! Renaming and presentation functions.

use carbonq_common::error::{CarbonqError, Result};
use carbonq_common::series::{MetricData, MetricMap};

use crate::functions::combine::name_node;
use crate::parser::{fmt_f64, CallExpr};

pub fn alias(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let name = call.str_arg(1)?.to_owned();
    Ok(series.into_iter().map(|s| s.renamed(name.clone())).collect())
}

/// Renames each series to the selected dot-separated components of its name.
pub fn alias_by_node(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    if call.args.len() < 2 {
        return Err(CarbonqError::BadArgument(
            "aliasByNode: at least one node index required".into(),
        ));
    }
    let nodes: Vec<i64> = call.args[1..]
        .iter()
        .map(|a| a.as_i64())
        .collect::<Result<_>>()?;
    Ok(series
        .into_iter()
        .map(|s| {
            let parts: Vec<String> = nodes
                .iter()
                .filter_map(|&n| name_node(&s.name, n))
                .collect();
            s.renamed(parts.join("."))
        })
        .collect())
}

/// Regex substitution on series names. Back-references use `$1` syntax
/// rather than `\1`; this is a deliberate divergence from graphite-web.
pub fn alias_sub(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let search = call.str_arg(1)?;
    let replace = call.str_arg(2)?.to_owned();
    let re = regex::Regex::new(search)
        .map_err(|e| CarbonqError::BadArgument(format!("aliasSub: bad pattern: {e}")))?;
    Ok(series
        .into_iter()
        .map(|s| {
            let name = re.replace_all(&s.name, replace.as_str()).into_owned();
            s.renamed(name)
        })
        .collect())
}

pub fn color(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let color = call.str_arg(1)?.to_owned();
    Ok(series
        .into_iter()
        .map(|mut s| {
            s.color = color.clone();
            s
        })
        .collect())
}

pub fn dashed(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    let length = call.f64_arg_default(1, 5.0)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut out = s.renamed(format!("dashed({},{})", s.name, fmt_f64(length)));
            out.dashed = true;
            out
        })
        .collect())
}

pub fn draw_as_infinite(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut out = s.renamed(format!("drawAsInfinite({})", s.name));
            out.draw_as_infinite = true;
            out
        })
        .collect())
}

pub fn second_y_axis(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut out = s.renamed(format!("secondYAxis({})", s.name));
            out.second_y_axis = true;
            out
        })
        .collect())
}

pub fn stacked(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    let series = call.series_arg(0, from, until, map)?;
    Ok(series
        .into_iter()
        .map(|s| {
            let mut out = s.renamed(format!("stacked({})", s.name));
            out.stacked = true;
            out
        })
        .collect())
}
