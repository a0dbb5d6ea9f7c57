//! Functions that synthesize series instead of transforming fetched data.

use carbonq_common::error::Result;
use carbonq_common::series::{MetricData, MetricMap};

use crate::eval::const_series;
use crate::parser::CallExpr;

/// A flat line across the whole window.
pub fn constant_line(call: &CallExpr, from: i32, until: i32, _map: &MetricMap) -> Result<Vec<MetricData>> {
    let value = call.f64_arg(0)?;
    Ok(vec![const_series(value, from, until)])
}

/// A synthetic random series, one minute per point. Handy for demos and for
/// exercising the render path without a backend.
pub fn random_walk(call: &CallExpr, from: i32, until: i32, _map: &MetricMap) -> Result<Vec<MetricData>> {
    let name = call.str_arg_default(0, "randomWalk")?.to_owned();
    let step = 60;
    let n = ((until - from) / step).max(0) as usize;
    let mut values = Vec::with_capacity(n);
    let mut current = 0.0f64;
    for _ in 0..n {
        values.push(current);
        current += rand::random::<f64>() - 0.5;
    }
    let absent = vec![false; values.len()];
    Ok(vec![MetricData::new(name, from, step, values, absent)])
}

/// A series whose value at each point is the point's own timestamp.
pub fn time_function(call: &CallExpr, from: i32, until: i32, _map: &MetricMap) -> Result<Vec<MetricData>> {
    let name = call.str_arg(0)?.to_owned();
    let step = call.i64_arg_default(1, 60)?.max(1) as i32;
    let mut values = Vec::new();
    let mut t = from;
    while t < until {
        values.push(t as f64);
        t += step;
    }
    let absent = vec![false; values.len()];
    Ok(vec![MetricData::new(name, from, step, values, absent)])
}
