//! Expression Evaluator
//!
//! Walks a parsed target bottom-up against the per-request metric map and
//! produces output series. `Name` nodes look up fetched data, `Const` nodes
//! synthesize a flat line, and `Call` nodes dispatch into the function
//! library.
//!
//! # Conventions
//!
//! - Absent samples are ignored by aggregations; where an output slot has no
//!   defensible value the slot is NaN with the absent flag set.
//! - Series of differing step or window are aligned first: the result uses
//!   the least common multiple of the steps over the intersection of the
//!   windows.
//! - Evaluation is pure: the same tree and metric map always produce the
//!   same output.

use carbonq_common::error::{CarbonqError, Result};
use carbonq_common::series::{MetricData, MetricMap, MetricRequest};

use crate::functions;
use crate::parser::{fmt_f64, CallExpr, Expr};

/// Evaluates `e` over `[from, until)` against the fetched series in `map`.
pub fn eval_expr(e: &Expr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    match e {
        Expr::Name(name) => {
            let key = MetricRequest {
                metric: name.clone(),
                from,
                until,
            };
            Ok(map.get(&key).cloned().unwrap_or_default())
        }
        Expr::Const(v) => Ok(vec![const_series(*v, from, until)]),
        // Bare strings evaluate to nothing; functions read them as arguments
        // without evaluating.
        Expr::QuotedString(_) => Ok(vec![]),
        Expr::Call(call) => functions::dispatch(call, from, until, map),
    }
}

/// A flat line across the window: two points, one step.
pub(crate) fn const_series(v: f64, from: i32, until: i32) -> MetricData {
    let step = (until - from).max(1);
    let mut s = MetricData::new(fmt_f64(v), from, step, vec![v, v], vec![false, false]);
    s.stop_time = until;
    s
}

impl CallExpr {
    pub fn arg(&self, i: usize) -> Result<&Expr> {
        self.args.get(i).ok_or_else(|| {
            CarbonqError::BadArgument(format!("{}: missing argument {}", self.function, i))
        })
    }

    /// Evaluates argument `i` to a series list.
    pub fn series_arg(
        &self,
        i: usize,
        from: i32,
        until: i32,
        map: &MetricMap,
    ) -> Result<Vec<MetricData>> {
        eval_expr(self.arg(i)?, from, until, map)
    }

    /// Evaluates every argument and concatenates the results.
    pub fn series_args(&self, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
        let mut out = Vec::new();
        for a in &self.args {
            out.extend(eval_expr(a, from, until, map)?);
        }
        Ok(out)
    }

    pub fn f64_arg(&self, i: usize) -> Result<f64> {
        self.arg(i)?.as_f64()
    }

    pub fn f64_arg_default(&self, i: usize, default: f64) -> Result<f64> {
        match self.args.get(i) {
            Some(a) => a.as_f64(),
            None => Ok(default),
        }
    }

    pub fn i64_arg(&self, i: usize) -> Result<i64> {
        self.arg(i)?.as_i64()
    }

    pub fn i64_arg_default(&self, i: usize, default: i64) -> Result<i64> {
        match self.args.get(i) {
            Some(a) => a.as_i64(),
            None => Ok(default),
        }
    }

    pub fn str_arg(&self, i: usize) -> Result<&str> {
        self.arg(i)?.as_str()
    }

    pub fn str_arg_default<'a>(&'a self, i: usize, default: &'a str) -> Result<&'a str> {
        match self.args.get(i) {
            Some(a) => a.as_str(),
            None => Ok(default),
        }
    }

    /// Boolean argument taken positionally or by name.
    pub fn bool_arg_default(&self, i: usize, name: &str, default: bool) -> Result<bool> {
        if let Some(v) = self.named.get(name) {
            return v.as_bool();
        }
        match self.args.get(i) {
            Some(a) => a.as_bool(),
            None => Ok(default),
        }
    }
}

fn gcd(a: i32, b: i32) -> i32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn lcm(a: i32, b: i32) -> i32 {
    if a == 0 || b == 0 {
        return a.max(b).max(1);
    }
    a / gcd(a, b) * b
}

/// Aligns a series list onto one time base: the least common multiple of the
/// steps over the intersection of the windows. Series already on that base
/// are cloned untouched.
pub(crate) fn normalize(series: &[MetricData]) -> (Vec<MetricData>, i32, i32, i32) {
    if series.is_empty() {
        return (Vec::new(), 0, 0, 1);
    }
    let step = series.iter().fold(1, |acc, s| lcm(acc, s.step_time.max(1)));
    let start = series.iter().map(|s| s.start_time).max().unwrap_or(0);
    let mut stop = series.iter().map(|s| s.stop_time).min().unwrap_or(start);
    if stop < start {
        stop = start;
    }
    stop = start + ((stop - start) / step) * step;

    let out = series
        .iter()
        .map(|s| {
            if s.start_time == start && s.stop_time == stop && s.step_time == step {
                s.clone()
            } else {
                resample(s, start, stop, step)
            }
        })
        .collect();
    (out, start, stop, step)
}

fn resample(s: &MetricData, start: i32, stop: i32, step: i32) -> MetricData {
    let n = ((stop - start) / step) as usize;
    let mut points = Vec::with_capacity(n);
    for i in 0..n {
        let lo = start + i as i32 * step;
        let hi = lo + step;
        let mut sum = 0.0;
        let mut count = 0usize;
        for (j, v) in s.values.iter().enumerate() {
            let t = s.start_time + j as i32 * s.step_time;
            if t >= lo && t < hi && !s.is_absent[j] && !v.is_nan() {
                sum += v;
                count += 1;
            }
        }
        points.push(if count > 0 { Some(sum / count as f64) } else { None });
    }
    let mut out = MetricData::from_options(s.name.clone(), start, step, &points);
    out.stop_time = stop;
    out
}

/// Builds one output series by reducing the present values at each index.
pub(crate) fn combine(
    name: String,
    series: &[MetricData],
    f: impl Fn(&[f64]) -> f64,
) -> Vec<MetricData> {
    if series.is_empty() {
        return Vec::new();
    }
    let (norm, start, _stop, step) = normalize(series);
    let n = norm.iter().map(|s| s.values.len()).min().unwrap_or(0);
    let mut points = Vec::with_capacity(n);
    for i in 0..n {
        let present: Vec<f64> = norm.iter().filter_map(|s| s.value_at(i)).collect();
        points.push(if present.is_empty() { None } else { Some(f(&present)) });
    }
    vec![MetricData::from_options(name, start, step, &points)]
}

/// Last non-absent value of a series, if any.
pub(crate) fn current_value(s: &MetricData) -> Option<f64> {
    (0..s.values.len()).rev().find_map(|i| s.value_at(i))
}

pub(crate) fn max_value(s: &MetricData) -> Option<f64> {
    (0..s.values.len())
        .filter_map(|i| s.value_at(i))
        .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.max(v))))
}

pub(crate) fn min_value(s: &MetricData) -> Option<f64> {
    (0..s.values.len())
        .filter_map(|i| s.value_at(i))
        .fold(None, |acc, v| Some(acc.map_or(v, |m: f64| m.min(v))))
}

/// Population variance over the non-absent values.
pub(crate) fn variance(s: &MetricData) -> Option<f64> {
    let present: Vec<f64> = (0..s.values.len()).filter_map(|i| s.value_at(i)).collect();
    if present.is_empty() {
        return None;
    }
    let mean = present.iter().sum::<f64>() / present.len() as f64;
    Some(present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / present.len() as f64)
}

/// The nth percentile of `values` using rank rounding (no interpolation).
pub(crate) fn percentile(values: &mut Vec<f64>, p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let fractional_rank = (p / 100.0) * (values.len() + 1) as f64;
    let mut rank = fractional_rank.floor() as usize;
    if fractional_rank > rank as f64 {
        rank += 1;
    }
    if rank == 0 {
        Some(values[0])
    } else if rank > values.len() {
        Some(values[values.len() - 1])
    } else {
        Some(values[rank - 1])
    }
}
