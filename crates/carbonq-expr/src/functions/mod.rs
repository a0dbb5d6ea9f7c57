//! Function Library
//!
//! The Graphite-compatible function set, dispatched by name. Implementations
//! are grouped by shape:
//!
//! - [`combine`] - fold several series into one (or one per group)
//! - [`transform`] - per-series value transformations and bucketing
//! - [`filter`] - select or mask series from a list
//! - [`alias`] - renaming and presentation metadata
//! - [`special`] - synthesized series
//!
//! Every implementation is a pure function of the call node, the window and
//! the fetched metric map, and returns a fresh series list.

pub mod alias;
pub mod combine;
pub mod filter;
pub mod special;
pub mod transform;

use carbonq_common::error::{CarbonqError, Result};
use carbonq_common::series::{MetricData, MetricMap};

use crate::parser::CallExpr;

/// Dispatches one call node to its implementation.
pub fn dispatch(call: &CallExpr, from: i32, until: i32, map: &MetricMap) -> Result<Vec<MetricData>> {
    match call.function.as_str() {
        "alias" => alias::alias(call, from, until, map),
        "aliasByNode" => alias::alias_by_node(call, from, until, map),
        "aliasSub" => alias::alias_sub(call, from, until, map),
        "color" => alias::color(call, from, until, map),
        "dashed" => alias::dashed(call, from, until, map),
        "drawAsInfinite" => alias::draw_as_infinite(call, from, until, map),
        "secondYAxis" => alias::second_y_axis(call, from, until, map),
        "stacked" => alias::stacked(call, from, until, map),

        "sum" | "sumSeries" => combine::sum_series(call, from, until, map),
        "avg" | "averageSeries" => combine::average_series(call, from, until, map),
        "maxSeries" => combine::max_series(call, from, until, map),
        "minSeries" => combine::min_series(call, from, until, map),
        "stddevSeries" => combine::stddev_series(call, from, until, map),
        "rangeOfSeries" => combine::range_of_series(call, from, until, map),
        "diffSeries" => combine::diff_series(call, from, until, map),
        "multiplySeries" => combine::multiply_series(call, from, until, map),
        "divideSeries" => combine::divide_series(call, from, until, map),
        "percentileOfSeries" => combine::percentile_of_series(call, from, until, map),
        "group" => combine::group(call, from, until, map),
        "groupByNode" => combine::group_by_node(call, from, until, map),

        "scale" => transform::scale(call, from, until, map),
        "scaleToSeconds" => transform::scale_to_seconds(call, from, until, map),
        "derivative" => transform::derivative(call, from, until, map),
        "nonNegativeDerivative" => transform::non_negative_derivative(call, from, until, map),
        "logarithm" | "log" => transform::logarithm(call, from, until, map),
        "keepLastValue" => transform::keep_last_value(call, from, until, map),
        "transformNull" => transform::transform_null(call, from, until, map),
        "timeShift" => transform::time_shift(call, from, until, map),
        "movingAverage" => transform::moving_average(call, from, until, map),
        "stdev" => transform::stdev(call, from, until, map),
        "summarize" => transform::summarize(call, from, until, map),
        "substr" => transform::substr(call, from, until, map),
        "maxDataPoints" => transform::max_data_points(call, from, until, map),

        "highestCurrent" => filter::highest_current(call, from, until, map),
        "lowestCurrent" => filter::lowest_current(call, from, until, map),
        "highestMax" => filter::highest_max(call, from, until, map),
        "maximumAbove" => filter::maximum_above(call, from, until, map),
        "minimumAbove" => filter::minimum_above(call, from, until, map),
        "mostDeviant" => filter::most_deviant(call, from, until, map),
        "removeAboveValue" => filter::remove_above_value(call, from, until, map),
        "removeBelowValue" => filter::remove_below_value(call, from, until, map),
        "removeAbovePercentile" => filter::remove_above_percentile(call, from, until, map),
        "removeBelowPercentile" => filter::remove_below_percentile(call, from, until, map),
        "exclude" => filter::exclude(call, from, until, map),
        "limit" => filter::limit(call, from, until, map),

        "constantLine" => special::constant_line(call, from, until, map),
        "randomWalk" | "randomWalkFunction" => special::random_walk(call, from, until, map),
        "time" | "timeFunction" => special::time_function(call, from, until, map),

        other => Err(CarbonqError::UnknownFunction(other.to_owned())),
    }
}
