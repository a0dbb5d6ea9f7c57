//! Time Series Data Model
//!
//! This module defines the two core value types that flow through the query
//! pipeline:
//!
//! - **[`MetricData`]**: one fetched series with its time window, sample
//!   period, values and the parallel absent mask, plus rendering metadata and
//!   the lazily computed consolidation used when a viewport has fewer pixels
//!   than the series has points.
//! - **[`MetricRequest`]**: the `(metric, from, until)` fetch key. Requests
//!   are deduplicated per HTTP request by this key, so a target list that
//!   mentions the same metric twice fetches it once.
//!
//! # Invariants
//!
//! For any series, `values.len() == is_absent.len()` and
//! `stop_time - start_time` is a non-negative multiple of `step_time`. The
//! value for timestamp `t` lives at index `(t - start_time) / step_time`.

use std::collections::HashMap;
use std::sync::OnceLock;

/// A fetch key: one metric glob with the resolved time window.
///
/// Within a single HTTP request at most one find and one set of renders is
/// issued per distinct `MetricRequest`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MetricRequest {
    pub metric: String,
    pub from: i32,
    pub until: i32,
}

/// Per-request map from fetch key to the series resolved for it.
pub type MetricMap = HashMap<MetricRequest, Vec<MetricData>>;

/// Consolidated form of a series, memoized on first use.
#[derive(Clone, Debug)]
struct Aggregated {
    values: Vec<f64>,
    is_absent: Vec<bool>,
}

/// One fetched (or synthesized) time series.
#[derive(Clone, Debug)]
pub struct MetricData {
    pub name: String,
    pub start_time: i32,
    pub stop_time: i32,
    pub step_time: i32,
    pub values: Vec<f64>,
    pub is_absent: Vec<bool>,

    // Rendering metadata. Not semantic: functions set these, only the
    // rendering backend reads them.
    pub color: String,
    pub line_width: f64,
    pub dashed: bool,
    pub stacked: bool,
    pub second_y_axis: bool,
    pub alpha: f64,
    pub has_alpha: bool,
    pub draw_as_infinite: bool,
    pub invisible: bool,

    values_per_point: usize,
    aggregated: OnceLock<Aggregated>,
}

impl MetricData {
    /// Creates a series starting at `start_time` with the given sample period.
    ///
    /// `stop_time` is derived so the window covers exactly the supplied
    /// values.
    pub fn new(
        name: impl Into<String>,
        start_time: i32,
        step_time: i32,
        values: Vec<f64>,
        is_absent: Vec<bool>,
    ) -> Self {
        debug_assert_eq!(values.len(), is_absent.len());
        let stop_time = start_time + step_time * values.len() as i32;
        Self {
            name: name.into(),
            start_time,
            stop_time,
            step_time,
            values,
            is_absent,
            color: String::new(),
            line_width: 0.0,
            dashed: false,
            stacked: false,
            second_y_axis: false,
            alpha: 1.0,
            has_alpha: false,
            draw_as_infinite: false,
            invisible: false,
            values_per_point: 1,
            aggregated: OnceLock::new(),
        }
    }

    /// Builds a series from alternating present values and `None` gaps.
    /// Test and function-library convenience.
    pub fn from_options(
        name: impl Into<String>,
        start_time: i32,
        step_time: i32,
        points: &[Option<f64>],
    ) -> Self {
        let values = points.iter().map(|p| p.unwrap_or(f64::NAN)).collect();
        let is_absent = points.iter().map(|p| p.is_none()).collect();
        Self::new(name, start_time, step_time, values, is_absent)
    }

    /// Returns a copy of this series with a new name, keeping everything else.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut out = self.clone();
        out.name = name.into();
        out
    }

    /// The value at index `i`, or `None` if the slot is absent.
    pub fn value_at(&self, i: usize) -> Option<f64> {
        if self.is_absent[i] {
            None
        } else {
            Some(self.values[i])
        }
    }

    /// Number of raw samples per consolidated point.
    pub fn values_per_point(&self) -> usize {
        self.values_per_point
    }

    /// Sets the consolidation ratio and invalidates any memoized aggregate.
    pub fn set_values_per_point(&mut self, values_per_point: usize) {
        self.values_per_point = values_per_point.max(1);
        self.aggregated = OnceLock::new();
    }

    /// Caps the consolidated point count at `max_data_points`.
    pub fn consolidate(&mut self, max_data_points: usize) {
        if max_data_points == 0 || self.values.is_empty() {
            return;
        }
        let vpp = self.values.len().div_ceil(max_data_points);
        self.set_values_per_point(vpp);
    }

    /// Sample period of the consolidated series.
    pub fn aggregated_time_step(&self) -> i32 {
        self.step_time * self.values_per_point as i32
    }

    /// Consolidated values. Each bucket is the mean of its non-absent
    /// samples; a trailing partial bucket is emitted. Computed once per
    /// `values_per_point` setting.
    pub fn aggregated_values(&self) -> &[f64] {
        &self.aggregate().values
    }

    /// Absent mask for the consolidated values. A bucket is absent only if
    /// every sample in it is absent.
    pub fn aggregated_absent(&self) -> &[bool] {
        &self.aggregate().is_absent
    }

    fn aggregate(&self) -> &Aggregated {
        self.aggregated.get_or_init(|| {
            if self.values_per_point <= 1 {
                return Aggregated {
                    values: self.values.clone(),
                    is_absent: self.is_absent.clone(),
                };
            }
            let mut values = Vec::with_capacity(self.values.len().div_ceil(self.values_per_point));
            let mut is_absent = Vec::with_capacity(values.capacity());
            for bucket in 0..self.values.len().div_ceil(self.values_per_point) {
                let lo = bucket * self.values_per_point;
                let hi = ((bucket + 1) * self.values_per_point).min(self.values.len());
                let mut sum = 0.0;
                let mut n = 0usize;
                for i in lo..hi {
                    if !self.is_absent[i] && !self.values[i].is_nan() {
                        sum += self.values[i];
                        n += 1;
                    }
                }
                if n == 0 {
                    values.push(f64::NAN);
                    is_absent.push(true);
                } else {
                    values.push(sum / n as f64);
                    is_absent.push(false);
                }
            }
            Aggregated { values, is_absent }
        })
    }
}
