//! Rendering Backend Seam
//!
//! Rasterizing series to PNG is the job of a pluggable backend; the query
//! pipeline only evaluates series and hands them over. The default build
//! ships no rasterizer: `format=png` answers 501 until a backend is
//! installed here.

use carbonq_common::error::{CarbonqError, Result};
use carbonq_common::series::MetricData;

use crate::params::RenderParams;

/// Consumes evaluated series and produces image bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, series: &[MetricData], params: &RenderParams) -> Result<Vec<u8>>;
}

/// Placeholder backend for builds without a rasterizer.
pub struct DisabledRenderer;

impl Renderer for DisabledRenderer {
    fn render(&self, _series: &[MetricData], _params: &RenderParams) -> Result<Vec<u8>> {
        Err(CarbonqError::Http(
            "png rendering is not available in this build".to_owned(),
        ))
    }
}
