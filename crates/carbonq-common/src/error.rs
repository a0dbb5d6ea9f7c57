use thiserror::Error;

#[derive(Error, Debug)]
pub enum CarbonqError {
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error in {target:?}: could not parse {remainder:?}")]
    Parse { target: String, remainder: String },

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("bad function argument: {0}")]
    BadArgument(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("deadline exceeded after {0}ms")]
    Timeout(u64),
}

impl CarbonqError {
    /// True for failures of a single upstream fetch. The coordinator logs
    /// these and drops the affected series instead of failing the request.
    pub fn is_upstream(&self) -> bool {
        matches!(self, CarbonqError::Upstream(_) | CarbonqError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, CarbonqError>;
