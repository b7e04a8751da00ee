use churnscore_core::FeatureError;
use thiserror::Error;

/// Everything that turns a request into a non-2xx response.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid request body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("member {member_id}: {source}")]
    InvalidFeature {
        member_id: String,
        #[source]
        source: FeatureError,
    },

    #[error("unsupported mode `{0}`, expected `model` or `heuristic`")]
    InvalidMode(String),

    #[error("request body of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("batch of {size} items exceeds limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("request head exceeds limit of {limit} bytes or {max_headers} headers")]
    HeadersTooLarge { limit: usize, max_headers: usize },

    #[error("server is at its limit of {limit} open connections")]
    ServerBusy { limit: usize },

    #[error("no route for {0}")]
    NotFound(String),

    #[error("{method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("failed to encode response: {0}")]
    Encode(String),
}

impl RequestError {
    pub const fn status(&self) -> u16 {
        match self {
            Self::InvalidJson(_)
            | Self::InvalidFeature { .. }
            | Self::InvalidMode(_)
            | Self::Malformed(_) => 400,
            Self::PayloadTooLarge { .. } | Self::BatchTooLarge { .. } => 413,
            Self::HeadersTooLarge { .. } => 431,
            Self::ServerBusy { .. } => 503,
            Self::NotFound(_) => 404,
            Self::MethodNotAllowed { .. } => 405,
            Self::Encode(_) => 500,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidJson(_)
            | Self::InvalidFeature { .. }
            | Self::InvalidMode(_)
            | Self::Malformed(_) => "invalid_request",
            Self::PayloadTooLarge { .. } | Self::BatchTooLarge { .. } => "payload_too_large",
            Self::HeadersTooLarge { .. } => "headers_too_large",
            Self::ServerBusy { .. } => "server_busy",
            Self::NotFound(_) => "not_found",
            Self::MethodNotAllowed { .. } => "method_not_allowed",
            Self::Encode(_) => "internal_error",
        }
    }
}
