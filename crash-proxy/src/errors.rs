use crate::validation::Rejection;
use hyper::StatusCode;
use thiserror::Error;

/// Errors that end the handling of a single request
#[derive(Error, Debug)]
pub enum CrashProxyError {
    #[error("You have reached maximum request limit.")]
    RateLimited,

    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Invalid json data - can't decode")]
    DecodeError(#[source] serde_json::Error),

    #[error(transparent)]
    Validation(#[from] Rejection),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("Hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrashProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CrashProxyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            CrashProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            CrashProxyError::RequestBodyError(_)
            | CrashProxyError::DecodeError(_)
            | CrashProxyError::Validation(_) => StatusCode::BAD_REQUEST,
            CrashProxyError::UpstreamRequestFailed(..) => StatusCode::BAD_GATEWAY,
            CrashProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CrashProxyError::Hyper(_)
            | CrashProxyError::InternalError(_)
            | CrashProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the display text may be returned to the client. Upstream and
    /// internal details stay in the logs.
    pub fn is_client_facing(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Stable identifier for logs and metric tags.
    pub fn reason(&self) -> &'static str {
        match self {
            CrashProxyError::RateLimited => "rate_limited",
            CrashProxyError::PayloadTooLarge(_) => "payload_too_large",
            CrashProxyError::RequestBodyError(_) => "unreadable_body",
            CrashProxyError::DecodeError(_) => "decode_error",
            CrashProxyError::Validation(rejection) => rejection.reason(),
            CrashProxyError::UpstreamRequestFailed(..) => "upstream_unavailable",
            CrashProxyError::UpstreamTimeout(_) => "upstream_timeout",
            CrashProxyError::Hyper(_) => "hyper",
            CrashProxyError::InternalError(_) => "internal",
            CrashProxyError::Io(_) => "io",
        }
    }
}
