use thiserror::Error;

/// Core error type for anchor.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum AnchorError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("rate limited by provider {provider}")]
    RateLimited {
        provider: String,
        retry_after: Option<u64>,
    },

    #[error("provider unavailable: {provider}")]
    ProviderUnavailable { provider: String },

    #[error("upstream error from {provider}: {code} {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    /// Tracer bootstrap could not build or install a provider.
    #[error("telemetry setup failed: {0}")]
    Setup(String),

    #[error("no instrumentor registered under {0:?}")]
    NotFound(String),

    /// The vendor's client library is not compiled into this build.
    #[error("client library for {vendor} is unavailable: {reason}")]
    DependencyMissing { vendor: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, AnchorError>;

/// Raised while mapping a normalized response onto span attributes.
/// Never escapes the interceptor: it is recorded on the span instead.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("field {field:?} is not {expected}")]
    Shape {
        field: String,
        expected: &'static str,
    },

    #[error("response could not be normalized: {0}")]
    Normalize(String),

    #[error("normalized value is not an object")]
    NotAnObject,
}

impl ExtractionError {
    pub(crate) fn shape(field: &str, expected: &'static str) -> Self {
        Self::Shape {
            field: field.to_string(),
            expected,
        }
    }
}
