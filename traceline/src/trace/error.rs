use thiserror::Error;

/// A specialized `Result` type for trace operations.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors returned by the tracing core.
///
/// Header parsing never surfaces these to callers of `finish` or
/// `start_child`; they exist for the codecs and for handler callbacks.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// The `sentry-trace` header did not match `<trace_id>-<span_id>[-<sampled>]`.
    #[error("malformed trace header: {0:?}")]
    MalformedTraceHeader(String),

    /// A baggage header could not be used.
    #[error("malformed baggage: {0}")]
    MalformedBaggage(String),

    /// Decoding an envelope failed.
    #[error("malformed envelope")]
    MalformedEnvelope(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// A registered callback failed.
    #[error("handler failed: {0}")]
    HandlerError(String),

    /// The tracer was shut down before the operation ran.
    #[error("tracer already shut down")]
    TracerShutdown,

    /// Other errors propagated from the SDK that weren't covered above.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl From<String> for TraceError {
    fn from(err_msg: String) -> Self {
        TraceError::Other(err_msg.into())
    }
}

impl From<&'static str> for TraceError {
    fn from(err_msg: &'static str) -> Self {
        TraceError::Other(Box::new(Custom(err_msg.into())))
    }
}

/// Wrap type for string
#[derive(Error, Debug)]
#[error("{0}")]
struct Custom(String);
