use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Semantic outcome of a span.
///
/// Serialized in snake case, e.g. `deadline_exceeded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpanStatus {
    /// The operation completed successfully.
    ///
    /// HTTP status 100..299.
    Ok,

    /// The operation was cancelled, typically by the user.
    Cancelled,

    /// Unknown. Any non-standard HTTP status code.
    UnknownError,

    /// Client specified an invalid argument. 4xx.
    InvalidArgument,

    /// Deadline expired before operation could complete. 504 Gateway Timeout.
    DeadlineExceeded,

    /// 404 Not Found.
    NotFound,

    /// 409 Conflict. Some entity that we attempted to create already exists.
    AlreadyExists,

    /// 403 Forbidden.
    PermissionDenied,

    /// 429 Too Many Requests.
    ResourceExhausted,

    /// Operation was rejected because the system is not in a state required
    /// for the operation's execution.
    FailedPrecondition,

    /// The operation was aborted, typically due to a concurrency issue.
    Aborted,

    /// Operation was attempted past the valid range.
    OutOfRange,

    /// 501 Not Implemented.
    Unimplemented,

    /// Other/generic 5xx.
    InternalError,

    /// 503 Service Unavailable.
    Unavailable,

    /// Unrecoverable data loss or corruption.
    DataLoss,

    /// 401 Unauthorized.
    Unauthenticated,
}

impl SpanStatus {
    /// Maps an HTTP response status code to a span status.
    ///
    /// ```
    /// use traceline::trace::SpanStatus;
    ///
    /// assert_eq!(SpanStatus::from_http_code(204), SpanStatus::Ok);
    /// assert_eq!(SpanStatus::from_http_code(418), SpanStatus::InvalidArgument);
    /// assert_eq!(SpanStatus::from_http_code(302), SpanStatus::UnknownError);
    /// ```
    pub fn from_http_code(code: u16) -> SpanStatus {
        match code {
            0 => SpanStatus::UnknownError,
            100..=299 => SpanStatus::Ok,
            400 => SpanStatus::InvalidArgument,
            401 => SpanStatus::Unauthenticated,
            403 => SpanStatus::PermissionDenied,
            404 => SpanStatus::NotFound,
            409 => SpanStatus::AlreadyExists,
            429 => SpanStatus::ResourceExhausted,
            499 => SpanStatus::Cancelled,
            400..=499 => SpanStatus::InvalidArgument,
            500 => SpanStatus::InternalError,
            501 => SpanStatus::Unimplemented,
            503 => SpanStatus::Unavailable,
            504 => SpanStatus::DeadlineExceeded,
            500..=599 => SpanStatus::InternalError,
            _ => SpanStatus::UnknownError,
        }
    }

    /// The wire name of this status.
    pub fn as_str(&self) -> &'static str {
        match *self {
            SpanStatus::Ok => "ok",
            SpanStatus::Cancelled => "cancelled",
            SpanStatus::UnknownError => "unknown_error",
            SpanStatus::InvalidArgument => "invalid_argument",
            SpanStatus::DeadlineExceeded => "deadline_exceeded",
            SpanStatus::NotFound => "not_found",
            SpanStatus::AlreadyExists => "already_exists",
            SpanStatus::PermissionDenied => "permission_denied",
            SpanStatus::ResourceExhausted => "resource_exhausted",
            SpanStatus::FailedPrecondition => "failed_precondition",
            SpanStatus::Aborted => "aborted",
            SpanStatus::OutOfRange => "out_of_range",
            SpanStatus::Unimplemented => "unimplemented",
            SpanStatus::InternalError => "internal_error",
            SpanStatus::Unavailable => "unavailable",
            SpanStatus::DataLoss => "data_loss",
            SpanStatus::Unauthenticated => "unauthenticated",
        }
    }
}

/// Error parsing a `SpanStatus`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseSpanStatusError;

impl fmt::Display for ParseSpanStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid span status")
    }
}

impl std::error::Error for ParseSpanStatusError {}

impl FromStr for SpanStatus {
    type Err = ParseSpanStatusError;

    fn from_str(string: &str) -> Result<SpanStatus, Self::Err> {
        Ok(match string {
            "ok" => SpanStatus::Ok,
            "cancelled" => SpanStatus::Cancelled,
            "unknown" | "unknown_error" => SpanStatus::UnknownError,
            "invalid_argument" => SpanStatus::InvalidArgument,
            "deadline_exceeded" => SpanStatus::DeadlineExceeded,
            "not_found" => SpanStatus::NotFound,
            "already_exists" => SpanStatus::AlreadyExists,
            "permission_denied" => SpanStatus::PermissionDenied,
            "resource_exhausted" => SpanStatus::ResourceExhausted,
            "failed_precondition" => SpanStatus::FailedPrecondition,
            "aborted" => SpanStatus::Aborted,
            "out_of_range" => SpanStatus::OutOfRange,
            "unimplemented" => SpanStatus::Unimplemented,
            "internal_error" => SpanStatus::InternalError,
            "unavailable" => SpanStatus::Unavailable,
            "data_loss" => SpanStatus::DataLoss,
            "unauthenticated" => SpanStatus::Unauthenticated,
            _ => return Err(ParseSpanStatusError),
        })
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SpanStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SpanStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        name.parse().map_err(de::Error::custom)
    }
}
