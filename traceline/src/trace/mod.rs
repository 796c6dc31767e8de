//! Span status and trace errors.
mod error;
mod status;

pub use self::error::{TraceError, TraceResult};
pub use self::status::{ParseSpanStatusError, SpanStatus};
pub use crate::trace_context::{SpanId, TraceId};
