//! Core types for the traceline tracing SDK.
//!
//! This crate holds the parts of the tracing model that do not depend on a
//! runtime: trace and span identifiers, the semantic [`trace::SpanStatus`],
//! the [`baggage::Baggage`] value carrying the dynamic sampling context, and
//! the codecs for the `sentry-trace` and `baggage` propagation headers.
//!
//! Span trees, sampling, timers and the envelope wire format live in the
//! `traceline_sdk` crate, which builds on the types defined here.
//!
//! # Propagation headers
//!
//! ```
//! use traceline::propagation::TraceparentData;
//! use traceline::baggage::Baggage;
//!
//! let parent = TraceparentData::parse("12312012123120121231201212312012-1121201211212012-1")
//!     .expect("valid header");
//! assert_eq!(parent.parent_sampled, Some(true));
//!
//! let baggage = Baggage::parse("sentry-environment=production,other=value");
//! assert_eq!(baggage.get("environment"), Some("production"));
//! assert_eq!(baggage.third_party(), "other=value");
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod internal_logging;

pub mod baggage;
pub mod propagation;
pub mod time;
pub mod trace;

mod trace_context;

pub use trace_context::{SpanId, TraceId};

#[doc(hidden)]
pub mod _private {
    #[cfg(feature = "internal-logs")]
    pub use tracing::{debug, error, info, warn}; // re-export tracing macros for the logging macros
}
