//! # traceline SDK
//!
//! Span trees, transactions, idle transactions, sampling and the envelope
//! wire format, built on the types of the `traceline` crate.
//!
//! A [`Tracer`](trace::Tracer) starts transactions and decides whether they
//! are sampled. Every span started below a transaction lands in the
//! transaction's recorder; once the transaction finishes it becomes a
//! [`TransactionEvent`](export::TransactionEvent) and is handed to the
//! configured [`Dispatcher`](export::Dispatcher)s.
//!
//! ```
//! use traceline_sdk::trace::{SpanContext, Tracer, TransactionContext};
//!
//! let tracer = Tracer::default();
//! let transaction = tracer.start_transaction(TransactionContext::new("GET /users", "http.server"));
//!
//! let query = transaction.start_child(SpanContext::new().with_op("db.query"));
//! assert_eq!(query.trace_id(), transaction.trace_id());
//! assert_eq!(query.parent_span_id(), Some(transaction.span_id()));
//!
//! query.finish();
//! transaction.finish();
//! ```
//!
//! ## Crate Feature Flags
//!
//! * `internal-logs`: forwards internal diagnostics to `tracing`. Enabled by
//!   default.
//! * `rt-tokio`: a [`Runtime`](runtime::Runtime) on a tokio `LocalSet`.
//! * `testing`: in-memory dispatchers and transports.
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod dsn;
pub mod export;
pub mod instrumentation;
pub mod propagation;
pub mod runtime;
#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;
pub mod trace;
