//! # Trace header propagation
//!
//! [`TracePropagator`] writes the `sentry-trace` and `baggage` headers of an
//! outgoing request and continues a trace from the headers of an incoming
//! one.
use crate::trace::{Span, SpanContext, Transaction, TransactionContext};
use traceline::baggage::Baggage;
use traceline::propagation::{
    Extractor, Injector, TraceparentData, BAGGAGE_HEADER, SENTRY_TRACE_HEADER,
};
use traceline::tl_debug;

static HEADER_FIELDS: [&str; 2] = [SENTRY_TRACE_HEADER, BAGGAGE_HEADER];

/// Propagates trace context under the `sentry-trace` and `baggage` headers.
///
/// `sentry-trace: 0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-1`
///
/// The `sentry-trace` value carries the trace id, the span id of the caller
/// and, optionally, its sampling decision. The `baggage` value carries the
/// dynamic sampling context as `sentry-` prefixed entries next to any third
/// party entries.
#[derive(Clone, Debug, Default)]
pub struct TracePropagator {
    _private: (),
}

impl TracePropagator {
    /// Create a new `TracePropagator`.
    pub fn new() -> Self {
        TracePropagator { _private: () }
    }

    /// Header names written by this propagator.
    pub fn fields(&self) -> impl Iterator<Item = &'static str> {
        HEADER_FIELDS.iter().copied()
    }

    /// Injects the root span of `transaction`.
    pub fn inject(&self, transaction: &Transaction, injector: &mut dyn Injector) {
        self.inject_span(transaction, transaction, injector)
    }

    /// Injects `span`, a descendant of `transaction`.
    ///
    /// The baggage always comes from the transaction, so the dynamic sampling
    /// context is frozen by the first outgoing request.
    pub fn inject_span(&self, span: &Span, transaction: &Transaction, injector: &mut dyn Injector) {
        injector.set(SENTRY_TRACE_HEADER, span.to_traceparent());

        let baggage = transaction.get_baggage();
        let existing = injector.existing(BAGGAGE_HEADER);
        let header = baggage.merge_and_serialize(existing.as_deref());
        if !header.is_empty() {
            injector.set(BAGGAGE_HEADER, header);
        }
    }

    /// Continues the trace found in `extractor`.
    ///
    /// A missing or malformed `sentry-trace` header leaves `cx` on a new
    /// trace; the baggage is still attached.
    pub fn extract(&self, extractor: &dyn Extractor, mut cx: TransactionContext) -> TransactionContext {
        let traceparent = extractor.get(SENTRY_TRACE_HEADER).and_then(|header| {
            let data = TraceparentData::parse(&header);
            if data.is_none() {
                tl_debug!(name: "TracePropagator.Extract.InvalidTraceHeader", header = header.to_string());
            }
            data
        });

        let baggage_header = extractor.get(BAGGAGE_HEADER);
        let baggage =
            Baggage::parse_with_mutability(baggage_header.as_deref(), traceparent.is_some());

        if let Some(data) = traceparent {
            cx.span = SpanContext {
                trace_id: Some(data.trace_id),
                parent_span_id: Some(data.parent_span_id),
                ..cx.span
            };
            cx.parent_sampled = data.parent_sampled;
        }
        if !baggage.is_empty() || !baggage.is_mutable() {
            cx.metadata.baggage = Some(baggage);
        }
        cx
    }
}
