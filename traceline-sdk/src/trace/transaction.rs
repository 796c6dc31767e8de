//! # Transaction
//!
//! A transaction is the root span of one logical operation. It owns the
//! span tree: every span started from it, at any depth, lands in its
//! [`SpanRecorder`]. Finishing the root span finishes the transaction,
//! which turns it into a [`TransactionEvent`] and hands it to the tracer's
//! dispatchers.
use crate::export::{EventContexts, EventType, Measurement, TransactionEvent, TransactionInfo};
use crate::trace::span::{SpanTree, TransactionBehavior};
use crate::trace::tracer::TracerInner;
use crate::trace::{SamplingMethod, Span, SpanContext, SpanData, SpanRecorder};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use std::time::SystemTime;
use traceline::baggage::Baggage;
use traceline::{tl_debug, tl_warn};
use uuid::Uuid;

/// Name used for transactions finished without one.
pub const UNLABELED_TRANSACTION: &str = "<unlabeled transaction>";

/// Where the transaction name came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    /// Set by the user.
    Custom,
    /// Raw URL, possibly containing identifiers.
    Url,
    /// Parametrized route.
    Route,
    /// Name of a component, e.g. a view.
    Component,
    /// Background task.
    Task,
}

/// The sampling decision recorded on a transaction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransactionSampling {
    /// Rate applied, if one was.
    pub rate: Option<f64>,
    /// How the decision was made.
    pub method: SamplingMethod,
}

/// Transaction metadata. Fields left `None` are untouched by
/// [`Transaction::set_metadata`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionMetadata {
    /// Name source.
    pub source: Option<TransactionSource>,
    /// Dynamic sampling context, frozen once sent.
    pub baggage: Option<Baggage>,
    /// Sampling decision.
    pub transaction_sampling: Option<TransactionSampling>,
}

/// Everything needed to start a transaction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionContext {
    /// Transaction name.
    pub name: String,
    /// Root span fields.
    pub span: SpanContext,
    /// Upstream sampling decision from a `sentry-trace` header.
    pub parent_sampled: Option<bool>,
    /// Initial metadata.
    pub metadata: TransactionMetadata,
    /// End the transaction at its last child's end instead of its own.
    pub trim_end: bool,
}

impl TransactionContext {
    /// A context for a new trace.
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        TransactionContext {
            name: name.into(),
            span: SpanContext::new().with_op(op),
            ..Default::default()
        }
    }

    /// Replaces the root span fields.
    pub fn with_span(mut self, span: SpanContext) -> Self {
        self.span = span;
        self
    }

    /// Forces the sampling decision.
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.span.sampled = Some(sampled);
        self
    }

    /// Sets the upstream sampling decision.
    pub fn with_parent_sampled(mut self, parent_sampled: bool) -> Self {
        self.parent_sampled = Some(parent_sampled);
        self
    }

    /// Sets the name source.
    pub fn with_source(mut self, source: TransactionSource) -> Self {
        self.metadata.source = Some(source);
        self
    }

    /// Sets the incoming baggage.
    pub fn with_baggage(mut self, baggage: Baggage) -> Self {
        self.metadata.baggage = Some(baggage);
        self
    }

    /// Sets [`trim_end`](TransactionContext::trim_end).
    pub fn with_trim_end(mut self, trim_end: bool) -> Self {
        self.trim_end = trim_end;
        self
    }
}

#[derive(Debug)]
struct TransactionState {
    name: String,
    metadata: TransactionMetadata,
    measurements: BTreeMap<String, Measurement>,
    trim_end: bool,
    parent_sampled: Option<bool>,
}

pub(crate) struct TransactionInner {
    pub(crate) root: Span,
    state: RefCell<TransactionState>,
    pub(crate) tree: Rc<SpanTree>,
    pub(crate) tracer: Weak<TracerInner>,
}

/// The root span of a span tree.
///
/// Derefs to its root [`Span`], so children are started with
/// [`Span::start_child`] and the transaction is finished with
/// [`Span::finish`].
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Rc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(cx: TransactionContext, sampled: bool, tracer: &Rc<TracerInner>) -> Self {
        let TransactionContext {
            name,
            mut span,
            parent_sampled,
            metadata,
            trim_end,
        } = cx;
        span.sampled = Some(sampled);

        let config = &tracer.config;
        let recorder =
            sampled.then(|| SpanRecorder::with_policy(config.max_spans, config.recorder_policy));
        let tree = SpanTree::new(recorder);
        let root = Span::build(span, tracer.env.clone(), Some(Rc::downgrade(&tree)));

        let inner = Rc::new(TransactionInner {
            root,
            state: RefCell::new(TransactionState {
                name,
                metadata,
                measurements: BTreeMap::new(),
                trim_end,
                parent_sampled,
            }),
            tree,
            tracer: Rc::downgrade(tracer),
        });
        let behavior: Weak<dyn TransactionBehavior> = Rc::downgrade(&inner) as Weak<dyn TransactionBehavior>;
        inner.root.set_behavior(behavior);

        Transaction { inner }
    }

    /// Current name.
    pub fn name(&self) -> String {
        self.inner.state.borrow().name.clone()
    }

    /// Sets the name and where it came from.
    pub fn set_name(&self, name: impl Into<String>, source: TransactionSource) {
        let mut state = self.inner.state.borrow_mut();
        state.name = name.into();
        state.metadata.source = Some(source);
    }

    /// Copy of the current metadata.
    pub fn metadata(&self) -> TransactionMetadata {
        self.inner.state.borrow().metadata.clone()
    }

    /// Merges the fields of `metadata` that are set.
    pub fn set_metadata(&self, metadata: TransactionMetadata) {
        let mut state = self.inner.state.borrow_mut();
        if let Some(source) = metadata.source {
            state.metadata.source = Some(source);
        }
        if let Some(baggage) = metadata.baggage {
            state.metadata.baggage = Some(baggage);
        }
        if let Some(sampling) = metadata.transaction_sampling {
            state.metadata.transaction_sampling = Some(sampling);
        }
    }

    /// Records a measurement, replacing one with the same name.
    pub fn set_measurement(&self, name: impl Into<String>, value: f64, unit: Option<&str>) {
        self.inner.state.borrow_mut().measurements.insert(
            name.into(),
            Measurement {
                value,
                unit: unit.map(str::to_string),
            },
        );
    }

    /// The dynamic sampling context of this transaction.
    ///
    /// Incoming baggage that is already frozen is returned as is. Otherwise
    /// the first-party entries are filled in from the tracer configuration
    /// and this transaction, and the result is frozen.
    pub fn get_baggage(&self) -> Baggage {
        self.inner.get_baggage()
    }

    /// Snapshot of the transaction, including its root span fields.
    pub fn to_context(&self) -> TransactionContext {
        let state = self.inner.state.borrow();
        TransactionContext {
            name: state.name.clone(),
            span: self.inner.root.to_context(),
            parent_sampled: state.parent_sampled,
            metadata: state.metadata.clone(),
            trim_end: state.trim_end,
        }
    }

    /// Overwrites the transaction and its root span from `cx`.
    pub fn update_with_context(&self, cx: TransactionContext) {
        self.inner.root.update_with_context(cx.span);
        let mut state = self.inner.state.borrow_mut();
        state.name = cx.name;
        state.metadata = cx.metadata;
        state.trim_end = cx.trim_end;
        state.parent_sampled = cx.parent_sampled;
    }

    /// Number of spans currently recorded, not counting the root.
    pub fn recorded_spans(&self) -> usize {
        self.inner
            .tree
            .recorder()
            .map_or(0, |recorder| recorder.borrow().len())
    }

    /// Whether both handles refer to the same transaction.
    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Deref for Transaction {
    type Target = Span;

    fn deref(&self) -> &Span {
        &self.inner.root
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.inner.state.borrow().name)
            .field("root", &self.inner.root)
            .finish()
    }
}

impl TransactionInner {
    fn get_baggage(&self) -> Baggage {
        let mut state = self.state.borrow_mut();
        if let Some(baggage) = &state.metadata.baggage {
            if !baggage.is_mutable() {
                return baggage.clone();
            }
        }

        let mut baggage = state.metadata.baggage.take().unwrap_or_default();
        if let Some(tracer) = self.tracer.upgrade() {
            let config = &tracer.config;
            if let Some(release) = &config.release {
                baggage.set_if_absent("release", release.clone());
            }
            if let Some(environment) = &config.environment {
                baggage.set_if_absent("environment", environment.clone());
            }
            if let Some(public_key) = config.public_key() {
                baggage.set_if_absent("public_key", public_key);
            }
        }
        baggage.set_if_absent("trace_id", self.root.trace_id().to_string());
        if let Some(rate) = state
            .metadata
            .transaction_sampling
            .and_then(|sampling| sampling.rate)
        {
            // f64's Display never switches to exponent notation
            baggage.set_if_absent("sample_rate", format!("{rate}"));
        }
        if matches!(
            state.metadata.source,
            Some(TransactionSource::Route | TransactionSource::Custom)
        ) {
            baggage.set_if_absent("transaction", state.name.clone());
        }
        baggage.freeze();

        state.metadata.baggage = Some(baggage.clone());
        baggage
    }

    /// Finishes the root span and dispatches the event. Only the first call
    /// has any effect.
    pub(crate) fn finish(&self, end: Option<SystemTime>) {
        if self.root.is_finished() {
            return;
        }
        {
            let mut state = self.state.borrow_mut();
            if state.name.is_empty() {
                tl_warn!(
                    name: "Transaction.Finish.Unlabeled",
                    message = "transaction has no name, falling back to <unlabeled transaction>",
                );
                state.name = UNLABELED_TRANSACTION.to_string();
            }
        }
        if !self.root.finish_span(end) {
            return;
        }

        if self.root.sampled() != Some(true) {
            tl_debug!(
                name: "Transaction.Finish.Discarded",
                transaction = self.state.borrow().name.clone(),
                reason = "not sampled",
            );
            return;
        }

        let Some(tracer) = self.tracer.upgrade() else {
            tl_warn!(
                name: "Transaction.Finish.TracerDropped",
                transaction = self.state.borrow().name.clone(),
            );
            return;
        };
        let event = self.to_event(&tracer);
        tracer.dispatch(event);
    }

    fn to_event(&self, tracer: &TracerInner) -> TransactionEvent {
        let dynamic_sampling_context = self.get_baggage();
        let root = self.root.snapshot();

        let spans: Vec<SpanData> = self.tree.recorder().map_or_else(Vec::new, |recorder| {
            recorder
                .borrow()
                .spans()
                .filter(|span| span.is_finished() && !span.ptr_eq(&self.root))
                .map(Span::snapshot)
                .collect()
        });

        let state = self.state.borrow();
        let own_end = root.end_timestamp.unwrap_or(root.start_timestamp);
        let timestamp = if state.trim_end {
            spans
                .iter()
                .filter_map(|span| span.end_timestamp)
                .max()
                .unwrap_or(own_end)
        } else {
            own_end
        };

        TransactionEvent {
            event_id: Uuid::new_v4(),
            ty: EventType::Transaction,
            transaction: state.name.clone(),
            contexts: EventContexts {
                trace: root.trace_context(),
            },
            start_timestamp: root.start_timestamp,
            timestamp,
            tags: root.tags,
            measurements: state.measurements.clone(),
            transaction_info: state.metadata.source.map(|source| TransactionInfo { source }),
            release: tracer.config.release.clone(),
            environment: tracer.config.environment.clone(),
            spans,
            dynamic_sampling_context: Some(dynamic_sampling_context),
        }
    }
}

impl TransactionBehavior for TransactionInner {
    fn finish_transaction(&self, end: Option<SystemTime>) {
        self.finish(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ManualRuntime, Runtime};
    use crate::testing::InMemoryDispatcher;
    use crate::trace::{Config, FnSampler, Sampler, Tracer};
    use serde_json::json;
    use std::time::Duration;
    use traceline::trace::SpanStatus;

    fn tracer_with(config: Config) -> (Tracer, InMemoryDispatcher, Rc<ManualRuntime>) {
        let runtime = Rc::new(ManualRuntime::default());
        let dispatcher = InMemoryDispatcher::default();
        let tracer = Tracer::builder()
            .with_config(config)
            .with_runtime(runtime.clone())
            .with_dispatcher(dispatcher.clone())
            .build();
        (tracer, dispatcher, runtime)
    }

    fn tracer() -> (Tracer, InMemoryDispatcher, Rc<ManualRuntime>) {
        let config = Config {
            release: Some("app@1.0.0".into()),
            environment: Some("production".into()),
            dsn: Some("https://abc@ingest.example.com/1".parse().unwrap()),
            ..Config::default()
        };
        tracer_with(config)
    }

    #[test]
    fn finish_dispatches_event_once() {
        let (tracer, dispatcher, runtime) = tracer();
        let transaction = tracer.start_transaction(TransactionContext::new("GET /", "http.server"));
        let child = transaction.start_child(SpanContext::new().with_op("db"));
        runtime.advance(Duration::from_millis(20));
        child.finish();
        runtime.advance(Duration::from_millis(5));

        transaction.finish();
        transaction.finish();

        let events = dispatcher.get_finished_events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.transaction, "GET /");
        assert_eq!(event.spans.len(), 1);
        assert_eq!(event.spans[0].span_id, child.span_id());
        assert_eq!(event.contexts.trace.span_id, transaction.span_id());
        assert_eq!(
            event.timestamp,
            event.start_timestamp + Duration::from_millis(25)
        );
        assert_eq!(event.release.as_deref(), Some("app@1.0.0"));
        assert!(event.transaction_info.is_none());
    }

    #[test]
    fn unsampled_transactions_are_not_sent() {
        let (tracer, dispatcher, _runtime) = tracer();
        let transaction =
            tracer.start_transaction(TransactionContext::new("GET /", "http.server").with_sampled(false));
        transaction.start_child(SpanContext::new()).finish();
        transaction.finish();

        assert!(transaction.is_finished());
        assert_eq!(transaction.recorded_spans(), 0);
        assert!(dispatcher.get_finished_events().is_empty());
    }

    #[test]
    fn unfinished_children_are_left_out() {
        let (tracer, dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(TransactionContext::new("job", "task"));
        let done = transaction.start_child(SpanContext::new().with_description("done"));
        let _pending = transaction.start_child(SpanContext::new().with_description("pending"));
        done.finish();
        transaction.finish();

        let events = dispatcher.get_finished_events();
        let descriptions: Vec<_> = events[0]
            .spans
            .iter()
            .filter_map(|span| span.description.clone())
            .collect();
        assert_eq!(descriptions, vec!["done"]);
    }

    #[test]
    fn empty_name_is_labeled() {
        let (tracer, dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(TransactionContext::new("", "ui.load"));
        transaction.finish();

        assert_eq!(transaction.name(), UNLABELED_TRANSACTION);
        assert_eq!(
            dispatcher.get_finished_events()[0].transaction,
            UNLABELED_TRANSACTION
        );
    }

    #[test]
    fn recorder_cap_applies_to_whole_tree() {
        let (tracer, dispatcher, _runtime) = tracer_with(Config {
            max_spans: 3,
            ..Config::default()
        });
        let transaction = tracer.start_transaction(TransactionContext::new("cap", "test"));
        let mut parent: Span = transaction.start_child(SpanContext::new());
        parent.finish();
        for _ in 0..9 {
            let child = parent.start_child(SpanContext::new());
            child.finish();
            parent = child;
        }
        assert_eq!(transaction.recorded_spans(), 3);

        transaction.finish();
        assert_eq!(dispatcher.get_finished_events()[0].spans.len(), 3);
    }

    #[test]
    fn trim_end_uses_last_child() {
        let (tracer, dispatcher, runtime) = tracer();
        let transaction = tracer
            .start_transaction(TransactionContext::new("trimmed", "test").with_trim_end(true));
        let child = transaction.start_child(SpanContext::new());
        runtime.advance(Duration::from_millis(100));
        child.finish();
        let child_end = child.end_timestamp();
        runtime.advance(Duration::from_secs(3));
        transaction.finish();

        let event = &dispatcher.get_finished_events()[0];
        assert_eq!(Some(event.timestamp), child_end);
        assert_eq!(
            transaction.end_timestamp(),
            Some(runtime.now()),
            "root span keeps its own end"
        );
    }

    #[test]
    fn measurements_tags_and_source() {
        let (tracer, dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(TransactionContext::new("/users/42", "pageload"));
        transaction.set_name("/users/:id", TransactionSource::Route);
        transaction.set_tag("region", "eu");
        transaction.set_measurement("lcp", 1204.5, Some("millisecond"));
        transaction.set_measurement("cls", 0.1, None);
        transaction.finish();

        let value = serde_json::to_value(&dispatcher.get_finished_events()[0]).unwrap();
        assert_eq!(value["transaction"], json!("/users/:id"));
        assert_eq!(value["transaction_info"], json!({"source": "route"}));
        assert_eq!(value["tags"], json!({"region": "eu"}));
        assert_eq!(
            value["measurements"],
            json!({
                "cls": {"value": 0.1},
                "lcp": {"value": 1204.5, "unit": "millisecond"},
            })
        );
    }

    #[test]
    fn baggage_is_populated_then_frozen() {
        let (tracer, _dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(
            TransactionContext::new("checkout", "http.server").with_source(TransactionSource::Custom),
        );

        let baggage = transaction.get_baggage();
        assert!(!baggage.is_mutable());
        assert_eq!(baggage.get("release"), Some("app@1.0.0"));
        assert_eq!(baggage.get("environment"), Some("production"));
        assert_eq!(baggage.get("public_key"), Some("abc"));
        assert_eq!(
            baggage.get("trace_id"),
            Some(transaction.trace_id().to_string().as_str())
        );
        assert_eq!(baggage.get("sample_rate"), Some("1"));
        assert_eq!(baggage.get("transaction"), Some("checkout"));

        transaction.set_name("renamed", TransactionSource::Custom);
        assert_eq!(transaction.get_baggage(), baggage);
    }

    #[test]
    fn url_names_stay_out_of_baggage() {
        let (tracer, _dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(
            TransactionContext::new("/users/42", "pageload").with_source(TransactionSource::Url),
        );
        assert_eq!(transaction.get_baggage().get("transaction"), None);
    }

    #[test]
    fn incoming_entries_win_over_local_ones() {
        let (tracer, _dispatcher, _runtime) = tracer();
        let incoming = Baggage::parse("sentry-release=upstream@2,vendor=1");
        let transaction = tracer.start_transaction(
            TransactionContext::new("GET /", "http.server").with_baggage(incoming),
        );
        let baggage = transaction.get_baggage();
        assert_eq!(baggage.get("release"), Some("upstream@2"));
        assert_eq!(baggage.third_party(), "vendor=1");
    }

    #[test]
    fn tiny_sample_rate_stays_decimal() {
        let (tracer, _dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(TransactionContext::new("GET /", "http.server"));
        transaction.set_metadata(TransactionMetadata {
            transaction_sampling: Some(TransactionSampling {
                rate: Some(1.45e-14),
                method: SamplingMethod::ClientRate,
            }),
            ..Default::default()
        });
        assert_eq!(
            transaction.get_baggage().get("sample_rate"),
            Some("0.0000000000000145")
        );
    }

    #[test]
    fn sample_rate_is_advertised_only_when_applied() {
        let cases = vec![
            (
                Sampler::AlwaysOff,
                TransactionContext::new("GET /", "http.server").with_sampled(true),
                SamplingMethod::ExplicitlySet,
                None,
            ),
            (
                Sampler::ParentBased(Box::new(Sampler::AlwaysOff)),
                TransactionContext::new("GET /", "http.server").with_parent_sampled(true),
                SamplingMethod::Inheritance,
                None,
            ),
            (
                Sampler::SampleRate(0.25),
                TransactionContext::new("GET /", "http.server"),
                SamplingMethod::ClientRate,
                Some("0.25"),
            ),
            (
                Sampler::ParentBased(Box::new(FnSampler::new(|_| 0.5))),
                TransactionContext::new("GET /", "http.server"),
                SamplingMethod::ClientSampler,
                Some("0.5"),
            ),
        ];

        for (sampler, cx, method, rate) in cases {
            let tracer = Tracer::builder().with_sampler(sampler).build();
            let transaction = tracer.start_transaction(cx);
            assert_eq!(
                transaction
                    .metadata()
                    .transaction_sampling
                    .map(|sampling| sampling.method),
                Some(method)
            );
            assert_eq!(transaction.get_baggage().get("sample_rate"), rate, "{method:?}");
        }
    }

    #[test]
    fn set_metadata_merges() {
        let (tracer, _dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(
            TransactionContext::new("GET /", "http.server").with_source(TransactionSource::Route),
        );
        transaction.set_metadata(TransactionMetadata {
            baggage: Some(Baggage::new()),
            ..Default::default()
        });
        let metadata = transaction.metadata();
        assert_eq!(metadata.source, Some(TransactionSource::Route));
        assert_eq!(metadata.baggage, Some(Baggage::new()));
        assert!(metadata.transaction_sampling.is_some());
    }

    #[test]
    fn context_round_trip() {
        let (tracer, _dispatcher, _runtime) = tracer();
        let transaction = tracer.start_transaction(
            TransactionContext::new("GET /", "http.server")
                .with_source(TransactionSource::Route)
                .with_trim_end(true),
        );
        transaction.set_status(SpanStatus::Ok);

        let cx = transaction.to_context();
        assert_eq!(cx.name, "GET /");
        assert!(cx.trim_end);
        assert_eq!(cx.span.status, Some(SpanStatus::Ok));

        transaction.update_with_context(TransactionContext::new("POST /", "http.server"));
        assert_eq!(transaction.name(), "POST /");
        assert_eq!(transaction.status(), None);
        assert_eq!(transaction.metadata().source, None);
        assert_eq!(transaction.span_id(), cx.span.span_id.unwrap());
    }
}
