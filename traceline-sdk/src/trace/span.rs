//! # Span
//!
//! `Span`s represent a single operation within a trace. A span is a cheap
//! handle; clones refer to the same underlying span.
//!
//! Spans started through a transaction share that transaction's span tree:
//! every child, at any depth, is registered with the transaction's single
//! [`SpanRecorder`], and the tree's observer (the idle logic of an idle
//! transaction) hears about each child starting and finishing.
//!
//! The end timestamp of a span is written once. Later calls to
//! [`Span::finish`] are ignored.
use crate::runtime::{LoopRuntime, Runtime};
use crate::trace::{IdGenerator, RandomIdGenerator, SpanRecorder};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::SystemTime;
use traceline::propagation::TraceparentData;
use traceline::trace::SpanStatus;
use traceline::{SpanId, TraceId};

/// Tag set by [`Span::set_http_status`].
pub const HTTP_STATUS_CODE_TAG: &str = "http.status_code";

/// Data key set by [`Span::set_http_status`].
pub const HTTP_RESPONSE_STATUS_CODE_DATA: &str = "http.response.status_code";

/// Public fields used to construct, snapshot or overwrite a span.
///
/// Every field is optional; unset identity fields are generated when the
/// span is created.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanContext {
    /// Trace id. Children always use their parent's.
    pub trace_id: Option<TraceId>,
    /// Span id.
    pub span_id: Option<SpanId>,
    /// Parent span id.
    pub parent_span_id: Option<SpanId>,
    /// Operation, e.g. `http.client`.
    pub op: Option<String>,
    /// Human readable description.
    pub description: Option<String>,
    /// Semantic status.
    pub status: Option<SpanStatus>,
    /// String tags.
    pub tags: BTreeMap<String, String>,
    /// Arbitrary data.
    pub data: BTreeMap<String, Value>,
    /// Sampling decision.
    pub sampled: Option<bool>,
    /// Start time. Defaults to now.
    pub start_timestamp: Option<SystemTime>,
    /// End time, for spans created already finished.
    pub end_timestamp: Option<SystemTime>,
}

impl SpanContext {
    /// An empty context.
    pub fn new() -> Self {
        SpanContext::default()
    }

    /// Sets the operation.
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Sets the sampling decision.
    pub fn with_sampled(mut self, sampled: bool) -> Self {
        self.sampled = Some(sampled);
        self
    }

    /// Sets the trace id.
    pub fn with_trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Sets the span id.
    pub fn with_span_id(mut self, span_id: SpanId) -> Self {
        self.span_id = Some(span_id);
        self
    }

    /// Sets the parent span id.
    pub fn with_parent_span_id(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    /// Sets the start time.
    pub fn with_start_timestamp(mut self, start: SystemTime) -> Self {
        self.start_timestamp = Some(start);
        self
    }

    /// Sets the end time.
    pub fn with_end_timestamp(mut self, end: SystemTime) -> Self {
        self.end_timestamp = Some(end);
        self
    }
}

/// Snapshot of a span, in the shape it is serialized into a transaction's
/// `spans` list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    /// Trace id
    pub trace_id: TraceId,
    /// Span id
    pub span_id: SpanId,
    /// Parent span id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    /// Tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
    /// Start time
    #[serde(with = "traceline::time::seconds")]
    pub start_timestamp: SystemTime,
    /// End time
    #[serde(
        rename = "timestamp",
        default,
        with = "traceline::time::seconds_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_timestamp: Option<SystemTime>,
    /// Sampling decision, not part of the wire format.
    #[serde(skip)]
    pub sampled: Option<bool>,
}

impl SpanData {
    /// The `contexts.trace` view of this span.
    pub fn trace_context(&self) -> TraceContext {
        TraceContext {
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            op: self.op.clone(),
            description: self.description.clone(),
            status: self.status,
            tags: self.tags.clone(),
            data: self.data.clone(),
        }
    }
}

/// The serializable subset of a span used as `contexts.trace`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Trace id
    pub trace_id: TraceId,
    /// Span id
    pub span_id: SpanId,
    /// Parent span id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    /// Operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    /// Tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Data
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, Value>,
}

/// Finishing a root span finishes the transaction it belongs to.
pub(crate) trait TransactionBehavior {
    fn finish_transaction(&self, end: Option<SystemTime>);
}

/// Observes the children of one span tree.
pub(crate) trait IdleBehavior {
    fn on_child_start(&self, span: &Span);
    fn on_child_finish(&self, span: &Span, end: SystemTime);
}

/// Shared services a span needs: id generation and the clock.
pub(crate) struct SpanEnv {
    pub(crate) id_generator: Rc<dyn IdGenerator>,
    pub(crate) runtime: Rc<dyn Runtime>,
}

impl SpanEnv {
    pub(crate) fn new(id_generator: Rc<dyn IdGenerator>, runtime: Rc<dyn Runtime>) -> Rc<Self> {
        Rc::new(SpanEnv {
            id_generator,
            runtime,
        })
    }

    fn standalone() -> Rc<Self> {
        thread_local! {
            static STANDALONE: Rc<SpanEnv> = SpanEnv::new(
                Rc::new(RandomIdGenerator::default()),
                Rc::new(LoopRuntime::new()),
            );
        }
        STANDALONE.with(Rc::clone)
    }
}

/// State shared by every span of one transaction.
pub(crate) struct SpanTree {
    recorder: Option<RefCell<SpanRecorder>>,
    observer: RefCell<Option<Weak<dyn IdleBehavior>>>,
}

impl SpanTree {
    pub(crate) fn new(recorder: Option<SpanRecorder>) -> Rc<Self> {
        Rc::new(SpanTree {
            recorder: recorder.map(RefCell::new),
            observer: RefCell::new(None),
        })
    }

    pub(crate) fn set_observer(&self, observer: Weak<dyn IdleBehavior>) {
        *self.observer.borrow_mut() = Some(observer);
    }

    pub(crate) fn recorder(&self) -> Option<&RefCell<SpanRecorder>> {
        self.recorder.as_ref()
    }

    fn observer(&self) -> Option<Rc<dyn IdleBehavior>> {
        self.observer.borrow().as_ref().and_then(Weak::upgrade)
    }

    fn register(&self, span: &Span) {
        if let Some(recorder) = &self.recorder {
            recorder.borrow_mut().add(span.clone());
        }
        if span.is_finished() {
            return;
        }
        if let Some(observer) = self.observer() {
            observer.on_child_start(span);
        }
    }

    fn finished(&self, span: &Span, end: SystemTime) {
        if let Some(observer) = self.observer() {
            observer.on_child_finish(span, end);
        }
    }
}

struct SpanInner {
    data: RefCell<SpanData>,
    env: Rc<SpanEnv>,
    tree: Option<Weak<SpanTree>>,
    behavior: RefCell<Option<Weak<dyn TransactionBehavior>>>,
}

/// Handle to a timed unit of work.
#[derive(Clone)]
pub struct Span {
    inner: Rc<SpanInner>,
}

impl Span {
    /// Creates a span that does not belong to any transaction.
    pub fn new(cx: SpanContext) -> Span {
        Span::build(cx, SpanEnv::standalone(), None)
    }

    pub(crate) fn build(cx: SpanContext, env: Rc<SpanEnv>, tree: Option<Weak<SpanTree>>) -> Span {
        let data = SpanData {
            trace_id: cx
                .trace_id
                .unwrap_or_else(|| env.id_generator.new_trace_id()),
            span_id: cx.span_id.unwrap_or_else(|| env.id_generator.new_span_id()),
            parent_span_id: cx.parent_span_id,
            op: cx.op,
            description: cx.description,
            status: cx.status,
            tags: cx.tags,
            data: cx.data,
            start_timestamp: cx.start_timestamp.unwrap_or_else(|| env.runtime.now()),
            end_timestamp: cx.end_timestamp,
            sampled: cx.sampled,
        };
        Span {
            inner: Rc::new(SpanInner {
                data: RefCell::new(data),
                env,
                tree,
                behavior: RefCell::new(None),
            }),
        }
    }

    /// Starts a child of this span.
    ///
    /// The child inherits the trace id, uses this span's id as parent, and
    /// inherits the sampling decision unless `cx` sets one. It is registered
    /// with the transaction this span belongs to, if any.
    pub fn start_child(&self, cx: SpanContext) -> Span {
        let (trace_id, span_id, sampled) = {
            let data = self.inner.data.borrow();
            (data.trace_id, data.span_id, data.sampled)
        };
        let cx = SpanContext {
            trace_id: Some(trace_id),
            parent_span_id: Some(span_id),
            sampled: cx.sampled.or(sampled),
            ..cx
        };
        let child = Span::build(cx, self.inner.env.clone(), self.inner.tree.clone());

        if let Some(tree) = self.tree() {
            tree.register(&child);
        }
        child
    }

    /// Sets a tag.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<String>) {
        self.with_data(|data| {
            data.tags.insert(key.into(), value.into());
        });
    }

    /// Sets a data entry.
    pub fn set_data(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.with_data(|data| {
            data.data.insert(key.into(), value.into());
        });
    }

    /// Sets the status.
    pub fn set_status(&self, status: SpanStatus) {
        self.with_data(|data| data.status = Some(status));
    }

    /// Records an HTTP response status: the `http.status_code` tag, the
    /// `http.response.status_code` data entry and the mapped span status.
    pub fn set_http_status(&self, code: u16) {
        self.with_data(|data| {
            data.tags
                .insert(HTTP_STATUS_CODE_TAG.to_string(), code.to_string());
            data.data
                .insert(HTTP_RESPONSE_STATUS_CODE_DATA.to_string(), Value::from(code));
            data.status = Some(SpanStatus::from_http_code(code));
        });
    }

    /// True iff the status is `ok`.
    pub fn is_success(&self) -> bool {
        self.inner.data.borrow().status == Some(SpanStatus::Ok)
    }

    /// Finishes the span now. Has no effect if already finished.
    ///
    /// On the root span of a transaction this finishes the transaction.
    pub fn finish(&self) {
        self.end(None);
    }

    /// Finishes the span at `end`. Has no effect if already finished.
    pub fn finish_with_timestamp(&self, end: SystemTime) {
        self.end(Some(end));
    }

    fn end(&self, end: Option<SystemTime>) {
        let behavior = self.inner.behavior.borrow().as_ref().and_then(Weak::upgrade);
        match behavior {
            Some(behavior) => behavior.finish_transaction(end),
            None => {
                self.finish_span(end);
            }
        }
    }

    /// Writes the end timestamp and notifies the tree. Returns false if the
    /// span was already finished.
    pub(crate) fn finish_span(&self, end: Option<SystemTime>) -> bool {
        let end = end.unwrap_or_else(|| self.inner.env.runtime.now());
        {
            let mut data = self.inner.data.borrow_mut();
            if data.end_timestamp.is_some() {
                return false;
            }
            data.end_timestamp = Some(end);
        }
        if let Some(tree) = self.tree() {
            tree.finished(self, end);
        }
        true
    }

    /// The `sentry-trace` header value for this span.
    pub fn to_traceparent(&self) -> String {
        let data = self.inner.data.borrow();
        TraceparentData::format(data.trace_id, data.span_id, data.sampled)
    }

    /// Snapshot of all public fields.
    pub fn to_context(&self) -> SpanContext {
        let data = self.inner.data.borrow();
        SpanContext {
            trace_id: Some(data.trace_id),
            span_id: Some(data.span_id),
            parent_span_id: data.parent_span_id,
            op: data.op.clone(),
            description: data.description.clone(),
            status: data.status,
            tags: data.tags.clone(),
            data: data.data.clone(),
            sampled: data.sampled,
            start_timestamp: Some(data.start_timestamp),
            end_timestamp: data.end_timestamp,
        }
    }

    /// Overwrites all public fields from `cx`.
    ///
    /// Fields missing from `cx` are reset, except the trace id, span id and
    /// start timestamp which keep their value when absent. An end timestamp
    /// that is already set is never changed.
    pub fn update_with_context(&self, cx: SpanContext) {
        self.with_data(|data| {
            if let Some(trace_id) = cx.trace_id {
                data.trace_id = trace_id;
            }
            if let Some(span_id) = cx.span_id {
                data.span_id = span_id;
            }
            if let Some(start) = cx.start_timestamp {
                data.start_timestamp = start;
            }
            data.parent_span_id = cx.parent_span_id;
            data.op = cx.op;
            data.description = cx.description;
            data.status = cx.status;
            data.tags = cx.tags;
            data.data = cx.data;
            data.sampled = cx.sampled;
            if data.end_timestamp.is_none() {
                data.end_timestamp = cx.end_timestamp;
            }
        });
    }

    /// The `contexts.trace` view of this span.
    pub fn trace_context(&self) -> TraceContext {
        self.inner.data.borrow().trace_context()
    }

    /// Copy of the current span state.
    pub fn snapshot(&self) -> SpanData {
        self.inner.data.borrow().clone()
    }

    /// Trace id
    pub fn trace_id(&self) -> TraceId {
        self.inner.data.borrow().trace_id
    }

    /// Span id
    pub fn span_id(&self) -> SpanId {
        self.inner.data.borrow().span_id
    }

    /// Parent span id
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.data.borrow().parent_span_id
    }

    /// Sampling decision
    pub fn sampled(&self) -> Option<bool> {
        self.inner.data.borrow().sampled
    }

    /// Status
    pub fn status(&self) -> Option<SpanStatus> {
        self.inner.data.borrow().status
    }

    /// Operation
    pub fn op(&self) -> Option<String> {
        self.inner.data.borrow().op.clone()
    }

    /// Description
    pub fn description(&self) -> Option<String> {
        self.inner.data.borrow().description.clone()
    }

    /// Value of the tag `key`.
    pub fn tag(&self, key: &str) -> Option<String> {
        self.inner.data.borrow().tags.get(key).cloned()
    }

    /// Start time
    pub fn start_timestamp(&self) -> SystemTime {
        self.inner.data.borrow().start_timestamp
    }

    /// End time, once finished.
    pub fn end_timestamp(&self) -> Option<SystemTime> {
        self.inner.data.borrow().end_timestamp
    }

    /// Whether an end timestamp is set.
    pub fn is_finished(&self) -> bool {
        self.inner.data.borrow().end_timestamp.is_some()
    }

    /// Whether both handles refer to the same span.
    pub fn ptr_eq(&self, other: &Span) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_behavior(&self, behavior: Weak<dyn TransactionBehavior>) {
        *self.inner.behavior.borrow_mut() = Some(behavior);
    }

    pub(crate) fn set_sampled(&self, sampled: Option<bool>) {
        self.with_data(|data| data.sampled = sampled);
    }

    pub(crate) fn runtime(&self) -> &Rc<dyn Runtime> {
        &self.inner.env.runtime
    }

    fn tree(&self) -> Option<Rc<SpanTree>> {
        self.inner.tree.as_ref().and_then(Weak::upgrade)
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut SpanData) -> T) -> T {
        f(&mut self.inner.data.borrow_mut())
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.data.borrow();
        f.debug_struct("Span")
            .field("trace_id", &data.trace_id)
            .field("span_id", &data.span_id)
            .field("parent_span_id", &data.parent_span_id)
            .field("op", &data.op)
            .field("description", &data.description)
            .field("status", &data.status)
            .field("sampled", &data.sampled)
            .field("finished", &data.end_timestamp.is_some())
            .finish()
    }
}

impl Serialize for Span {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.data.borrow().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ManualRuntime;
    use crate::trace::IncrementIdGenerator;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    fn test_env() -> (Rc<ManualRuntime>, Rc<SpanEnv>) {
        let runtime = Rc::new(ManualRuntime::default());
        let env = SpanEnv::new(Rc::new(IncrementIdGenerator::new()), runtime.clone());
        (runtime, env)
    }

    #[test]
    fn child_inherits_trace_and_parent() {
        let parent = Span::new(SpanContext::new().with_sampled(true));
        let child = parent.start_child(SpanContext::new().with_op("db"));

        assert_eq!(child.trace_id(), parent.trace_id());
        assert_eq!(child.parent_span_id(), Some(parent.span_id()));
        assert_ne!(child.span_id(), parent.span_id());
        assert_eq!(child.sampled(), Some(true));
        assert_eq!(child.op().as_deref(), Some("db"));
    }

    #[test]
    fn child_may_override_sampling() {
        let parent = Span::new(SpanContext::new().with_sampled(true));
        let child = parent.start_child(SpanContext::new().with_sampled(false));
        assert_eq!(child.sampled(), Some(false));

        let undecided = Span::new(SpanContext::new());
        assert_eq!(undecided.start_child(SpanContext::new()).sampled(), None);
    }

    #[test]
    fn finish_is_idempotent() {
        let (runtime, env) = test_env();
        let span = Span::build(SpanContext::new(), env, None);

        span.finish();
        let first = span.end_timestamp();
        assert_eq!(first, Some(runtime.now()));

        runtime.advance(Duration::from_secs(5));
        span.finish();
        span.finish_with_timestamp(UNIX_EPOCH);
        assert_eq!(span.end_timestamp(), first);
    }

    #[test]
    fn http_status() {
        let span = Span::new(SpanContext::new());
        span.set_http_status(404);

        assert_eq!(span.status(), Some(SpanStatus::NotFound));
        assert_eq!(span.tag(HTTP_STATUS_CODE_TAG).as_deref(), Some("404"));
        assert_eq!(
            span.snapshot().data.get(HTTP_RESPONSE_STATUS_CODE_DATA),
            Some(&json!(404))
        );
        assert!(!span.is_success());
    }

    #[rustfmt::skip]
    fn success_data() -> Vec<(Option<u16>, bool)> {
        vec![
            (None, false),
            (Some(200), true),
            (Some(100), true),
            (Some(299), true),
            (Some(0), false),
            (Some(99), false),
            (Some(300), false),
            (Some(503), false),
        ]
    }

    #[test]
    fn is_success() {
        for (code, expected) in success_data() {
            let span = Span::new(SpanContext::new());
            if let Some(code) = code {
                span.set_http_status(code);
            }
            assert_eq!(span.is_success(), expected, "{code:?}");
        }
    }

    #[test]
    fn traceparent() {
        let cx = SpanContext::new()
            .with_trace_id(TraceId::from(0xc2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7))
            .with_span_id(SpanId::from(0x0102030405060708));

        assert_eq!(
            Span::new(cx.clone()).to_traceparent(),
            "c2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7-0102030405060708"
        );
        assert_eq!(
            Span::new(cx.clone().with_sampled(true)).to_traceparent(),
            "c2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7-0102030405060708-1"
        );
        assert_eq!(
            Span::new(cx.with_sampled(false)).to_traceparent(),
            "c2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7-0102030405060708-0"
        );
    }

    #[test]
    fn to_context_round_trips() {
        let span = Span::new(
            SpanContext::new()
                .with_op("op")
                .with_description("desc")
                .with_tag("a", "b")
                .with_data("n", 1)
                .with_status(SpanStatus::Aborted)
                .with_sampled(true),
        );
        let copy = Span::new(span.to_context());
        assert_eq!(copy.snapshot(), span.snapshot());
    }

    #[test]
    fn update_with_context_overwrites() {
        let span = Span::new(
            SpanContext::new()
                .with_op("op")
                .with_description("desc")
                .with_tag("a", "b")
                .with_data("n", 1)
                .with_sampled(true),
        );
        let (trace_id, span_id, start) = (span.trace_id(), span.span_id(), span.start_timestamp());

        span.update_with_context(SpanContext::new().with_op("new-op"));

        let data = span.snapshot();
        assert_eq!(data.trace_id, trace_id);
        assert_eq!(data.span_id, span_id);
        assert_eq!(data.start_timestamp, start);
        assert_eq!(data.op.as_deref(), Some("new-op"));
        assert_eq!(data.description, None);
        assert_eq!(data.sampled, None);
        assert!(data.tags.is_empty());
        assert!(data.data.is_empty());
    }

    #[test]
    fn update_with_context_keeps_end_timestamp() {
        let span = Span::new(SpanContext::new());
        span.finish_with_timestamp(UNIX_EPOCH + Duration::from_secs(10));
        span.update_with_context(
            span.to_context()
                .with_end_timestamp(UNIX_EPOCH + Duration::from_secs(20)),
        );
        assert_eq!(
            span.end_timestamp(),
            Some(UNIX_EPOCH + Duration::from_secs(10))
        );
    }

    #[test]
    fn trace_context_drops_empty_fields() {
        let span = Span::new(
            SpanContext::new()
                .with_trace_id(TraceId::from(1))
                .with_span_id(SpanId::from(2))
                .with_op("http"),
        );
        assert_eq!(
            serde_json::to_value(span.trace_context()).unwrap(),
            json!({
                "trace_id": "00000000000000000000000000000001",
                "span_id": "0000000000000002",
                "op": "http",
            })
        );

        span.set_data("foo", "bar");
        span.set_status(SpanStatus::Ok);
        assert_eq!(
            serde_json::to_value(span.trace_context()).unwrap(),
            json!({
                "trace_id": "00000000000000000000000000000001",
                "span_id": "0000000000000002",
                "op": "http",
                "status": "ok",
                "data": {"foo": "bar"},
            })
        );
    }

    #[test]
    fn serializes_with_timestamps() {
        let span = Span::new(
            SpanContext::new()
                .with_trace_id(TraceId::from(1))
                .with_span_id(SpanId::from(2))
                .with_parent_span_id(SpanId::from(3))
                .with_start_timestamp(UNIX_EPOCH + Duration::from_millis(1_500)),
        );
        assert_eq!(
            serde_json::to_value(&span).unwrap(),
            json!({
                "trace_id": "00000000000000000000000000000001",
                "span_id": "0000000000000002",
                "parent_span_id": "0000000000000003",
                "start_timestamp": 1.5,
            })
        );

        span.finish_with_timestamp(UNIX_EPOCH + Duration::from_millis(2_250));
        let value = serde_json::to_value(&span).unwrap();
        assert_eq!(value["timestamp"], json!(2.25));

        let back: SpanData = serde_json::from_value(value).unwrap();
        assert_eq!(back.end_timestamp, span.end_timestamp());
    }

    #[test]
    fn children_register_with_the_tree() {
        let (_runtime, env) = test_env();
        let tree = SpanTree::new(Some(SpanRecorder::new(3)));
        let root = Span::build(SpanContext::new(), env, Some(Rc::downgrade(&tree)));

        let child = root.start_child(SpanContext::new());
        for _ in 0..9 {
            child.start_child(SpanContext::new());
        }

        let recorder = tree.recorder().unwrap().borrow();
        assert_eq!(recorder.len(), 3);
        assert!(recorder.spans().next().unwrap().ptr_eq(&child));
    }
}
