//! # Idle transactions
//!
//! An idle transaction finishes itself once its children go quiet. Three
//! timers drive it:
//!
//! - the idle timer, armed while no child is running; when it fires the
//!   transaction ends at the end of its last finished child;
//! - the final timer, a hard ceiling measured from the start;
//! - the heartbeat, which gives up when the set of running children has not
//!   changed for three beats in a row.
//!
//! Whichever finishes the transaction first cancels the others.
use crate::instrumentation::panic_message;
use crate::runtime::{Runtime, TimerHandle};
use crate::trace::span::{IdleBehavior, TransactionBehavior};
use crate::trace::{Span, Transaction};
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};
use std::time::{Duration, SystemTime};
use traceline::trace::SpanStatus;
use traceline::{tl_debug, tl_error, SpanId};

/// Default time without running children before the transaction finishes.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Default upper bound on the transaction's duration.
pub const DEFAULT_FINAL_TIMEOUT: Duration = Duration::from_millis(30000);
/// Default interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Tag recording why an idle transaction finished.
pub const FINISH_REASON_TAG: &str = "finishReason";

const MAX_STALLED_HEARTBEATS: u32 = 3;

/// Why an idle transaction finished.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FinishReason {
    /// The running children did not change for three heartbeats.
    HeartbeatFailed,
    /// No child ran for the idle timeout.
    IdleTimeout,
    /// The page went to the background.
    DocumentHidden,
    /// The final timeout was reached.
    FinalTimeout,
    /// Finished by a caller.
    #[default]
    ExternalFinish,
}

impl FinishReason {
    /// Value of the [`FINISH_REASON_TAG`] tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::HeartbeatFailed => "heartbeatFailed",
            FinishReason::IdleTimeout => "idleTimeout",
            FinishReason::DocumentHidden => "documentHidden",
            FinishReason::FinalTimeout => "finalTimeout",
            FinishReason::ExternalFinish => "externalFinish",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeouts of an idle transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleOptions {
    /// Quiet time after which the transaction finishes.
    pub idle_timeout: Duration,
    /// Hard ceiling from the start.
    pub final_timeout: Duration,
    /// Interval between activity checks.
    pub heartbeat_interval: Duration,
    /// Make the transaction the tracer's active transaction while it runs.
    pub on_scope: bool,
}

impl Default for IdleOptions {
    fn default() -> Self {
        IdleOptions {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            final_timeout: DEFAULT_FINAL_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            on_scope: false,
        }
    }
}

impl IdleOptions {
    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Sets the final timeout.
    pub fn with_final_timeout(mut self, final_timeout: Duration) -> Self {
        self.final_timeout = final_timeout;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Sets [`on_scope`](IdleOptions::on_scope).
    pub fn with_on_scope(mut self, on_scope: bool) -> Self {
        self.on_scope = on_scope;
        self
    }
}

type BeforeFinish = Box<dyn FnOnce(&Transaction, SystemTime)>;

#[derive(Default)]
struct IdleState {
    activities: Vec<SpanId>,
    finished: bool,
    idle_timer: Option<TimerHandle>,
    final_timer: Option<TimerHandle>,
    heartbeat_timer: Option<TimerHandle>,
    heartbeat_counter: u32,
    prev_heartbeat: Option<String>,
    last_activity_end: Option<SystemTime>,
    before_finish: Vec<BeforeFinish>,
    finish_reason: FinishReason,
}

struct IdleInner {
    transaction: Transaction,
    runtime: Rc<dyn Runtime>,
    options: IdleOptions,
    state: RefCell<IdleState>,
    this: Weak<IdleInner>,
}

/// A [`Transaction`] that finishes itself once its children are done.
#[derive(Clone)]
pub struct IdleTransaction {
    inner: Rc<IdleInner>,
}

impl IdleTransaction {
    pub(crate) fn new(transaction: Transaction, options: IdleOptions) -> Self {
        let runtime = transaction.runtime().clone();
        let inner = Rc::new_cyclic(|this| IdleInner {
            transaction,
            runtime,
            options,
            state: RefCell::new(IdleState::default()),
            this: this.clone(),
        });

        let behavior: Weak<dyn TransactionBehavior> = Rc::downgrade(&inner) as Weak<dyn TransactionBehavior>;
        inner.transaction.set_behavior(behavior);
        let observer: Weak<dyn IdleBehavior> = Rc::downgrade(&inner) as Weak<dyn IdleBehavior>;
        inner.transaction.inner.tree.set_observer(observer);

        if options.on_scope {
            if let Some(tracer) = inner.transaction.inner.tracer.upgrade() {
                *tracer.scope.borrow_mut() = Some(inner.transaction.clone());
            }
        }

        inner.restart_idle_timer(None);
        let final_timer = inner.schedule(options.final_timeout, IdleInner::on_final_timeout);
        let heartbeat_timer = inner.schedule(options.heartbeat_interval, IdleInner::beat);
        {
            let mut state = inner.state.borrow_mut();
            state.final_timer = final_timer;
            state.heartbeat_timer = heartbeat_timer;
        }
        tl_debug!(
            name: "IdleTransaction.Started",
            span_id = inner.transaction.span_id().to_string(),
        );

        IdleTransaction { inner }
    }

    /// Registers a callback run right before the transaction finishes, with
    /// the finish timestamp.
    pub fn register_before_finish<F>(&self, callback: F)
    where
        F: FnOnce(&Transaction, SystemTime) + 'static,
    {
        self.inner
            .state
            .borrow_mut()
            .before_finish
            .push(Box::new(callback));
    }

    /// Sets the reason reported when the transaction finishes.
    pub fn set_finish_reason(&self, reason: FinishReason) {
        self.inner.state.borrow_mut().finish_reason = reason;
    }

    /// Number of children that started and have not finished yet.
    pub fn activities(&self) -> usize {
        self.inner.state.borrow().activities.len()
    }

    /// The plain transaction handle.
    pub fn transaction(&self) -> &Transaction {
        &self.inner.transaction
    }
}

impl Deref for IdleTransaction {
    type Target = Transaction;

    fn deref(&self) -> &Transaction {
        &self.inner.transaction
    }
}

impl fmt::Debug for IdleTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("IdleTransaction")
            .field("transaction", &self.inner.transaction)
            .field("activities", &state.activities.len())
            .field("finished", &state.finished)
            .field("options", &self.inner.options)
            .finish()
    }
}

impl IdleInner {
    fn schedule(&self, delay: Duration, callback: fn(&IdleInner)) -> Option<TimerHandle> {
        let this = self.this.upgrade()?;
        Some(
            self.runtime
                .schedule(delay, Box::new(move || callback(&this))),
        )
    }

    fn cancel_idle_timer(&self) {
        let timer = self.state.borrow_mut().idle_timer.take();
        if let Some(timer) = timer {
            timer.cancel();
        }
    }

    fn restart_idle_timer(&self, last_activity_end: Option<SystemTime>) {
        self.cancel_idle_timer();
        let timer = self.schedule(self.options.idle_timeout, IdleInner::on_idle_timeout);
        let mut state = self.state.borrow_mut();
        state.idle_timer = timer;
        if last_activity_end.is_some() {
            state.last_activity_end = last_activity_end;
        }
    }

    fn on_idle_timeout(&self) {
        let end = {
            let mut state = self.state.borrow_mut();
            state.idle_timer = None;
            if state.finished || !state.activities.is_empty() {
                return;
            }
            state.finish_reason = FinishReason::IdleTimeout;
            state.last_activity_end
        };
        self.finish_idle(end);
    }

    fn on_final_timeout(&self) {
        {
            let mut state = self.state.borrow_mut();
            state.final_timer = None;
            if state.finished {
                return;
            }
            state.finish_reason = FinishReason::FinalTimeout;
        }
        self.transaction.set_status(SpanStatus::DeadlineExceeded);
        self.finish_idle(None);
    }

    fn beat(&self) {
        let stalled = {
            let mut state = self.state.borrow_mut();
            state.heartbeat_timer = None;
            if state.finished {
                return;
            }
            let heartbeat: String = state
                .activities
                .iter()
                .map(|span_id| span_id.to_string())
                .collect();
            if state.prev_heartbeat.as_deref() == Some(heartbeat.as_str()) {
                state.heartbeat_counter += 1;
            } else {
                state.heartbeat_counter = 1;
            }
            state.prev_heartbeat = Some(heartbeat);
            state.heartbeat_counter >= MAX_STALLED_HEARTBEATS
        };

        if stalled {
            tl_debug!(
                name: "IdleTransaction.HeartbeatFailed",
                span_id = self.transaction.span_id().to_string(),
            );
            self.state.borrow_mut().finish_reason = FinishReason::HeartbeatFailed;
            self.transaction.set_status(SpanStatus::DeadlineExceeded);
            self.finish_idle(None);
        } else {
            let timer = self.schedule(self.options.heartbeat_interval, IdleInner::beat);
            self.state.borrow_mut().heartbeat_timer = timer;
        }
    }

    fn finish_idle(&self, end: Option<SystemTime>) {
        let end = end.unwrap_or_else(|| self.runtime.now());
        let (timers, callbacks, reason) = {
            let mut state = self.state.borrow_mut();
            if state.finished {
                return;
            }
            state.finished = true;
            state.activities.clear();
            (
                [
                    state.idle_timer.take(),
                    state.final_timer.take(),
                    state.heartbeat_timer.take(),
                ],
                mem::take(&mut state.before_finish),
                state.finish_reason,
            )
        };
        // Cancelled timers leave the queue, taking their handles to this
        // transaction with them.
        for timer in timers.into_iter().flatten() {
            timer.cancel();
        }

        let transaction = &self.transaction;
        if transaction.tag(FINISH_REASON_TAG).is_none() {
            transaction.set_tag(FINISH_REASON_TAG, reason.as_str());
        }
        tl_debug!(
            name: "IdleTransaction.Finishing",
            span_id = transaction.span_id().to_string(),
            reason = reason.as_str(),
        );

        for callback in callbacks {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callback(transaction, end)))
            {
                tl_error!(
                    name: "IdleTransaction.BeforeFinishPanicked",
                    error = panic_message(panic.as_ref()),
                );
            }
        }

        if let Some(recorder) = transaction.inner.tree.recorder() {
            let spans: Vec<Span> = recorder.borrow().spans().cloned().collect();
            for span in spans.iter().filter(|span| !span.is_finished()) {
                tl_debug!(
                    name: "IdleTransaction.CancellingSpan",
                    span_id = span.span_id().to_string(),
                );
                span.set_status(SpanStatus::Cancelled);
                span.finish_span(Some(end));
            }
            recorder
                .borrow_mut()
                .retain(|span| span.start_timestamp() < end);
        }

        if self.options.on_scope {
            if let Some(tracer) = transaction.inner.tracer.upgrade() {
                let mut scope = tracer.scope.borrow_mut();
                if scope
                    .as_ref()
                    .is_some_and(|active| active.ptr_eq(transaction))
                {
                    *scope = None;
                }
            }
        }

        transaction.inner.finish(Some(end));
    }
}

impl TransactionBehavior for IdleInner {
    fn finish_transaction(&self, end: Option<SystemTime>) {
        self.finish_idle(end);
    }
}

impl IdleBehavior for IdleInner {
    fn on_child_start(&self, span: &Span) {
        {
            let mut state = self.state.borrow_mut();
            if state.finished {
                return;
            }
            state.activities.push(span.span_id());
        }
        tl_debug!(
            name: "IdleTransaction.PushActivity",
            span_id = span.span_id().to_string(),
        );
        self.cancel_idle_timer();
    }

    fn on_child_finish(&self, span: &Span, end: SystemTime) {
        let idle = {
            let mut state = self.state.borrow_mut();
            if state.finished {
                return;
            }
            let span_id = span.span_id();
            let Some(position) = state.activities.iter().position(|id| *id == span_id) else {
                return;
            };
            state.activities.remove(position);
            state.activities.is_empty()
        };
        tl_debug!(
            name: "IdleTransaction.PopActivity",
            span_id = span.span_id().to_string(),
        );
        if idle {
            self.restart_idle_timer(Some(end));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{LoopRuntime, ManualRuntime};
    use crate::testing::InMemoryDispatcher;
    use crate::trace::{SpanContext, Tracer, TransactionContext};
    use std::cell::Cell;

    fn setup() -> (Tracer, InMemoryDispatcher, Rc<ManualRuntime>) {
        let runtime = Rc::new(ManualRuntime::default());
        let dispatcher = InMemoryDispatcher::default();
        let tracer = Tracer::builder()
            .with_runtime(runtime.clone())
            .with_dispatcher(dispatcher.clone())
            .build();
        (tracer, dispatcher, runtime)
    }

    fn start(tracer: &Tracer, options: IdleOptions) -> IdleTransaction {
        tracer.start_idle_transaction(
            TransactionContext::new("/", "pageload").with_sampled(true),
            options,
        )
    }

    #[test]
    fn finishes_after_idle_timeout_without_children() {
        let (tracer, dispatcher, runtime) = setup();
        let start_time = runtime.now();
        let transaction = start(&tracer, IdleOptions::default());

        runtime.advance(Duration::from_millis(999));
        assert!(!transaction.is_finished());
        runtime.advance(Duration::from_millis(1));
        assert!(transaction.is_finished());
        assert_eq!(
            transaction.end_timestamp(),
            Some(start_time + DEFAULT_IDLE_TIMEOUT)
        );
        assert_eq!(
            transaction.tag(FINISH_REASON_TAG).as_deref(),
            Some("idleTimeout")
        );
        assert_eq!(dispatcher.get_finished_events().len(), 1);
    }

    #[test]
    fn running_children_hold_the_transaction_open() {
        let (tracer, _dispatcher, runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default());
        let child = transaction.start_child(SpanContext::new().with_op("http.client"));
        assert_eq!(transaction.activities(), 1);

        runtime.advance(Duration::from_millis(4000));
        assert!(!transaction.is_finished());

        child.finish();
        let child_end = child.end_timestamp();
        assert_eq!(transaction.activities(), 0);
        runtime.advance(Duration::from_millis(999));
        assert!(!transaction.is_finished());
        runtime.advance(Duration::from_millis(1));
        assert!(transaction.is_finished());
        assert_eq!(transaction.end_timestamp(), child_end);
    }

    #[test]
    fn final_timeout_wins() {
        let (tracer, _dispatcher, runtime) = setup();
        let transaction = start(
            &tracer,
            IdleOptions::default().with_heartbeat_interval(Duration::from_secs(60)),
        );
        let child = transaction.start_child(SpanContext::new());

        runtime.advance(DEFAULT_FINAL_TIMEOUT);
        assert!(transaction.is_finished());
        assert_eq!(transaction.status(), Some(SpanStatus::DeadlineExceeded));
        assert_eq!(
            transaction.tag(FINISH_REASON_TAG).as_deref(),
            Some("finalTimeout")
        );
        assert_eq!(child.status(), Some(SpanStatus::Cancelled));
        assert_eq!(child.end_timestamp(), transaction.end_timestamp());
        assert_eq!(runtime.pending(), 0);
    }

    #[test]
    fn heartbeat_gives_up_on_stalled_children() {
        let (tracer, _dispatcher, runtime) = setup();
        let start_time = runtime.now();
        let transaction = start(&tracer, IdleOptions::default());
        let _stuck = transaction.start_child(SpanContext::new());

        runtime.advance(Duration::from_millis(14_999));
        assert!(!transaction.is_finished());
        runtime.advance(Duration::from_millis(1));
        assert!(transaction.is_finished());
        assert_eq!(
            transaction.end_timestamp(),
            Some(start_time + Duration::from_millis(15_000))
        );
        assert_eq!(transaction.status(), Some(SpanStatus::DeadlineExceeded));
        assert_eq!(
            transaction.tag(FINISH_REASON_TAG).as_deref(),
            Some("heartbeatFailed")
        );
    }

    #[test]
    fn changing_activity_resets_heartbeat() {
        let (tracer, _dispatcher, runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default());
        let first = transaction.start_child(SpanContext::new());

        runtime.advance(Duration::from_millis(12_000));
        let _second = transaction.start_child(SpanContext::new());
        first.finish();

        runtime.advance(Duration::from_millis(5_000));
        assert!(!transaction.is_finished());
    }

    #[test]
    fn external_finish_cancels_timers() {
        let (tracer, dispatcher, runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default());
        assert_eq!(runtime.pending(), 3);

        transaction.finish();
        assert!(transaction.is_finished());
        assert_eq!(runtime.pending(), 0);
        assert_eq!(
            transaction.tag(FINISH_REASON_TAG).as_deref(),
            Some("externalFinish")
        );

        runtime.advance(Duration::from_secs(60));
        assert_eq!(dispatcher.get_finished_events().len(), 1);
    }

    #[test]
    fn finished_transaction_leaves_no_timers_behind() {
        let runtime = Rc::new(LoopRuntime::new());
        let tracer = Tracer::builder().with_runtime(runtime.clone()).build();

        let mut released = Vec::new();
        for _ in 0..100 {
            let transaction = start(&tracer, IdleOptions::default());
            released.push(Rc::downgrade(&transaction.inner));
            transaction.finish();
        }

        assert_eq!(runtime.next_deadline(), None);
        assert!(released.iter().all(|inner| inner.upgrade().is_none()));
    }

    #[test]
    fn unreachable_final_timeout_is_never_armed() {
        let (tracer, dispatcher, runtime) = setup();
        let transaction = start(
            &tracer,
            IdleOptions::default().with_final_timeout(Duration::MAX),
        );
        assert_eq!(runtime.pending(), 2);

        runtime.advance(DEFAULT_IDLE_TIMEOUT);
        assert!(transaction.is_finished());
        assert_eq!(
            transaction.tag(FINISH_REASON_TAG).as_deref(),
            Some("idleTimeout")
        );
        assert_eq!(dispatcher.get_finished_events().len(), 1);
    }

    #[test]
    fn before_finish_callbacks_run_once_and_survive_panics() {
        let (tracer, _dispatcher, runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default());
        let calls = Rc::new(Cell::new(0));

        transaction.register_before_finish(|_, _| panic!("boom"));
        let counter = calls.clone();
        let expected_end = runtime.now() + DEFAULT_IDLE_TIMEOUT;
        transaction.register_before_finish(move |transaction, end| {
            assert_eq!(end, expected_end);
            transaction.set_tag("checked", "yes");
            counter.set(counter.get() + 1);
        });

        runtime.advance(Duration::from_secs(2));
        transaction.finish();
        assert_eq!(calls.get(), 1);
        assert_eq!(transaction.tag("checked").as_deref(), Some("yes"));
    }

    #[test]
    fn children_started_at_or_after_the_end_are_dropped() {
        let (tracer, dispatcher, runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default());
        let end = runtime.now() + Duration::from_millis(10);
        transaction
            .start_child(SpanContext::new().with_description("early"))
            .finish_with_timestamp(end);
        transaction
            .start_child(SpanContext::new().with_description("late").with_start_timestamp(end + Duration::from_millis(5)))
            .finish_with_timestamp(end + Duration::from_millis(6));
        transaction
            .start_child(SpanContext::new().with_description("at_end").with_start_timestamp(end))
            .finish_with_timestamp(end);

        transaction.finish_with_timestamp(end);

        let events = dispatcher.get_finished_events();
        let descriptions: Vec<_> = events[0]
            .spans
            .iter()
            .filter_map(|span| span.description.clone())
            .collect();
        assert_eq!(descriptions, vec!["early"]);
    }

    #[test]
    fn child_after_finish_is_left_alone() {
        let (tracer, _dispatcher, runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default());
        transaction.finish();

        let late = transaction.start_child(SpanContext::new());
        assert_eq!(transaction.activities(), 0);
        runtime.advance(Duration::from_secs(60));
        assert!(!late.is_finished());
    }

    #[test]
    fn on_scope_sets_and_clears_active_transaction() {
        let (tracer, _dispatcher, runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default().with_on_scope(true));
        assert!(tracer
            .active_transaction()
            .is_some_and(|active| active.ptr_eq(&transaction)));

        runtime.advance(DEFAULT_IDLE_TIMEOUT);
        assert!(tracer.active_transaction().is_none());
    }

    #[test]
    fn explicit_finish_reason_is_reported() {
        let (tracer, _dispatcher, _runtime) = setup();
        let transaction = start(&tracer, IdleOptions::default());
        transaction.set_finish_reason(FinishReason::DocumentHidden);
        transaction.finish();
        assert_eq!(
            transaction.tag(FINISH_REASON_TAG).as_deref(),
            Some("documentHidden")
        );
    }
}
