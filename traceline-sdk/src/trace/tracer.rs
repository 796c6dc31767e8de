//! # Tracer
//!
//! The `Tracer` starts transactions, decides their sampling and owns the
//! scope: the one active transaction that instrumentation attaches to.
//! Finished transactions are handed to every configured [`Dispatcher`].
//!
//! Cloning a `Tracer` creates a new reference to the same tracer. Dropping
//! the last reference shuts the dispatchers down.
//!
//! ```
//! use traceline_sdk::trace::{Tracer, TransactionContext};
//! use traceline_sdk::trace::SpanContext;
//!
//! let tracer = Tracer::builder().build();
//! let transaction = tracer.start_transaction(TransactionContext::new("GET /users", "http.server"));
//! let child = transaction.start_child(SpanContext::new().with_op("db.query"));
//! child.finish();
//! transaction.finish();
//! ```
use crate::export::{Dispatcher, TransactionEvent};
use crate::runtime::{LoopRuntime, Runtime};
use crate::trace::span::SpanEnv;
use crate::trace::{
    Config, IdGenerator, IdleOptions, IdleTransaction, RecorderPolicy, SamplingContext,
    SamplingMethod, SamplingResult, ShouldSample, Transaction, TransactionContext,
    TransactionSampling,
};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use traceline::trace::{TraceError, TraceResult};
use traceline::{tl_debug, tl_error, tl_info};

pub(crate) struct TracerInner {
    pub(crate) config: Config,
    dispatchers: Vec<Box<dyn Dispatcher>>,
    pub(crate) env: Rc<SpanEnv>,
    pub(crate) scope: RefCell<Option<Transaction>>,
    is_shutdown: Cell<bool>,
}

impl TracerInner {
    pub(crate) fn dispatch(&self, event: TransactionEvent) {
        if self.is_shutdown.get() {
            tl_debug!(
                name: "Tracer.Dispatch.AfterShutdown",
                transaction = event.transaction,
            );
            return;
        }
        if self.dispatchers.is_empty() {
            tl_debug!(
                name: "Tracer.Dispatch.NoDispatcher",
                transaction = event.transaction,
            );
            return;
        }
        for dispatcher in &self.dispatchers {
            if let Err(err) = dispatcher.dispatch(event.clone()) {
                tl_error!(
                    name: "Tracer.Dispatch.Failed",
                    transaction = event.transaction.clone(),
                    error = format!("{err}"),
                );
            }
        }
    }

    fn shutdown(&self) -> Vec<TraceResult<()>> {
        self.dispatchers
            .iter()
            .map(|dispatcher| {
                let result = dispatcher.shutdown();
                if let Err(err) = &result {
                    tl_debug!(
                        name: "Tracer.Shutdown.DispatcherError",
                        error = format!("{err}"),
                    );
                }
                result
            })
            .collect()
    }
}

impl Drop for TracerInner {
    fn drop(&mut self) {
        if !self.is_shutdown.replace(true) {
            let _ = self.shutdown();
        } else {
            tl_debug!(
                name: "Tracer.Drop.AlreadyShutdown",
                message = "tracer was already shut down",
            );
        }
    }
}

impl fmt::Debug for TracerInner {
    /// The scope is left out; the active transaction refers back to the
    /// tracer.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("config", &self.config)
            .field("dispatchers", &self.dispatchers)
            .field("is_shutdown", &self.is_shutdown.get())
            .finish()
    }
}

/// Starts transactions and routes finished ones to dispatchers.
#[derive(Clone, Debug)]
pub struct Tracer {
    inner: Rc<TracerInner>,
}

impl Default for Tracer {
    fn default() -> Self {
        Tracer::builder().build()
    }
}

impl Tracer {
    /// Create a new [`Tracer`] builder.
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// Config associated with this tracer
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Runtime that provides the clock and timers.
    pub fn runtime(&self) -> Rc<dyn Runtime> {
        self.inner.env.runtime.clone()
    }

    /// Starts a transaction.
    ///
    /// The sampling decision is made here: an explicit `sampled` on the
    /// context wins, otherwise the configured sampler decides. Unsampled
    /// transactions still create spans but record nothing and send nothing.
    pub fn start_transaction(&self, mut cx: TransactionContext) -> Transaction {
        let trace_id = *cx
            .span
            .trace_id
            .get_or_insert_with(|| self.inner.env.id_generator.new_trace_id());

        let sampled = if self.inner.is_shutdown.get() {
            tl_debug!(
                name: "Tracer.StartTransaction.AfterShutdown",
                transaction = cx.name.clone(),
            );
            false
        } else {
            let result = self.sample(&cx, trace_id);
            cx.metadata.transaction_sampling = Some(TransactionSampling {
                rate: result.rate,
                method: result.method,
            });
            result.sampled
        };

        Transaction::new(cx, sampled, &self.inner)
    }

    /// Starts a transaction that finishes itself once its children are done.
    pub fn start_idle_transaction(
        &self,
        cx: TransactionContext,
        options: IdleOptions,
    ) -> IdleTransaction {
        IdleTransaction::new(self.start_transaction(cx), options)
    }

    fn sample(&self, cx: &TransactionContext, trace_id: traceline::TraceId) -> SamplingResult {
        if let Some(sampled) = cx.span.sampled {
            return SamplingResult {
                sampled,
                rate: None,
                method: SamplingMethod::ExplicitlySet,
            };
        }
        let result = self.inner.config.sampler.should_sample(&SamplingContext {
            trace_id,
            name: &cx.name,
            op: cx.span.op.as_deref(),
            parent_sampled: cx.parent_sampled,
        });
        if !result.sampled {
            tl_debug!(
                name: "Tracer.Sampling.Discarded",
                transaction = cx.name.clone(),
                method = result.method.as_str(),
            );
        }
        result
    }

    /// The active transaction, if any.
    pub fn active_transaction(&self) -> Option<Transaction> {
        self.inner.scope.borrow().clone()
    }

    /// Replaces the active transaction.
    pub fn set_active_transaction(&self, transaction: Option<Transaction>) {
        *self.inner.scope.borrow_mut() = transaction;
    }

    /// Shuts down every dispatcher. Transactions finished afterwards are
    /// dropped and new transactions are not sampled.
    ///
    /// Returns [`TraceError::TracerShutdown`] when called twice.
    pub fn shutdown(&self) -> TraceResult<()> {
        if self.inner.is_shutdown.replace(true) {
            return Err(TraceError::TracerShutdown);
        }
        self.inner.scope.borrow_mut().take();
        let errors: Vec<String> = self
            .inner
            .shutdown()
            .into_iter()
            .filter_map(Result::err)
            .map(|err| err.to_string())
            .collect();
        if errors.is_empty() {
            tl_info!(name: "Tracer.Shutdown", message = "tracer shut down");
            Ok(())
        } else {
            Err(TraceError::from(format!(
                "dispatcher shutdown failed: {}",
                errors.join(", ")
            )))
        }
    }
}

/// Builder for [`Tracer`].
#[derive(Debug, Default)]
pub struct TracerBuilder {
    config: Config,
    dispatchers: Vec<Box<dyn Dispatcher>>,
    runtime: Option<Rc<dyn Runtime>>,
}

impl TracerBuilder {
    /// The sdk [`Config`] that this tracer will use.
    pub fn with_config(self, config: Config) -> Self {
        TracerBuilder { config, ..self }
    }

    /// Specify the sampler to be used.
    pub fn with_sampler<T: ShouldSample + 'static>(mut self, sampler: T) -> Self {
        self.config.sampler = Box::new(sampler);
        self
    }

    /// Specify the id generator to be used.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.config.id_generator = Rc::new(id_generator);
        self
    }

    /// Specify the number of child spans recorded per transaction.
    pub fn with_max_spans(mut self, max_spans: usize) -> Self {
        self.config.max_spans = max_spans;
        self
    }

    /// Specify what happens to spans past `max_spans`.
    pub fn with_recorder_policy(mut self, policy: RecorderPolicy) -> Self {
        self.config.recorder_policy = policy;
        self
    }

    /// Adds a dispatcher that receives every finished, sampled transaction.
    pub fn with_dispatcher<T: Dispatcher + 'static>(mut self, dispatcher: T) -> Self {
        self.dispatchers.push(Box::new(dispatcher));
        self
    }

    /// Specify the runtime providing the clock and timers. Defaults to a
    /// [`LoopRuntime`].
    pub fn with_runtime(mut self, runtime: Rc<dyn Runtime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Create a new tracer from this configuration.
    pub fn build(self) -> Tracer {
        let runtime = self
            .runtime
            .unwrap_or_else(|| Rc::new(LoopRuntime::new()));
        let env = SpanEnv::new(self.config.id_generator.clone(), runtime);
        tl_debug!(
            name: "Tracer.Built",
            max_spans = self.config.max_spans,
            dispatchers = self.dispatchers.len(),
        );
        Tracer {
            inner: Rc::new(TracerInner {
                config: self.config,
                dispatchers: self.dispatchers,
                env,
                scope: RefCell::new(None),
                is_shutdown: Cell::new(false),
            }),
        }
    }
}
