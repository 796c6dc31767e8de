//! In-memory dispatchers and transports for testing purpose.
use crate::export::{Dispatcher, Envelope, TransactionEvent, Transport};
use std::cell::RefCell;
use std::rc::Rc;
use traceline::trace::TraceResult;

pub use crate::runtime::ManualRuntime;

/// A dispatcher that keeps every finished transaction in memory.
///
/// # Example
///
/// ```
/// # use traceline_sdk::testing::InMemoryDispatcher;
/// # use traceline_sdk::trace::{Tracer, TransactionContext};
/// let dispatcher = InMemoryDispatcher::default();
/// let tracer = Tracer::builder().with_dispatcher(dispatcher.clone()).build();
///
/// tracer
///     .start_transaction(TransactionContext::new("checkout", "task").with_sampled(true))
///     .finish();
///
/// assert_eq!(dispatcher.get_finished_events().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryDispatcher {
    events: Rc<RefCell<Vec<TransactionEvent>>>,
}

impl InMemoryDispatcher {
    /// Returns the finished transactions in dispatch order.
    pub fn get_finished_events(&self) -> Vec<TransactionEvent> {
        self.events.borrow().clone()
    }

    /// Clears the stored transactions.
    pub fn reset(&self) {
        self.events.borrow_mut().clear();
    }
}

impl Dispatcher for InMemoryDispatcher {
    fn dispatch(&self, event: TransactionEvent) -> TraceResult<()> {
        self.events.borrow_mut().push(event);
        Ok(())
    }
}

/// A transport that keeps every envelope in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTransport {
    envelopes: Rc<RefCell<Vec<Envelope>>>,
}

impl InMemoryTransport {
    /// Returns the sent envelopes in order.
    pub fn get_sent_envelopes(&self) -> Vec<Envelope> {
        self.envelopes.borrow().clone()
    }

    /// Clears the stored envelopes.
    pub fn reset(&self) {
        self.envelopes.borrow_mut().clear();
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, envelope: Envelope) -> TraceResult<()> {
        self.envelopes.borrow_mut().push(envelope);
        Ok(())
    }
}
