//! Transaction export
//!
//! A finished, sampled transaction becomes a [`TransactionEvent`], which the
//! tracer passes to its [`Dispatcher`]s. [`EnvelopeDispatcher`] wraps events
//! in an [`Envelope`] for a [`Transport`].
mod dispatch;
mod envelope;
mod event;

pub use dispatch::{Dispatcher, EnvelopeDispatcher, Transport};
pub use envelope::{Envelope, EnvelopeError, Item, ItemHeaders, ItemPayload, ItemType};
pub use event::{EventContexts, EventType, Measurement, TransactionEvent, TransactionInfo};
