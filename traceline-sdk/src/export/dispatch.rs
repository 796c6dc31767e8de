//! Dispatchers and transports.
use crate::dsn::Dsn;
use crate::export::{Envelope, TransactionEvent};
use crate::trace::SdkInfo;
use std::cell::Cell;
use std::fmt::Debug;
use traceline::trace::{TraceError, TraceResult};
use traceline::tl_debug;

/// `Dispatcher` receives every sampled transaction once it has finished.
///
/// Dispatch is fire-and-forget from the point of view of the transaction:
/// errors are logged by the tracer and never surface to the code that
/// finished the transaction.
pub trait Dispatcher: Debug {
    /// Hands over one finished transaction.
    fn dispatch(&self, event: TransactionEvent) -> TraceResult<()>;

    /// Shuts down the dispatcher. Called once when the tracer shuts down.
    fn shutdown(&self) -> TraceResult<()> {
        Ok(())
    }
}

/// `Transport` delivers encoded envelopes, e.g. over HTTP.
pub trait Transport: Debug {
    /// Sends one envelope.
    fn send(&self, envelope: Envelope) -> TraceResult<()>;

    /// Releases any resources held by the transport.
    fn shutdown(&self) -> TraceResult<()> {
        Ok(())
    }
}

/// A [`Dispatcher`] that wraps every transaction in an [`Envelope`] and
/// passes it to a [`Transport`].
#[derive(Debug)]
pub struct EnvelopeDispatcher<T> {
    transport: T,
    sdk: SdkInfo,
    dsn: Option<Dsn>,
    is_shutdown: Cell<bool>,
}

impl<T: Transport> EnvelopeDispatcher<T> {
    /// Creates a dispatcher sending through `transport`.
    pub fn new(transport: T) -> Self {
        EnvelopeDispatcher {
            transport,
            sdk: SdkInfo::default(),
            dsn: None,
            is_shutdown: Cell::new(false),
        }
    }

    /// Sets the DSN written into envelope headers.
    pub fn with_dsn(mut self, dsn: Dsn) -> Self {
        self.dsn = Some(dsn);
        self
    }

    /// Sets the SDK identity written into envelope headers.
    pub fn with_sdk(mut self, sdk: SdkInfo) -> Self {
        self.sdk = sdk;
        self
    }

    /// The wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> Dispatcher for EnvelopeDispatcher<T> {
    fn dispatch(&self, event: TransactionEvent) -> TraceResult<()> {
        if self.is_shutdown.get() {
            return Err(TraceError::TracerShutdown);
        }
        let envelope = Envelope::from_transaction_event(&event, &self.sdk, self.dsn.as_ref())?;
        tl_debug!(
            name: "EnvelopeDispatcher.Send",
            event_id = event.event_id.simple().to_string(),
            items = envelope.len()
        );
        self.transport.send(envelope)
    }

    fn shutdown(&self) -> TraceResult<()> {
        if self.is_shutdown.replace(true) {
            return Err(TraceError::TracerShutdown);
        }
        self.transport.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ItemType;
    use crate::runtime::ManualRuntime;
    use crate::testing::InMemoryTransport;
    use crate::trace::{Config, Tracer, TransactionContext, TransactionSource};
    use serde_json::json;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn sends_one_envelope_per_transaction() {
        let dsn: Dsn = "https://abc@ingest.example.com/42".parse().unwrap();
        let transport = InMemoryTransport::default();
        let runtime = Rc::new(ManualRuntime::default());
        let mut config = Config::default();
        config.release = Some("app@1.0".into());
        config.dsn = Some(dsn.clone());
        let tracer = Tracer::builder()
            .with_config(config)
            .with_runtime(runtime.clone())
            .with_dispatcher(EnvelopeDispatcher::new(transport.clone()).with_dsn(dsn))
            .build();

        let transaction = tracer.start_transaction(
            TransactionContext::new("/users/:id", "navigation")
                .with_source(TransactionSource::Route)
                .with_sampled(true),
        );
        runtime.advance(Duration::from_millis(20));
        transaction.finish();

        let envelopes = transport.get_sent_envelopes();
        assert_eq!(envelopes.len(), 1);
        let envelope = &envelopes[0];
        assert_eq!(
            envelope.header("dsn"),
            Some(&json!("https://abc@ingest.example.com/42"))
        );
        assert_eq!(envelope.header("sdk").unwrap()["name"], json!("traceline.rust"));

        let trace = envelope.header("trace").unwrap();
        assert_eq!(trace["public_key"], json!("abc"));
        assert_eq!(trace["release"], json!("app@1.0"));
        assert_eq!(trace["transaction"], json!("/users/:id"));
        assert_eq!(trace["trace_id"], json!(transaction.trace_id().to_string()));

        let item = envelope.items().next().unwrap();
        assert_eq!(item.ty(), &ItemType::Transaction);
        let payload = item.payload_json().unwrap();
        assert_eq!(payload["transaction"], json!("/users/:id"));
        assert_eq!(payload["type"], json!("transaction"));
    }

    #[test]
    fn refuses_after_shutdown() {
        let transport = InMemoryTransport::default();
        let dispatcher = EnvelopeDispatcher::new(transport.clone());
        assert!(dispatcher.shutdown().is_ok());
        assert!(matches!(dispatcher.shutdown(), Err(TraceError::TracerShutdown)));
        assert!(transport.get_sent_envelopes().is_empty());
    }
}
