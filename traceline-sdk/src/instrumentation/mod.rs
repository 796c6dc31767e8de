//! # Instrumentation handlers
//!
//! Collaborators that observe the host environment report what they see
//! through a [`HandlerRegistry`]. Handlers run in registration order; an
//! error or panic in one is logged and the others still run.
//!
//! Two built-in handlers react to those signals on the active transaction:
//! [`register_error_instrumentation`] and
//! [`register_background_tab_detection`].
use crate::trace::{FinishReason, Tracer, FINISH_REASON_TAG};
use serde_json::Value;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use traceline::trace::{SpanStatus, TraceError, TraceResult};
use traceline::{tl_debug, tl_error};

/// Tag set on transactions finished because the document was hidden.
pub const VISIBILITY_CHANGE_TAG: &str = "visibilitychange";

/// The signal a handler listens to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// A global error.
    Error,
    /// An unhandled promise rejection or equivalent.
    UnhandledRejection,
    /// Visibility of the document changed. Payload: `{"hidden": bool}`.
    VisibilityChange,
    /// Any other signal.
    Custom(String),
}

type Handler = Rc<dyn Fn(&Value) -> TraceResult<()>>;

/// Ordered handler lists keyed by [`HandlerKind`].
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RefCell<Vec<(HandlerKind, Handler)>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<HandlerKind> = self
            .handlers
            .borrow()
            .iter()
            .map(|(kind, _)| kind.clone())
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &kinds)
            .finish()
    }
}

impl HandlerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    /// Adds a handler for `kind`.
    pub fn register<F>(&self, kind: HandlerKind, handler: F)
    where
        F: Fn(&Value) -> TraceResult<()> + 'static,
    {
        self.handlers.borrow_mut().push((kind, Rc::new(handler)));
    }

    /// Number of handlers registered for `kind`.
    pub fn len(&self, kind: &HandlerKind) -> usize {
        self.handlers
            .borrow()
            .iter()
            .filter(|(k, _)| k == kind)
            .count()
    }

    /// Runs every handler for `kind` with `payload`. Returns how many of
    /// them failed.
    pub fn trigger(&self, kind: &HandlerKind, payload: &Value) -> usize {
        // Handlers may register more handlers.
        let handlers: Vec<Handler> = self
            .handlers
            .borrow()
            .iter()
            .filter(|(k, _)| k == kind)
            .map(|(_, handler)| handler.clone())
            .collect();

        let mut failures = 0;
        for handler in handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failures += 1;
                    tl_error!(
                        name: "HandlerRegistry.HandlerFailed",
                        kind = format!("{kind:?}"),
                        error = err.to_string(),
                    );
                }
                Err(panic) => {
                    failures += 1;
                    tl_error!(
                        name: "HandlerRegistry.HandlerPanicked",
                        kind = format!("{kind:?}"),
                        error = panic_message(panic.as_ref()),
                    );
                }
            }
        }
        failures
    }
}

/// Marks the active transaction as failed on every error and unhandled
/// rejection.
pub fn register_error_instrumentation(registry: &HandlerRegistry, tracer: &Tracer) {
    for kind in [HandlerKind::Error, HandlerKind::UnhandledRejection] {
        let tracer = tracer.clone();
        registry.register(kind, move |_| {
            if let Some(transaction) = tracer.active_transaction() {
                tl_debug!(
                    name: "ErrorInstrumentation.MarkFailed",
                    transaction = transaction.name(),
                );
                transaction.set_status(SpanStatus::InternalError);
            }
            Ok(())
        });
    }
}

/// Cancels and finishes the active transaction when the document is hidden.
///
/// A status that is already set is kept.
pub fn register_background_tab_detection(registry: &HandlerRegistry, tracer: &Tracer) {
    let tracer = tracer.clone();
    registry.register(HandlerKind::VisibilityChange, move |payload| {
        let hidden = payload
            .get("hidden")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                TraceError::HandlerError(format!("visibility payload without `hidden`: {payload}"))
            })?;
        if !hidden {
            return Ok(());
        }
        let Some(transaction) = tracer.active_transaction() else {
            return Ok(());
        };

        tl_debug!(
            name: "BackgroundTab.Cancel",
            op = transaction.op().unwrap_or_default(),
        );
        if transaction.status().is_none() {
            transaction.set_status(SpanStatus::Cancelled);
        }
        transaction.set_tag(VISIBILITY_CHANGE_TAG, "document.hidden");
        transaction.set_tag(FINISH_REASON_TAG, FinishReason::DocumentHidden.as_str());
        transaction.finish();
        Ok(())
    });
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
