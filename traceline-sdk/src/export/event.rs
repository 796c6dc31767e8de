use crate::trace::{SpanData, TraceContext, TransactionSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use traceline::baggage::Baggage;
use uuid::Uuid;

/// Value of the `type` field of an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A finished transaction.
    #[default]
    Transaction,
}

/// A named measurement recorded on a transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Measured value.
    pub value: f64,
    /// Unit, e.g. `millisecond`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// The `contexts` object of an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventContexts {
    /// Root span of the transaction.
    pub trace: TraceContext,
}

/// The `transaction_info` object of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInfo {
    /// Where the transaction name came from.
    pub source: TransactionSource,
}

/// A finished transaction, in the shape it is sent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    /// Unique id, serialized as 32 hex characters.
    #[serde(with = "uuid::serde::simple")]
    pub event_id: Uuid,
    /// Always `transaction`.
    #[serde(rename = "type", default)]
    pub ty: EventType,
    /// Transaction name.
    pub transaction: String,
    /// Trace context of the root span.
    pub contexts: EventContexts,
    /// Finished, recorded child spans.
    #[serde(default)]
    pub spans: Vec<SpanData>,
    /// Start of the root span.
    #[serde(with = "traceline::time::seconds")]
    pub start_timestamp: SystemTime,
    /// End of the transaction.
    #[serde(with = "traceline::time::seconds")]
    pub timestamp: SystemTime,
    /// Tags of the root span.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Measurements.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub measurements: BTreeMap<String, Measurement>,
    /// Name source, when one was set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_info: Option<TransactionInfo>,
    /// Release of the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Environment of the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    /// Frozen dynamic sampling context; sent as the envelope `trace` header.
    #[serde(skip)]
    pub dynamic_sampling_context: Option<Baggage>,
}
