//! # Trace SDK
//!
//! The tracing SDK consists of a few main structs:
//!
//! * The [`Tracer`] which starts transactions, samples them and owns the
//!   active transaction.
//! * The [`Span`], a handle to one timed unit of work.
//! * The [`Transaction`], the root span of a tree, which records its
//!   descendants in a [`SpanRecorder`] and is sent once finished.
//! * The [`IdleTransaction`], a transaction that finishes itself once its
//!   children go quiet.
mod config;
mod id_generator;
mod idle;
mod sampler;
mod span;
mod span_recorder;
mod tracer;
mod transaction;

pub use config::{Config, SdkInfo, DEFAULT_MAX_SPANS};
#[cfg(any(test, feature = "testing"))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use idle::{
    FinishReason, IdleOptions, IdleTransaction, DEFAULT_FINAL_TIMEOUT,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_IDLE_TIMEOUT, FINISH_REASON_TAG,
};
pub use sampler::{
    FnSampler, Sampler, SamplingContext, SamplingMethod, SamplingResult, ShouldSample,
};
pub use span::{
    Span, SpanContext, SpanData, TraceContext, HTTP_RESPONSE_STATUS_CODE_DATA,
    HTTP_STATUS_CODE_TAG,
};
pub use span_recorder::{RecorderPolicy, SpanRecorder};
pub use tracer::{Tracer, TracerBuilder};
pub use transaction::{
    Transaction, TransactionContext, TransactionMetadata, TransactionSampling,
    TransactionSource, UNLABELED_TRANSACTION,
};
