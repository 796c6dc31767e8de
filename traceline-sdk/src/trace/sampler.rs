use serde::{Deserialize, Serialize};
use std::fmt;
use traceline::{tl_debug, tl_warn, TraceId};

/// Input to a sampling decision.
#[derive(Clone, Copy, Debug)]
pub struct SamplingContext<'a> {
    /// Trace the new transaction belongs to.
    pub trace_id: TraceId,
    /// Transaction name.
    pub name: &'a str,
    /// Transaction operation, e.g. `pageload`.
    pub op: Option<&'a str>,
    /// Upstream decision, when the trace was continued from headers.
    pub parent_sampled: Option<bool>,
}

/// How a sampling decision was reached. Reported in the transaction's
/// metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    /// The transaction context carried an explicit decision.
    ExplicitlySet,
    /// A user supplied sampler function produced the rate.
    ClientSampler,
    /// A static sample rate was applied.
    ClientRate,
    /// The decision was inherited from the parent.
    Inheritance,
}

impl SamplingMethod {
    /// Wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplingMethod::ExplicitlySet => "explicitly_set",
            SamplingMethod::ClientSampler => "client_sampler",
            SamplingMethod::ClientRate => "client_rate",
            SamplingMethod::Inheritance => "inheritance",
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of sampling logic for a given transaction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingResult {
    /// Whether the transaction is recorded and sent.
    pub sampled: bool,
    /// The rate that led to the decision, if one was applied.
    pub rate: Option<f64>,
    /// How the decision was made.
    pub method: SamplingMethod,
}

/// The [`ShouldSample`] interface allows implementations to provide samplers
/// which will return a sampling [`SamplingResult`] based on information that
/// is typically available just before the transaction is started.
pub trait ShouldSample: fmt::Debug {
    /// Returns the [`SamplingResult`] for a transaction about to be started.
    fn should_sample(&self, cx: &SamplingContext<'_>) -> SamplingResult;
}

/// Default sampling strategies.
#[derive(Debug)]
pub enum Sampler {
    /// Always sample the trace
    AlwaysOn,
    /// Never sample the trace
    AlwaysOff,
    /// Respects the parent's sampling decision or delegates a decision for
    /// root transactions.
    ParentBased(Box<dyn ShouldSample>),
    /// Sample a given fraction of traces. Fractions >= 1 will always sample.
    /// Rates outside `[0, 1]` or NaN disable sampling.
    SampleRate(f64),
}

impl ShouldSample for Sampler {
    fn should_sample(&self, cx: &SamplingContext<'_>) -> SamplingResult {
        match self {
            Sampler::AlwaysOn => SamplingResult {
                sampled: true,
                rate: Some(1.0),
                method: SamplingMethod::ClientRate,
            },
            Sampler::AlwaysOff => SamplingResult {
                sampled: false,
                rate: Some(0.0),
                method: SamplingMethod::ClientRate,
            },
            Sampler::ParentBased(delegate) => match cx.parent_sampled {
                Some(parent_sampled) => SamplingResult {
                    sampled: parent_sampled,
                    rate: None,
                    method: SamplingMethod::Inheritance,
                },
                None => delegate.should_sample(cx),
            },
            Sampler::SampleRate(rate) => SamplingResult {
                sampled: sample_with_rate(*rate, cx),
                rate: Some(*rate),
                method: SamplingMethod::ClientRate,
            },
        }
    }
}

/// Adapts a function returning a sample rate into a [`ShouldSample`].
///
/// ```
/// use traceline_sdk::trace::{FnSampler, Sampler};
///
/// let sampler = FnSampler::new(|cx| if cx.op == Some("healthcheck") { 0.0 } else { 0.5 });
/// let _ = Sampler::ParentBased(Box::new(sampler));
/// ```
pub struct FnSampler<F> {
    sampler: F,
}

impl<F> FnSampler<F>
where
    F: Fn(&SamplingContext<'_>) -> f64,
{
    /// Wraps `sampler`.
    pub fn new(sampler: F) -> Self {
        FnSampler { sampler }
    }
}

impl<F> fmt::Debug for FnSampler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSampler").finish_non_exhaustive()
    }
}

impl<F> ShouldSample for FnSampler<F>
where
    F: Fn(&SamplingContext<'_>) -> f64,
{
    fn should_sample(&self, cx: &SamplingContext<'_>) -> SamplingResult {
        let rate = (self.sampler)(cx);
        SamplingResult {
            sampled: sample_with_rate(rate, cx),
            rate: Some(rate),
            method: SamplingMethod::ClientSampler,
        }
    }
}

/// Whether `rate` is usable as a sample rate.
pub(crate) fn is_valid_sample_rate(rate: f64) -> bool {
    (0.0..=1.0).contains(&rate)
}

fn sample_with_rate(rate: f64, cx: &SamplingContext<'_>) -> bool {
    if !is_valid_sample_rate(rate) {
        tl_warn!(
            name: "Sampler.InvalidSampleRate",
            message = "sample rate must be between 0 and 1, discarding transaction",
            rate = rate,
        );
        return false;
    }
    if rate == 0.0 {
        tl_debug!(
            name: "Sampler.ZeroSampleRate",
            transaction = cx.name.to_string(),
        );
        return false;
    }
    sample_based_on_probability(rate, cx.trace_id)
}

/// Derives the decision from the trace id so every service that sees the
/// same trace and rate agrees.
pub(crate) fn sample_based_on_probability(prob: f64, trace_id: TraceId) -> bool {
    if prob >= 1.0 {
        true
    } else {
        let prob_upper_bound = (prob.max(0.0) * (1u64 << 63) as f64) as u64;
        let bytes = trace_id.to_bytes();
        let mut low = [0u8; 8];
        low.copy_from_slice(&bytes[8..]);
        let rnd_from_trace_id = u64::from_be_bytes(low) >> 1;

        rnd_from_trace_id < prob_upper_bound
    }
}
