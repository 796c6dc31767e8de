//! SDK Configuration
//!
//! Configuration represents the tracer-wide settings: sampler, id generator,
//! span recorder limits and the client identity that ends up in the dynamic
//! sampling context.
use crate::dsn::Dsn;
use crate::trace::{IdGenerator, RandomIdGenerator, RecorderPolicy, Sampler, ShouldSample};
use serde::Serialize;
use std::borrow::Cow;
use std::env;
use std::rc::Rc;
use std::str::FromStr;
use traceline::tl_warn;

/// Default cap on recorded spans per transaction.
pub const DEFAULT_MAX_SPANS: usize = 1000;

/// Name and version reported in envelope headers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SdkInfo {
    /// SDK name
    pub name: Cow<'static, str>,
    /// SDK version
    pub version: Cow<'static, str>,
}

impl Default for SdkInfo {
    fn default() -> Self {
        SdkInfo {
            name: Cow::Borrowed("traceline.rust"),
            version: Cow::Borrowed(env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Tracer configuration
#[derive(Debug)]
#[non_exhaustive]
pub struct Config {
    /// The sampler that the sdk should use
    pub sampler: Box<dyn ShouldSample>,
    /// The id generator that the sdk should use
    pub id_generator: Rc<dyn IdGenerator>,
    /// Maximum number of child spans recorded per transaction
    pub max_spans: usize,
    /// What the span recorder does once `max_spans` is reached
    pub recorder_policy: RecorderPolicy,
    /// Release of the instrumented application
    pub release: Option<String>,
    /// Environment of the instrumented application
    pub environment: Option<String>,
    /// Client key
    pub dsn: Option<Dsn>,
    /// SDK identity for envelope headers
    pub sdk: SdkInfo,
}

impl Config {
    /// Public key of the configured DSN, if any.
    pub fn public_key(&self) -> Option<&str> {
        self.dsn.as_ref().map(Dsn::public_key)
    }
}

impl Default for Config {
    /// Create default sdk configuration, applying `TRACELINE_*` environment
    /// overrides.
    fn default() -> Self {
        let mut config = Config {
            sampler: Box::new(Sampler::ParentBased(Box::new(Sampler::AlwaysOn))),
            id_generator: Rc::new(RandomIdGenerator::default()),
            max_spans: DEFAULT_MAX_SPANS,
            recorder_policy: RecorderPolicy::default(),
            release: None,
            environment: None,
            dsn: None,
            sdk: SdkInfo::default(),
        };

        if let Ok(rate) = env::var("TRACELINE_TRACES_SAMPLE_RATE") {
            match f64::from_str(rate.trim()) {
                Ok(rate) if crate::trace::sampler::is_valid_sample_rate(rate) => {
                    config.sampler =
                        Box::new(Sampler::ParentBased(Box::new(Sampler::SampleRate(rate))));
                }
                _ => {
                    tl_warn!(
                        name: "Tracer.Config.InvalidSampleRate",
                        message = "TRACELINE_TRACES_SAMPLE_RATE must be a number between 0 and 1. Falling back to ParentBased(AlwaysOn)",
                        traces_sample_rate = rate.as_str(),
                    );
                }
            }
        }

        if let Ok(max_spans) = env::var("TRACELINE_MAX_SPANS") {
            match usize::from_str(max_spans.trim()) {
                Ok(max_spans) => config.max_spans = max_spans,
                Err(_) => {
                    tl_warn!(
                        name: "Tracer.Config.InvalidMaxSpans",
                        message = "TRACELINE_MAX_SPANS is not a valid count, keeping the default",
                        max_spans = max_spans.as_str(),
                    );
                }
            }
        }

        if let Some(release) = env::var("TRACELINE_RELEASE")
            .ok()
            .filter(|release| !release.is_empty())
        {
            config.release = Some(release);
        }

        if let Some(environment) = env::var("TRACELINE_ENVIRONMENT")
            .ok()
            .filter(|environment| !environment.is_empty())
        {
            config.environment = Some(environment);
        }

        if let Ok(dsn) = env::var("TRACELINE_DSN") {
            match Dsn::from_str(dsn.trim()) {
                Ok(dsn) => config.dsn = Some(dsn),
                Err(err) => {
                    tl_warn!(
                        name: "Tracer.Config.InvalidDsn",
                        dsn = dsn.as_str(),
                        error = format!("{err}"),
                    );
                }
            }
        }

        config
    }
}
