//! # Trace propagation
//!
//! Trace state crosses process boundaries in two headers:
//!
//! - `sentry-trace`, a compact `<trace_id>-<span_id>[-<sampled>]` value, see
//!   [`TraceparentData`];
//! - `baggage`, a W3C-style list whose `sentry-` entries carry the dynamic
//!   sampling context, see [`Baggage`].
//!
//! Carriers are abstracted by [`Injector`] and [`Extractor`], so the same
//! propagator works with HTTP header maps, message metadata, or a plain
//! `HashMap`.
//!
//! [`Baggage`]: crate::baggage::Baggage
use std::borrow::Cow;
use std::collections::HashMap;

mod traceparent;

pub use traceparent::TraceparentData;

/// Name of the header carrying the trace id, parent span id and sampling decision.
pub const SENTRY_TRACE_HEADER: &str = "sentry-trace";

/// Name of the W3C baggage header.
pub const BAGGAGE_HEADER: &str = "baggage";

/// Injector provides an interface for adding fields from an underlying struct like `HashMap`
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);

    /// Returns the value already set for `key`, if the carrier can tell.
    fn existing(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Extractor provides an interface for removing fields from an underlying struct like `HashMap`
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<Cow<'_, str>>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<Cow<'_, str>>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }

    fn existing(&self, key: &str) -> Option<String> {
        self.get(&key.to_lowercase()).cloned()
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap.
    fn get(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(&key.to_lowercase())
            .map(|v| Cow::Borrowed(v.as_str()))
    }

    /// Collect all the keys from the HashMap.
    fn keys(&self) -> Vec<Cow<'_, str>> {
        self.keys()
            .map(|k| Cow::Borrowed(k.as_str()))
            .collect::<Vec<_>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_get() {
        let mut carrier = HashMap::new();
        carrier.set("Sentry-Trace", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "SENTRY-TRACE"),
            Some(Cow::Borrowed("value")),
            "case insensitive extraction"
        );
    }

    #[test]
    fn hash_map_existing() {
        let mut carrier = HashMap::new();
        assert_eq!(Injector::existing(&carrier, "baggage"), None);
        carrier.set("Baggage", "a=b".to_string());
        assert_eq!(Injector::existing(&carrier, "BAGGAGE"), Some("a=b".to_string()));
    }

    #[test]
    fn hash_map_keys() {
        let mut carrier = HashMap::new();
        carrier.set("headerName1", "value1".to_string());
        carrier.set("headerName2", "value2".to_string());

        let got = Extractor::keys(&carrier);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&Cow::Borrowed("headername1")));
        assert!(got.contains(&Cow::Borrowed("headername2")));
    }
}
