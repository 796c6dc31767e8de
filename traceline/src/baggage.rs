//! Baggage and the dynamic sampling context.
//!
//! A `baggage` header is split into two parts. Entries whose key starts with
//! `sentry-` form the dynamic sampling context (DSC) and are stored, with the
//! prefix stripped, in a first-party mapping that keeps the order entries
//! were parsed or set in. Every other entry belongs to
//! some other vendor and is kept verbatim as a raw remainder string so it can
//! be forwarded untouched.
//!
//! A [`Baggage`] is mutable until it has been used to describe a sent
//! transaction. After [`Baggage::freeze`] further writes are ignored.
use crate::{tl_debug, tl_warn};
use indexmap::IndexMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

/// Prefix marking first-party baggage entries.
pub const SENTRY_BAGGAGE_KEY_PREFIX: &str = "sentry-";

/// Upper bound for a serialized baggage header, in bytes.
pub const MAX_BAGGAGE_STRING_LENGTH: usize = 8192;

// Everything except the characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// First-party key/value pairs plus an opaque third-party remainder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Baggage {
    sentry: IndexMap<String, String>,
    third_party: String,
    mutable: bool,
}

impl Default for Baggage {
    fn default() -> Self {
        Baggage {
            sentry: IndexMap::new(),
            third_party: String::new(),
            mutable: true,
        }
    }
}

impl Baggage {
    /// Creates an empty, mutable baggage.
    pub fn new() -> Self {
        Baggage::default()
    }

    /// Creates a baggage from already decoded parts.
    pub fn from_parts<I, K, V>(sentry: I, third_party: impl Into<String>, mutable: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Baggage {
            sentry: sentry
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            third_party: third_party.into(),
            mutable,
        }
    }

    /// Parses a `baggage` header value.
    ///
    /// Entries without `=` are skipped. First-party values that are not valid
    /// percent-encoded UTF-8 are skipped as well. The result is mutable.
    pub fn parse(header: &str) -> Self {
        let mut baggage = Baggage::default();
        let mut third_party = Vec::new();

        for entry in header.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((key, value)) = entry.split_once('=') else {
                tl_warn!(
                    name: "Baggage.Parse.InvalidKeyValueFormat",
                    entry = entry.to_string(),
                );
                continue;
            };

            match key.trim().strip_prefix(SENTRY_BAGGAGE_KEY_PREFIX) {
                Some(key) => {
                    let decoded = (
                        percent_decode_str(key).decode_utf8(),
                        percent_decode_str(value.trim()).decode_utf8(),
                    );
                    match decoded {
                        (Ok(key), Ok(value)) => {
                            baggage.sentry.insert(key.into_owned(), value.into_owned());
                        }
                        _ => {
                            tl_warn!(
                                name: "Baggage.Parse.InvalidUTF8",
                                entry = entry.to_string(),
                            );
                        }
                    }
                }
                None => third_party.push(entry),
            }
        }

        baggage.third_party = third_party.join(",");
        baggage
    }

    /// Parses the incoming `baggage` header and decides whether the result may
    /// still be populated locally.
    ///
    /// Baggage is frozen when the upstream service already made the trace
    /// decision: either it sent a `sentry-trace` header, or its baggage carried
    /// first-party entries.
    pub fn parse_with_mutability(header: Option<&str>, has_trace_header: bool) -> Self {
        let mut baggage = header.map(Baggage::parse).unwrap_or_default();
        if has_trace_header || !baggage.sentry.is_empty() {
            baggage.mutable = false;
        }
        baggage
    }

    /// Returns the first-party value for `key`, without the `sentry-` prefix.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.sentry.get(key).map(String::as_str)
    }

    /// Sets a first-party entry. Ignored once the baggage is frozen.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.mutable {
            tl_debug!(name: "Baggage.Set.Frozen", key = key);
            return;
        }
        self.sentry.insert(key, value.into());
    }

    /// Sets a first-party entry unless one is already present.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.sentry.contains_key(&key) {
            self.set(key, value);
        }
    }

    /// First-party entries, keyed without prefix, in insertion order.
    pub fn sentry_items(&self) -> &IndexMap<String, String> {
        &self.sentry
    }

    /// The raw third-party remainder.
    pub fn third_party(&self) -> &str {
        &self.third_party
    }

    /// Whether local population is still allowed.
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Marks the baggage as used; later writes are ignored.
    pub fn freeze(&mut self) {
        self.mutable = false;
    }

    /// True when neither part carries anything.
    pub fn is_empty(&self) -> bool {
        self.sentry.is_empty() && self.third_party.is_empty()
    }

    /// True when there are no first-party entries.
    pub fn is_sentry_empty(&self) -> bool {
        self.sentry.is_empty()
    }

    /// Serializes for the `baggage` header: first-party entries first, then
    /// the third-party remainder.
    ///
    /// Entries that would push the header past [`MAX_BAGGAGE_STRING_LENGTH`]
    /// are dropped.
    pub fn serialize(&self) -> String {
        let mut header = String::new();

        for (key, value) in &self.sentry {
            let entry = format!(
                "{SENTRY_BAGGAGE_KEY_PREFIX}{}={}",
                utf8_percent_encode(key, COMPONENT),
                utf8_percent_encode(value, COMPONENT)
            );
            push_entry(&mut header, &entry);
        }

        if !self.third_party.is_empty() {
            push_entry(&mut header, &self.third_party);
        }

        header
    }

    /// Serializes this baggage's first-party entries together with the
    /// third-party entries of an outgoing header that is already set.
    ///
    /// First-party entries of the existing header are replaced by ours.
    pub fn merge_and_serialize(&self, existing: Option<&str>) -> String {
        let Some(existing) = existing else {
            return self.serialize();
        };
        let existing = Baggage::parse(existing);
        let mut merged = self.clone();
        merged.third_party = existing.third_party;
        merged.serialize()
    }
}

fn push_entry(header: &mut String, entry: &str) {
    let separator = usize::from(!header.is_empty());
    if header.len() + separator + entry.len() > MAX_BAGGAGE_STRING_LENGTH {
        tl_warn!(
            name: "Baggage.Serialize.TooLong",
            message = "not adding baggage entry as the header would exceed the maximum size",
            entry_len = entry.len(),
        );
        return;
    }
    if separator == 1 {
        header.push(',');
    }
    header.push_str(entry);
}

impl fmt::Display for Baggage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn parse_data() -> Vec<(&'static str, Vec<(&'static str, &'static str)>, &'static str)> {
        vec![
            ("", vec![], ""),
            ("sentry-environment=production,sentry-release=10.0.2",
             vec![("environment", "production"), ("release", "10.0.2")], ""),
            ("userId=alice,serverNode=DF%2028,isProduction=false",
             vec![], "userId=alice,serverNode=DF%2028,isProduction=false"),
            ("userId=alice, sentry-environment=production , foo=bar",
             vec![("environment", "production")], "userId=alice,foo=bar"),
            ("sentry-transaction=GET%20%2Fhome,sentry-user_segment=segment%2Ca",
             vec![("transaction", "GET /home"), ("user_segment", "segment,a")], ""),
            ("no-equals-sign,sentry-release=1.0", vec![("release", "1.0")], ""),
            ("sentry-release=%FF,foo=bar", vec![], "foo=bar"),
        ]
    }

    #[test]
    fn parse() {
        for (header, sentry, third_party) in parse_data() {
            let baggage = Baggage::parse(header);
            assert_eq!(
                baggage,
                Baggage::from_parts(sentry, third_party, true),
                "{header}"
            );
        }
    }

    #[rustfmt::skip]
    fn serialize_data() -> Vec<(Baggage, &'static str)> {
        vec![
            (Baggage::new(), ""),
            (Baggage::from_parts([("environment", "production")], "", true), "sentry-environment=production"),
            (Baggage::from_parts(Vec::<(String, String)>::new(), "foo=bar", true), "foo=bar"),
            (Baggage::from_parts([("release", "1.0 beta"), ("environment", "prod")], "foo=bar,x=y", false),
             "sentry-release=1.0%20beta,sentry-environment=prod,foo=bar,x=y"),
            (Baggage::from_parts([("transaction", "GET /users/{id}")], "", false),
             "sentry-transaction=GET%20%2Fusers%2F%7Bid%7D"),
        ]
    }

    #[test]
    fn serialize() {
        for (baggage, expected) in serialize_data() {
            assert_eq!(baggage.serialize(), expected);
        }
    }

    #[test]
    fn parsed_entries_keep_their_order() {
        let header = "sentry-trace_id=771a43a4192642f0b136d5159a501700,sentry-public_key=49d0f7386ad645858ae85020e393bef3,sentry-sample_rate=0.01337,vendor=1";
        let mut baggage = Baggage::parse(header);
        assert_eq!(baggage.serialize(), header);

        baggage.set("release", "1.0");
        baggage.set("public_key", "abc");
        assert_eq!(
            baggage.serialize(),
            "sentry-trace_id=771a43a4192642f0b136d5159a501700,sentry-public_key=abc,sentry-sample_rate=0.01337,sentry-release=1.0,vendor=1"
        );
    }

    #[test]
    fn serialize_then_parse_keeps_values() {
        let baggage = Baggage::from_parts(
            [("transaction", "a,b=c d"), ("sample_rate", "0.25")],
            "vendor=1",
            true,
        );
        assert_eq!(Baggage::parse(&baggage.serialize()), baggage);
    }

    #[test]
    fn serialize_drops_entries_past_the_limit() {
        let long = "x".repeat(MAX_BAGGAGE_STRING_LENGTH);
        let baggage = Baggage::from_parts([("release", "1.0")], format!("big={long}"), true);
        assert_eq!(baggage.serialize(), "sentry-release=1.0");
    }

    #[test]
    fn mutability_follows_upstream() {
        assert!(Baggage::parse_with_mutability(None, false).is_mutable());
        assert!(Baggage::parse_with_mutability(Some("foo=bar"), false).is_mutable());
        assert!(!Baggage::parse_with_mutability(Some("foo=bar"), true).is_mutable());
        assert!(!Baggage::parse_with_mutability(Some("sentry-release=1"), false).is_mutable());
    }

    #[test]
    fn frozen_baggage_ignores_writes() {
        let mut baggage = Baggage::new();
        baggage.set("release", "1.0");
        baggage.freeze();
        baggage.set("release", "2.0");
        baggage.set("environment", "prod");

        assert_eq!(baggage.get("release"), Some("1.0"));
        assert_eq!(baggage.get("environment"), None);
    }

    #[test]
    fn set_if_absent_keeps_existing() {
        let mut baggage = Baggage::from_parts([("release", "upstream")], "", true);
        baggage.set_if_absent("release", "local");
        baggage.set_if_absent("environment", "local");

        assert_eq!(baggage.get("release"), Some("upstream"));
        assert_eq!(baggage.get("environment"), Some("local"));
    }

    #[test]
    fn merge_replaces_first_party_entries() {
        let baggage = Baggage::from_parts([("release", "1.0")], "", false);
        assert_eq!(
            baggage.merge_and_serialize(Some("sentry-release=0.9,vendor=a")),
            "sentry-release=1.0,vendor=a"
        );
        assert_eq!(baggage.merge_and_serialize(None), "sentry-release=1.0");
    }
}
