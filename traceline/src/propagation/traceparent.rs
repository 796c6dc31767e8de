use crate::{tl_debug, SpanId, TraceId};
use regex::Regex;
use std::sync::OnceLock;

// TODO Replace this with LazyLock once the MSRV allows it.
static TRACEPARENT_REGEX: OnceLock<Regex> = OnceLock::new();

#[inline]
fn traceparent_regex() -> &'static Regex {
    TRACEPARENT_REGEX.get_or_init(|| {
        Regex::new("^([0-9a-f]{32})-([0-9a-f]{16})(?:-([01]))?$").expect("trace header pattern compiles")
    })
}

/// Parent information carried by a `sentry-trace` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceparentData {
    /// Trace the incoming request belongs to.
    pub trace_id: TraceId,
    /// Span that issued the incoming request.
    pub parent_span_id: SpanId,
    /// Sampling decision of the upstream service, if it made one.
    pub parent_sampled: Option<bool>,
}

impl TraceparentData {
    /// Parses a `sentry-trace` header value.
    ///
    /// Returns `None` for anything that does not look like
    /// `<32 hex>-<16 hex>[-<0|1>]`, in which case the caller starts a new trace.
    ///
    /// ```
    /// use traceline::propagation::TraceparentData;
    ///
    /// let data = TraceparentData::parse("12312012123120121231201212312012-1121201211212012-0").unwrap();
    /// assert_eq!(data.parent_sampled, Some(false));
    /// assert!(TraceparentData::parse("not-a-trace-header").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<TraceparentData> {
        let captures = match traceparent_regex().captures(header) {
            Some(captures) => captures,
            None => {
                tl_debug!(
                    name: "Traceparent.Parse.Mismatch",
                    header = header.to_string(),
                );
                return None;
            }
        };

        let trace_id = TraceId::from_hex(captures.get(1)?.as_str()).ok()?;
        let parent_span_id = SpanId::from_hex(captures.get(2)?.as_str()).ok()?;
        let parent_sampled = captures.get(3).map(|flag| flag.as_str() == "1");

        Some(TraceparentData {
            trace_id,
            parent_span_id,
            parent_sampled,
        })
    }

    /// Formats a `sentry-trace` header value. The sampling flag is only
    /// written when a decision exists.
    pub fn format(trace_id: TraceId, span_id: SpanId, sampled: Option<bool>) -> String {
        match sampled {
            Some(true) => format!("{trace_id}-{span_id}-1"),
            Some(false) => format!("{trace_id}-{span_id}-0"),
            None => format!("{trace_id}-{span_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rustfmt::skip]
    fn extract_data() -> Vec<(&'static str, Option<TraceparentData>)> {
        vec![
            ("12312012123120121231201212312012-1121201211212012-0", Some(TraceparentData {
                trace_id: TraceId::from(0x12312012123120121231201212312012),
                parent_span_id: SpanId::from(0x1121201211212012),
                parent_sampled: Some(false),
            })),
            ("12312012123120121231201212312012-1121201211212012-1", Some(TraceparentData {
                trace_id: TraceId::from(0x12312012123120121231201212312012),
                parent_span_id: SpanId::from(0x1121201211212012),
                parent_sampled: Some(true),
            })),
            ("12312012123120121231201212312012-1121201211212012", Some(TraceparentData {
                trace_id: TraceId::from(0x12312012123120121231201212312012),
                parent_span_id: SpanId::from(0x1121201211212012),
                parent_sampled: None,
            })),
        ]
    }

    #[rustfmt::skip]
    fn extract_data_invalid() -> Vec<(&'static str, &'static str)> {
        vec![
            ("", "empty header"),
            ("12312012123120121231201212312012-1121201211212012-2", "sampled flag out of range"),
            ("12312012123120121231201212312012-1121201211212012-", "dangling separator"),
            ("1231201212312012123120121231201-1121201211212012-1", "short trace id"),
            ("12312012123120121231201212312012-112120121121201-1", "short span id"),
            ("12312012123120121231201212312012-1121201211212012-1-1", "extra field"),
            ("ABCD2012123120121231201212312012-1121201211212012-1", "uppercase hex"),
            ("00-12312012123120121231201212312012-1121201211212012-01", "w3c traceparent"),
            (" 12312012123120121231201212312012-1121201211212012-1", "leading whitespace"),
        ]
    }

    #[test]
    fn parse_valid() {
        for (header, expected) in extract_data() {
            assert_eq!(TraceparentData::parse(header), expected, "{header}");
        }
    }

    #[test]
    fn parse_invalid() {
        for (header, reason) in extract_data_invalid() {
            assert_eq!(TraceparentData::parse(header), None, "{reason}");
        }
    }

    #[test]
    fn format_writes_flag_only_when_decided() {
        let trace_id = TraceId::from(0xc2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7);
        let span_id = SpanId::from(0x0102030405060708);

        assert_eq!(
            TraceparentData::format(trace_id, span_id, None),
            "c2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7-0102030405060708"
        );
        assert_eq!(
            TraceparentData::format(trace_id, span_id, Some(true)),
            "c2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7-0102030405060708-1"
        );
        assert_eq!(
            TraceparentData::format(trace_id, span_id, Some(false)),
            "c2c7b0a0a4e5c6b4d3c1b2a1e0f9d8c7-0102030405060708-0"
        );
    }
}
