use crate::trace::Span;
use std::collections::VecDeque;

/// What a [`SpanRecorder`] does with spans added past its cap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecorderPolicy {
    /// Keep the first `max_spans` spans and reject later ones.
    #[default]
    KeepFirst,
    /// Evict the oldest recorded span to make room for the new one.
    KeepLatest,
}

/// Bounded, insertion ordered list of the child spans of one transaction.
///
/// Spans that do not fit are still linked to their parents, they are only
/// left out of the serialized transaction.
#[derive(Debug)]
pub struct SpanRecorder {
    max_spans: usize,
    policy: RecorderPolicy,
    spans: VecDeque<Span>,
    dropped_count: usize,
}

impl SpanRecorder {
    /// Creates a recorder keeping the first `max_spans` spans.
    pub fn new(max_spans: usize) -> Self {
        SpanRecorder::with_policy(max_spans, RecorderPolicy::default())
    }

    /// Creates a recorder with an explicit overflow policy.
    pub fn with_policy(max_spans: usize, policy: RecorderPolicy) -> Self {
        SpanRecorder {
            max_spans,
            policy,
            spans: VecDeque::new(),
            dropped_count: 0,
        }
    }

    /// Records `span`. Returns whether it is part of the recorded sequence.
    pub fn add(&mut self, span: Span) -> bool {
        if self.spans.len() < self.max_spans {
            self.spans.push_back(span);
            return true;
        }

        self.dropped_count += 1;
        match self.policy {
            RecorderPolicy::KeepFirst => false,
            RecorderPolicy::KeepLatest => {
                if self.spans.pop_front().is_some() {
                    self.spans.push_back(span);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Recorded spans in the order they were added.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.spans.iter()
    }

    /// Number of recorded spans.
    pub fn len(&self) -> usize {
        self.spans.len()
    }

    /// True when nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Spans rejected or evicted because of the cap.
    pub fn dropped_count(&self) -> usize {
        self.dropped_count
    }

    /// The configured cap.
    pub fn max_spans(&self) -> usize {
        self.max_spans
    }

    /// The configured overflow policy.
    pub fn policy(&self) -> RecorderPolicy {
        self.policy
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Span) -> bool) {
        self.spans.retain(keep);
    }
}
