//! Id Generator
#[cfg(any(test, feature = "testing"))]
pub use increment::IncrementIdGenerator;

use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;
use traceline::{SpanId, TraceId};

/// Interface for generating IDs
pub trait IdGenerator: fmt::Debug {
    /// Generate a new `TraceId`
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] implementation.
///
/// Generates Trace and Span ids using a random number generator.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u128>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

#[cfg(any(test, feature = "testing"))]
mod increment {
    use super::IdGenerator;
    use std::cell::Cell;
    use std::rc::Rc;
    use traceline::{SpanId, TraceId};

    /// [`IdGenerator`] implementation that increments a counter for each new ID. This helps produce
    /// predictable IDs for testing.
    #[derive(Clone, Debug)]
    pub struct IncrementIdGenerator(Rc<Cell<u64>>);

    impl IncrementIdGenerator {
        /// Create a new [`IncrementIdGenerator`]
        pub fn new() -> Self {
            Self::default()
        }

        fn next(&self) -> u64 {
            let value = self.0.get();
            self.0.set(value + 1);
            value
        }
    }

    impl Default for IncrementIdGenerator {
        fn default() -> Self {
            Self(Rc::new(Cell::new(1)))
        }
    }

    impl IdGenerator for IncrementIdGenerator {
        fn new_trace_id(&self) -> TraceId {
            TraceId::from(self.next() as u128)
        }

        fn new_span_id(&self) -> SpanId {
            SpanId::from(self.next())
        }
    }
}
