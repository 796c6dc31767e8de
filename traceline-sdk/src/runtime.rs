//! Clocks and cancellable timers.
//!
//! Idle transactions schedule callbacks (idle timeout, final timeout,
//! heartbeat) through a [`Runtime`]. The core is single threaded, so
//! callbacks are plain `FnOnce` closures that may capture `Rc` state.
//!
//! Three implementations are provided:
//!
//! - [`LoopRuntime`] uses the wall clock and runs due timers whenever the host
//!   calls [`Runtime::run_due`] from its own event loop. This is the default.
//! - [`ManualRuntime`] keeps a virtual clock that only moves on
//!   [`ManualRuntime::advance`], for deterministic tests.
//! - [`TokioLocal`] spawns each timer onto the current tokio `LocalSet`.
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use traceline::tl_debug;

/// A scheduled callback.
pub type TimerCallback = Box<dyn FnOnce()>;

/// Source of time and timers for the tracing core.
pub trait Runtime: fmt::Debug {
    /// Current time according to this runtime.
    fn now(&self) -> SystemTime;

    /// Runs `callback` once `delay` has elapsed, unless the returned handle is
    /// cancelled first.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Runs the callbacks that are due. Runtimes driven by their own reactor
    /// do nothing and return zero.
    fn run_due(&self) -> usize {
        0
    }
}

/// Handle to a scheduled callback.
///
/// Clones share the cancellation flag.
#[derive(Clone, Default)]
pub struct TimerHandle {
    cancelled: Rc<Cell<bool>>,
    release: Option<Rc<dyn Fn()>>,
}

impl TimerHandle {
    /// Creates a live handle.
    pub fn new() -> Self {
        TimerHandle::default()
    }

    /// Creates a live handle that also runs `release` when cancelled, so the
    /// runtime can drop the callback and whatever it captured right away.
    pub fn with_release<F>(release: F) -> Self
    where
        F: Fn() + 'static,
    {
        TimerHandle {
            cancelled: Rc::default(),
            release: Some(Rc::new(release)),
        }
    }

    /// Prevents the callback from running. Cancelling twice is harmless.
    pub fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        if let Some(release) = &self.release {
            release();
        }
    }

    /// Whether [`cancel`](TimerHandle::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.cancelled.get())
            .finish()
    }
}

struct Timer {
    handle: TimerHandle,
    callback: TimerCallback,
}

type TimerKey = (SystemTime, u64);
type TimerMap = RefCell<BTreeMap<TimerKey, Timer>>;

/// Deadline ordered timers; ties run in scheduling order.
#[derive(Default)]
struct TimerQueue {
    next_seq: Cell<u64>,
    timers: Rc<TimerMap>,
}

impl TimerQueue {
    /// Queues `callback` to run `delay` after `now`. A deadline past the end
    /// of the clock never comes, so such callbacks are dropped unqueued.
    fn push(&self, now: SystemTime, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let Some(deadline) = now.checked_add(delay) else {
            tl_debug!(
                name: "Runtime.TimerNeverDue",
                delay_secs = delay.as_secs(),
            );
            return TimerHandle::new();
        };
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let key = (deadline, seq);

        let timers = Rc::downgrade(&self.timers);
        let handle = TimerHandle::with_release(move || remove_timer(&timers, &key));
        self.timers.borrow_mut().insert(
            key,
            Timer {
                handle: handle.clone(),
                callback,
            },
        );
        handle
    }

    fn next_deadline(&self) -> Option<SystemTime> {
        self.timers
            .borrow()
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    fn pop_due(&self, now: SystemTime) -> Option<Timer> {
        let mut timers = self.timers.borrow_mut();
        let key = *timers.keys().next()?;
        if key.0 > now {
            return None;
        }
        timers.remove(&key)
    }

    fn len(&self) -> usize {
        self.timers
            .borrow()
            .values()
            .filter(|timer| !timer.handle.is_cancelled())
            .count()
    }
}

fn remove_timer(timers: &Weak<TimerMap>, key: &TimerKey) {
    let Some(timers) = timers.upgrade() else {
        return;
    };
    // Dropped after the borrow ends; the callback may own state that
    // cancels other timers when it goes away.
    let removed = match timers.try_borrow_mut() {
        Ok(mut timers) => timers.remove(key),
        Err(_) => None,
    };
    drop(removed);
}

impl Timer {
    // The queue borrow is released before this runs, so callbacks may
    // schedule new timers.
    fn fire(self) -> bool {
        if self.handle.is_cancelled() {
            return false;
        }
        (self.callback)();
        true
    }
}

/// Wall-clock runtime driven by the host's event loop.
#[derive(Default)]
pub struct LoopRuntime {
    queue: TimerQueue,
}

impl LoopRuntime {
    /// Creates a runtime with no pending timers.
    pub fn new() -> Self {
        LoopRuntime::default()
    }

    /// Deadline of the earliest pending timer, for hosts that want to sleep
    /// until then.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.queue.next_deadline()
    }
}

impl fmt::Debug for LoopRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopRuntime")
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl Runtime for LoopRuntime {
    fn now(&self) -> SystemTime {
        traceline::time::now()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        self.queue.push(self.now(), delay, callback)
    }

    fn run_due(&self) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.queue.pop_due(self.now()) {
            if timer.fire() {
                fired += 1;
            }
        }
        fired
    }
}

/// Virtual clock that only moves when told to.
///
/// ```
/// use std::cell::Cell;
/// use std::rc::{Rc, Weak};
/// use std::time::Duration;
/// use traceline_sdk::runtime::{ManualRuntime, Runtime};
///
/// let runtime = ManualRuntime::default();
/// let fired = Rc::new(Cell::new(false));
/// let flag = fired.clone();
/// runtime.schedule(Duration::from_millis(10), Box::new(move || flag.set(true)));
///
/// runtime.advance(Duration::from_millis(9));
/// assert!(!fired.get());
/// runtime.advance(Duration::from_millis(1));
/// assert!(fired.get());
/// ```
pub struct ManualRuntime {
    now: Cell<SystemTime>,
    queue: TimerQueue,
}

impl ManualRuntime {
    /// Creates a clock that starts at `start`.
    pub fn new(start: SystemTime) -> Self {
        ManualRuntime {
            now: Cell::new(start),
            queue: TimerQueue::default(),
        }
    }

    /// Moves the clock forward, firing every timer whose deadline is reached
    /// at its own deadline.
    ///
    /// Moving past the end of the clock fires every pending timer and leaves
    /// the clock at the last deadline reached.
    pub fn advance(&self, by: Duration) {
        let target = self.now.get().checked_add(by);
        while let Some(deadline) = self.queue.next_deadline() {
            if target.is_some_and(|target| deadline > target) {
                break;
            }
            if deadline > self.now.get() {
                self.now.set(deadline);
            }
            if let Some(timer) = self.queue.pop_due(deadline) {
                timer.fire();
            }
        }
        if let Some(target) = target {
            self.now.set(target);
        }
    }

    /// Number of timers that are scheduled and not cancelled.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Default for ManualRuntime {
    fn default() -> Self {
        ManualRuntime::new(UNIX_EPOCH + Duration::from_secs(1_600_000_000))
    }
}

impl fmt::Debug for ManualRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualRuntime")
            .field("now", &self.now.get())
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl Runtime for ManualRuntime {
    fn now(&self) -> SystemTime {
        self.now.get()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        self.queue.push(self.now.get(), delay, callback)
    }

    fn run_due(&self) -> usize {
        let mut fired = 0;
        while let Some(timer) = self.queue.pop_due(self.now.get()) {
            if timer.fire() {
                fired += 1;
            }
        }
        fired
    }
}

/// Runtime implementation on top of tokio's `LocalSet`.
///
/// Timers are spawned with `tokio::task::spawn_local`, so they must be
/// scheduled from within a `LocalSet`.
#[cfg(feature = "rt-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "rt-tokio")))]
#[derive(Debug, Clone, Default)]
pub struct TokioLocal;

#[cfg(feature = "rt-tokio")]
#[cfg_attr(docsrs, doc(cfg(feature = "rt-tokio")))]
impl Runtime for TokioLocal {
    fn now(&self) -> SystemTime {
        traceline::time::now()
    }

    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Rc::new(Cell::new(false));
        let flag = cancelled.clone();
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if !flag.get() {
                callback();
            }
        });
        // aborting drops the sleeping future along with the callback
        TimerHandle {
            cancelled,
            release: Some(Rc::new(move || task.abort())),
        }
    }
}
