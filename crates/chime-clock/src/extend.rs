//! Width extension over a raw narrow clock.
//!
//! [`extend`] presents a clock whose counter is `width_bits` wide as a full
//! 32-bit clock at the same tick rate. Two alarms on the lower clock do the
//! work: a watchdog that fires every half period and counts overflows, and a
//! target alarm armed only once the upper target falls inside the lower
//! counter's current period. `now()` combines the overflow count with the raw
//! reading lock-free; the parity of the raw reading's top bit detects a
//! half-period boundary the watchdog has not yet credited.
//!
//! The lower clock must expose its raw wrapping counter
//! ([`ClockConfig::widen`] off); the in-core checkpoint widening covers the
//! single-clock case, this layer is for sharing one narrow counter between a
//! raw consumer and a widened view.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use crate::clock::{Alarm, Clock, ClockConfig};
use crate::device::{TickDevice, TickHandle};

/// Wraps `lower` (a raw clock `width_bits` wide) into a full 32-bit clock.
pub fn extend(lower: Arc<Clock>, width_bits: u32, config: ClockConfig) -> Arc<Clock> {
    assert!(
        (2..32).contains(&width_bits),
        "extension applies to counters 2..=31 bits wide"
    );
    let mask = (1u32 << width_bits) - 1;
    assert_eq!(
        lower.max_value(),
        mask,
        "lower clock range does not match the declared width"
    );

    let state = Arc::new(ExtendState {
        width_bits,
        mask,
        overflows: AtomicU32::new(0),
        inner: Mutex::new(ExtendInner {
            watchdog: None,
            target: None,
            pending: None,
            handle: None,
        }),
    });

    let on_watchdog = state.clone();
    let watchdog = lower.create_alarm(move |lower| on_watchdog.watchdog_fired(lower));
    let on_target = state.clone();
    let target = lower.create_alarm(move |_| on_target.fire_upper());
    {
        let mut inner = state.lock_inner();
        inner.watchdog = Some(watchdog);
        inner.target = Some(target);
    }

    // First boundary. Masking (rather than subtracting the raw reading) keeps
    // the offset in 1..=half even when the reading sits at period - 1.
    let half = state.half();
    let raw = lower.now() & mask;
    lower.arm(watchdog, half - (raw & (half - 1)));
    debug!(name = config.name, width_bits, "extension attached");

    Clock::new(Box::new(ExtendDevice { lower, state }), config)
}

struct ExtendState {
    width_bits: u32,
    mask: u32,
    /// Half periods elapsed. Written only by the watchdog sink.
    overflows: AtomicU32,
    inner: Mutex<ExtendInner>,
}

struct ExtendInner {
    watchdog: Option<Alarm>,
    target: Option<Alarm>,
    /// Upper target waiting for its period to come around.
    pending: Option<u32>,
    handle: Option<TickHandle>,
}

impl ExtendState {
    fn half(&self) -> u32 {
        1 << (self.width_bits - 1)
    }

    fn lock_inner(&self) -> MutexGuard<'_, ExtendInner> {
        self.inner.lock().expect("extend state mutex poisoned")
    }

    /// Extended reading: overflow count plus raw counter, retried if the
    /// watchdog runs between the two loads.
    fn now_ext(&self, lower: &Clock) -> u32 {
        loop {
            let seen = self.overflows.load(Ordering::Acquire);
            let raw = lower.now() & self.mask;
            if self.overflows.load(Ordering::Acquire) == seen {
                return self.combine(seen, raw);
            }
        }
    }

    fn combine(&self, halves: u32, raw: u32) -> u32 {
        let half_bits = self.width_bits - 1;
        // The raw reading may already sit in the next half period while the
        // watchdog that credits it has not run; parity of the top raw bit
        // against the count detects exactly that window.
        let halves = if ((halves ^ (raw >> half_bits)) & 1) == 1 {
            halves.wrapping_add(1)
        } else {
            halves
        };
        (halves << half_bits).wrapping_add(raw & (self.half() - 1))
    }

    fn watchdog_fired(&self, lower: &Clock) {
        self.overflows.fetch_add(1, Ordering::AcqRel);
        let raw = lower.now() & self.mask;
        let half = self.half();
        let mut inner = self.lock_inner();
        let Some(watchdog) = inner.watchdog else {
            return;
        };
        lower.arm(watchdog, half - (raw & (half - 1)));
        let now = self.now_ext(lower);
        trace!(raw, now, "extension watchdog");
        self.program(lower, now, &mut inner);
    }

    /// Arms the lower target alarm once the pending upper target falls in
    /// the lower counter's current period; otherwise the next watchdog
    /// re-evaluates.
    fn program(&self, lower: &Clock, now: u32, inner: &mut ExtendInner) {
        let Some(target) = inner.pending else {
            return;
        };
        if target >> self.width_bits != now >> self.width_bits {
            return;
        }
        let Some(alarm) = inner.target else {
            return;
        };
        inner.pending = None;
        lower.arm(alarm, target.wrapping_sub(now));
    }

    fn fire_upper(&self) {
        // Clone the handle out so the upper clock's lock is taken with no
        // extension lock held.
        let handle = self.lock_inner().handle.clone();
        if let Some(handle) = handle {
            handle.fire();
        }
    }
}

struct ExtendDevice {
    lower: Arc<Clock>,
    state: Arc<ExtendState>,
}

impl TickDevice for ExtendDevice {
    fn now(&mut self) -> u32 {
        self.state.now_ext(&self.lower)
    }

    fn set(&mut self, ticks: u32) {
        let now = self.state.now_ext(&self.lower);
        let target = now.wrapping_add(ticks);
        let mut inner = self.state.lock_inner();
        inner.pending = Some(target);
        self.state.program(&self.lower, now, &mut inner);
    }

    fn cancel(&mut self) {
        let mut inner = self.state.lock_inner();
        inner.pending = None;
        let target = inner.target;
        drop(inner);
        if let Some(alarm) = target {
            self.lower.cancel(alarm);
        }
    }

    fn attach(&mut self, handle: TickHandle) {
        self.state.lock_inner().handle = Some(handle);
    }
}

impl Drop for ExtendDevice {
    fn drop(&mut self) {
        let (watchdog, target) = {
            let mut inner = self.state.lock_inner();
            inner.pending = None;
            (inner.watchdog.take(), inner.target.take())
        };
        if let Some(alarm) = watchdog {
            self.lower.delete_alarm(alarm);
        }
        if let Some(alarm) = target {
            self.lower.delete_alarm(alarm);
        }
    }
}
