//! Clock core: a 32-bit monotonic reading over a [`TickDevice`] plus the
//! alarm queue and its dispatch loop.
//!
//! # Width extension
//!
//! A device narrower than 32 bits can be *widened*: the core keeps a
//! checkpoint of the last extended reading and folds in the counter delta on
//! every observation. For the checkpoint to stay unambiguous the device must
//! be observed at least once per counter period, so the device is never
//! programmed further than half its range ahead and an idle widened clock
//! keeps a half-range heartbeat armed. Intermediate wakes resynchronize and
//! re-arm for the remainder, which also makes spurious or early device fires
//! harmless.
//!
//! # Callbacks
//!
//! Alarm sinks run with the clock lock released. A sink may re-arm its own
//! alarm, arm or cancel others, and read `now()`. An alarm is unlinked before
//! its sink runs, so cancelling from another thread prevents future fires but
//! does not interrupt a sink already in flight.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::{debug, trace, warn};

use crate::device::{TickDevice, TickHandle};
use crate::queue::AlarmQueue;

pub(crate) type Sink = Box<dyn FnMut(&Clock) + Send>;

/// Construction-time parameters of a [`Clock`].
#[derive(Debug, Clone)]
pub struct ClockConfig {
    /// Name used in trace output.
    pub name: &'static str,
    /// Widen a narrow device to a full 32-bit reading. Leave off for a clock
    /// that should expose the raw wrapping counter, e.g. one feeding
    /// [`extend`](crate::extend).
    pub widen: bool,
    /// Subtracted from every `arm` offset to compensate for a backend's fixed
    /// programming latency.
    pub adjust_set: u32,
    /// Subtracted by sleep-style helpers on top of this clock.
    pub adjust_sleep: u32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            name: "clock",
            widen: true,
            adjust_set: 0,
            adjust_sleep: 0,
        }
    }
}

/// Token naming one alarm slot of one clock. Copyable; operations through a
/// token whose alarm was deleted are logged and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alarm {
    index: u32,
    gen: u32,
}

/// A virtual monotonic 32-bit clock with an alarm queue.
///
/// Created with [`Clock::new`] and shared as `Arc<Clock>`. All operations are
/// callable from any thread and from inside alarm sinks. Sinks receive the
/// owning clock as an argument; capturing an `Arc` of the same clock in a
/// sink would keep the clock alive forever.
pub struct Clock {
    name: &'static str,
    max_value: u32,
    /// Checkpoint extension active (narrow device, `widen` requested).
    widens: bool,
    adjust_set: u32,
    adjust_sleep: u32,
    core: Mutex<Core>,
}

struct Core {
    device: Box<dyn TickDevice>,
    queue: AlarmQueue<Sink>,
    /// Extended reading at the last observation. Only meaningful on widened
    /// clocks.
    checkpoint: u32,
    /// Raw device reading at the last observation.
    device_last: u32,
    /// `max_value + 1` of the device counter.
    device_period: u64,
}

impl Clock {
    /// Builds a clock over `device` and, when widening a narrow device, arms
    /// the heartbeat that keeps the extension checkpoint fresh.
    pub fn new(mut device: Box<dyn TickDevice>, config: ClockConfig) -> Arc<Clock> {
        let max_value = device.max_value();
        assert!(max_value >= 2, "tick device range too narrow to schedule on");
        let widens = config.widen && max_value < u32::MAX;
        let device_period = max_value as u64 + 1;
        // A widened queue lives in extended 32-bit time; a raw one wraps with
        // the device.
        let queue_period = if widens { 1 << 32 } else { device_period };

        let clock = Arc::new_cyclic(|weak: &Weak<Clock>| {
            device.attach(TickHandle::new(weak.clone()));
            Clock {
                name: config.name,
                max_value,
                widens,
                adjust_set: config.adjust_set,
                adjust_sleep: config.adjust_sleep,
                core: Mutex::new(Core {
                    device,
                    queue: AlarmQueue::new(queue_period),
                    checkpoint: 0,
                    device_last: 0,
                    device_period,
                }),
            }
        });

        {
            let mut core = clock.lock();
            let raw = core.device.now();
            core.device_last = raw;
            let start = if clock.widens { 0 } else { raw };
            core.queue.resync(start);
            if clock.widens {
                core.device.set(max_value >> 1);
            }
        }
        debug!(name = config.name, max_value, widens, "clock created");
        clock
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Highest value [`now`](Clock::now) can return before wrapping.
    pub fn max_value(&self) -> u32 {
        if self.widens {
            u32::MAX
        } else {
            self.max_value
        }
    }

    /// Compensation applied by blocking helpers layered on this clock.
    pub fn adjust_sleep(&self) -> u32 {
        self.adjust_sleep
    }

    /// Current reading. Monotonic modulo 2^32 on widened and full-width
    /// clocks; raw clocks wrap with their device.
    pub fn now(&self) -> u32 {
        let mut core = self.lock();
        self.now_locked(&mut core)
    }

    /// Allocates an alarm whose `sink` runs each time the alarm fires.
    pub fn create_alarm<F>(&self, sink: F) -> Alarm
    where
        F: FnMut(&Clock) + Send + 'static,
    {
        let mut core = self.lock();
        let (index, gen) = core.queue.alloc(Box::new(sink));
        trace!(name = self.name, index, "alarm created");
        Alarm {
            index: index as u32,
            gen,
        }
    }

    /// Cancels and releases an alarm. Outstanding copies of the token become
    /// stale. A sink already in flight still completes.
    pub fn delete_alarm(&self, alarm: Alarm) {
        let mut core = self.lock();
        let Some(idx) = self.resolve(&core, alarm) else {
            return;
        };
        if core.queue.is_armed(idx) {
            let now = self.now_locked(&mut core);
            core.queue.resync(now);
            if core.queue.unlink(idx) {
                self.reprogram(&mut core);
            }
        }
        core.queue.free(idx);
        trace!(name = self.name, index = alarm.index, "alarm deleted");
    }

    /// Schedules the alarm `offset` ticks from now, replacing any earlier
    /// scheduling. Alarms with equal targets fire in arming order.
    pub fn arm(&self, alarm: Alarm, offset: u32) {
        let mut core = self.lock();
        let Some(idx) = self.resolve(&core, alarm) else {
            return;
        };
        let now = self.now_locked(&mut core);
        core.queue.resync(now);
        if core.queue.is_armed(idx) {
            core.queue.unlink(idx);
        }
        let offset = offset.saturating_sub(self.adjust_set);
        core.queue.insert(idx, offset);
        trace!(name = self.name, index = alarm.index, offset, now, "alarm armed");
        self.reprogram(&mut core);
    }

    /// Unschedules the alarm. Idempotent; the token stays valid for re-arming.
    pub fn cancel(&self, alarm: Alarm) {
        let mut core = self.lock();
        let Some(idx) = self.resolve(&core, alarm) else {
            return;
        };
        if !core.queue.is_armed(idx) {
            return;
        }
        let now = self.now_locked(&mut core);
        core.queue.resync(now);
        if core.queue.unlink(idx) {
            self.reprogram(&mut core);
        }
        trace!(name = self.name, index = alarm.index, "alarm cancelled");
    }

    pub fn is_armed(&self, alarm: Alarm) -> bool {
        let core = self.lock();
        match self.resolve(&core, alarm) {
            Some(idx) => core.queue.is_armed(idx),
            None => false,
        }
    }

    /// Dispatch entry point, normally invoked through a [`TickHandle`] when
    /// the device fires. Pops due alarms one at a time, resynchronizing
    /// between callbacks, then reprograms the device for the next target. An
    /// early or spurious fire therefore just postpones: nothing is due, and
    /// the device is re-armed for the remainder.
    pub fn tick(&self) {
        let mut core = self.lock();
        loop {
            let now = self.now_locked(&mut core);
            core.queue.resync(now);
            let Some((idx, offset)) = core.queue.peek() else {
                break;
            };
            if offset != 0 {
                break;
            }
            if core.queue.sink_checked_out(idx) {
                // Another thread is mid-callback on this alarm and will loop
                // again once it restores the sink; leave the entry queued.
                break;
            }
            core.queue.pop_due();
            let mut sink = core
                .queue
                .take_sink(idx)
                .expect("due alarm has no sink installed");
            let gen = core.queue.gen(idx);
            trace!(name = self.name, index = idx, now, "alarm fired");
            drop(core);
            sink(self);
            core = self.lock();
            if core.queue.gen(idx) == gen {
                core.queue.put_sink(idx, sink);
            }
        }
        self.reprogram(&mut core);
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().expect("clock mutex poisoned")
    }

    fn now_locked(&self, core: &mut Core) -> u32 {
        let raw = core.device.now();
        if !self.widens {
            return raw;
        }
        debug_assert!((raw as u64) < core.device_period);
        let diff =
            ((raw as u64 + core.device_period - core.device_last as u64) % core.device_period) as u32;
        let now = core.checkpoint.wrapping_add(diff);
        core.checkpoint = now;
        core.device_last = raw;
        now
    }

    /// Programs the device for the queue head, never more than half the
    /// device range ahead so the next observation cannot be mistaken for a
    /// wrap. An idle widened clock keeps the heartbeat armed instead.
    fn reprogram(&self, core: &mut Core) {
        match core.queue.peek() {
            Some((_, offset)) => {
                let ticks = offset.min(self.max_value >> 1);
                trace!(name = self.name, ticks, "device armed");
                core.device.set(ticks);
            }
            None if self.widens => core.device.set(self.max_value >> 1),
            None => core.device.cancel(),
        }
    }

    fn resolve(&self, core: &Core, alarm: Alarm) -> Option<usize> {
        let idx = alarm.index as usize;
        if core.queue.gen(idx) == Some(alarm.gen) {
            Some(idx)
        } else {
            warn!(
                name = self.name,
                index = alarm.index,
                "operation on a stale alarm token ignored"
            );
            None
        }
    }
}
