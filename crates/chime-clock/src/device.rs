use std::sync::Weak;

use crate::clock::Clock;

/// The counting/alarm contract between a [`Clock`] and whatever sits beneath
/// it: a host timer, a mock counter, or another clock wrapped by the extend or
/// convert layers.
///
/// A device is a free-running counter in `0..=max_value()` that wraps, plus a
/// single one-shot alarm slot. All calls are made with the owning clock's lock
/// held, so implementations must not call back into that clock synchronously;
/// expiry is delivered later through the [`TickHandle`] received in
/// [`attach`](TickDevice::attach).
pub trait TickDevice: Send {
    /// Current counter value, in `0..=max_value()`.
    fn now(&mut self) -> u32;

    /// Arms the device to fire once, `ticks` from the current counter value.
    /// Re-arming replaces any previously programmed target.
    fn set(&mut self, ticks: u32);

    /// Disarms any programmed target.
    fn cancel(&mut self);

    /// Highest representable counter value; the counter wraps past it.
    fn max_value(&self) -> u32 {
        u32::MAX
    }

    /// Wires up the upcall used to deliver expiry. Called once, before the
    /// device can be armed.
    fn attach(&mut self, handle: TickHandle);
}

/// Expiry upcall handed to a [`TickDevice`]. Weakly references the owning
/// clock, so a device thread outliving its clock fires into nothing.
#[derive(Clone, Debug)]
pub struct TickHandle {
    clock: Weak<Clock>,
}

impl TickHandle {
    pub(crate) fn new(clock: Weak<Clock>) -> Self {
        Self { clock }
    }

    /// Runs the owning clock's dispatch. Must not be called while holding any
    /// clock lock above the device.
    pub fn fire(&self) {
        if let Some(clock) = self.clock.upgrade() {
            clock.tick();
        }
    }
}
