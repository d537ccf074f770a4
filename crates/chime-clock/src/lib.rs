//! Layered virtual clocks and alarm scheduling.
//!
//! A [`Clock`] pairs a [`TickDevice`] (a wrapping hardware-like counter that
//! can fire once at a programmed count) with an alarm queue storing **relative
//! offsets**: each queued alarm records the delta to its predecessor, so a
//! 32-bit counter schedules correctly across wraparound without widening
//! arithmetic. Clocks stack: [`extend`] presents a narrow counter as a full
//! 32-bit clock, [`convert`] rescales between tick rates, and the same core
//! runs on the host backend in production and on [`mock_clock`] in tests.
//!
//! Alarm callbacks are invoked with the clock's lock released, so a callback
//! may re-arm itself, arm or cancel other alarms, or read the clock.

#![forbid(unsafe_code)]

mod clock;
mod convert;
mod device;
mod extend;
mod host;
mod init;
mod mock;
mod queue;

pub use clock::{Alarm, Clock, ClockConfig};
pub use convert::convert;
pub use device::{TickDevice, TickHandle};
pub use extend::extend;
pub use host::{HostDevice, DEFAULT_HOST_FREQ_HZ};
pub use init::{Clocks, HostClockConfig};
pub use mock::{mock_clock, MockHandle};
