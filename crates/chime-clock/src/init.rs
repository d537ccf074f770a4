//! Standard clock composition.
//!
//! Instead of global singletons, the microsecond/millisecond pair is built
//! once at startup and passed to whatever needs it.

use std::sync::Arc;

use tracing::debug;

use crate::clock::{Clock, ClockConfig};
use crate::convert::convert;
use crate::host::{HostDevice, DEFAULT_HOST_FREQ_HZ};

#[derive(Debug, Clone, Copy)]
pub struct HostClockConfig {
    /// Tick rate of the microsecond clock.
    pub freq_hz: u64,
}

impl Default for HostClockConfig {
    fn default() -> Self {
        Self {
            freq_hz: DEFAULT_HOST_FREQ_HZ,
        }
    }
}

/// The standard clock pair: `usec` directly over the host backend, `msec`
/// derived from it by rational conversion (and widened by the core, since
/// the scaled range is narrower than 32 bits).
pub struct Clocks {
    pub usec: Arc<Clock>,
    pub msec: Arc<Clock>,
}

impl Clocks {
    pub fn host(config: HostClockConfig) -> Clocks {
        let usec = Clock::new(
            Box::new(HostDevice::new(config.freq_hz)),
            ClockConfig {
                name: "usec",
                ..ClockConfig::default()
            },
        );
        let msec = convert(
            Arc::clone(&usec),
            1,
            1000,
            ClockConfig {
                name: "msec",
                ..ClockConfig::default()
            },
        );
        debug!(freq_hz = config.freq_hz, "standard host clocks ready");
        Clocks { usec, msec }
    }
}
