//! Rational tick-rate conversion between stacked clocks.
//!
//! [`convert`] presents a clock counting `div` upper ticks for every `mul`
//! lower ticks. Readings scale down with floor division, offsets scale up
//! with ceiling division, so a converted alarm can fire late by a fraction of
//! an upper tick but never early. The presented range is the lower range
//! scaled the same way; when it drops below 32 bits the upper core widens
//! over it, which is why the core's checkpoint arithmetic works on arbitrary
//! (not just power-of-two) periods.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::clock::{Alarm, Clock, ClockConfig};
use crate::device::{TickDevice, TickHandle};

/// Derives a clock from `lower` where `upper_now = lower_now * div / mul`.
pub fn convert(lower: Arc<Clock>, div: u32, mul: u32, config: ClockConfig) -> Arc<Clock> {
    assert!(div > 0 && mul > 0, "conversion ratio must be non-zero");
    let scaled = lower.max_value() as u64 * div as u64 / mul as u64;
    assert!(
        scaled <= u32::MAX as u64,
        "converted range exceeds 32 bits; convert from a narrower clock"
    );

    let state = Arc::new(ConvertState {
        inner: Mutex::new(ConvertInner {
            alarm: None,
            handle: None,
        }),
    });
    let on_fire = state.clone();
    let alarm = lower.create_alarm(move |_| on_fire.fire_upper());
    state.lock_inner().alarm = Some(alarm);
    debug!(name = config.name, div, mul, "conversion attached");

    Clock::new(
        Box::new(ConvertDevice {
            lower,
            state,
            div: div as u64,
            mul: mul as u64,
            max_value: scaled as u32,
        }),
        config,
    )
}

struct ConvertState {
    inner: Mutex<ConvertInner>,
}

struct ConvertInner {
    alarm: Option<Alarm>,
    handle: Option<TickHandle>,
}

impl ConvertState {
    fn lock_inner(&self) -> MutexGuard<'_, ConvertInner> {
        self.inner.lock().expect("convert state mutex poisoned")
    }

    fn fire_upper(&self) {
        let handle = self.lock_inner().handle.clone();
        if let Some(handle) = handle {
            handle.fire();
        }
    }
}

struct ConvertDevice {
    lower: Arc<Clock>,
    state: Arc<ConvertState>,
    div: u64,
    mul: u64,
    max_value: u32,
}

impl ConvertDevice {
    fn scale_down(&self, lower_ticks: u32) -> u32 {
        (lower_ticks as u64 * self.div / self.mul) as u32
    }

    /// Rounds up so the lower alarm never fires before the upper target.
    fn scale_up_ceil(&self, upper_ticks: u32) -> u32 {
        ((upper_ticks as u64 * self.mul + self.div - 1) / self.div) as u32
    }
}

impl TickDevice for ConvertDevice {
    fn now(&mut self) -> u32 {
        self.scale_down(self.lower.now())
    }

    fn set(&mut self, ticks: u32) {
        let Some(alarm) = self.state.lock_inner().alarm else {
            return;
        };
        self.lower.arm(alarm, self.scale_up_ceil(ticks));
    }

    fn cancel(&mut self) {
        let Some(alarm) = self.state.lock_inner().alarm else {
            return;
        };
        self.lower.cancel(alarm);
    }

    fn max_value(&self) -> u32 {
        self.max_value
    }

    fn attach(&mut self, handle: TickHandle) {
        self.state.lock_inner().handle = Some(handle);
    }
}

impl Drop for ConvertDevice {
    fn drop(&mut self) {
        let alarm = self.state.lock_inner().alarm.take();
        if let Some(alarm) = alarm {
            self.lower.delete_alarm(alarm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(div: u32, mul: u32) -> ConvertDevice {
        let (lower, _mock) = crate::mock::mock_clock(32, ClockConfig::default());
        ConvertDevice {
            lower,
            state: Arc::new(ConvertState {
                inner: Mutex::new(ConvertInner {
                    alarm: None,
                    handle: None,
                }),
            }),
            div: div as u64,
            mul: mul as u64,
            max_value: 0,
        }
    }

    #[test]
    fn readings_floor_and_offsets_ceil() {
        let d = device(123, 456);
        assert_eq!(d.scale_down(456), 123);
        assert_eq!(d.scale_down(455), 122);
        assert_eq!(d.scale_up_ceil(123), 456);
        assert_eq!(d.scale_up_ceil(100), 371); // 100 * 456 / 123 = 370.7..
        assert_eq!(d.scale_up_ceil(0), 0);
    }

    #[test]
    fn millisecond_style_ratio() {
        let d = device(1, 1000);
        assert_eq!(d.scale_down(999), 0);
        assert_eq!(d.scale_down(1000), 1);
        assert_eq!(d.scale_up_ceil(5), 5000);
    }
}
