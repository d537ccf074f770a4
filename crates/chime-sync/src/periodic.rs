use std::sync::{Arc, OnceLock};

use chime_clock::{Alarm, Clock};
use tracing::debug;

use crate::sleep::sleep;

/// Sleeps until one `period` past `*last`, holding a fixed cadence across
/// calls even when the caller's own work eats into each interval.
///
/// `*last` carries the cadence origin between calls and is updated to the
/// instant this call woke at. When the caller has fallen a full period or
/// more behind, the cadence restarts from the current time instead of
/// firing back-to-back to catch up.
pub fn periodic_wakeup(clock: &Arc<Clock>, last: &mut u32, period: u32) {
    let now = clock.now();
    let target = last.wrapping_add(period);
    let offset = target.wrapping_sub(now);
    if offset <= period {
        sleep(clock, offset);
        *last = target;
    } else {
        *last = now;
    }
}

/// Repeating alarm that invokes `tick` every `period` ticks until the
/// callback returns `false` or the ticker is stopped.
pub struct Periodic {
    clock: Arc<Clock>,
    alarm: Alarm,
}

impl Periodic {
    pub fn every<F>(clock: Arc<Clock>, period: u32, mut tick: F) -> Periodic
    where
        F: FnMut() -> bool + Send + 'static,
    {
        assert!(period > 0, "a zero period would rearm for the same instant");

        // The sink rearms its own alarm, so the token is published through
        // a cell the sink can read back once it exists.
        let token: Arc<OnceLock<Alarm>> = Arc::new(OnceLock::new());
        let sink_token = Arc::clone(&token);
        let mut next = clock.now().wrapping_add(period);
        let alarm = clock.create_alarm(move |clock| {
            if !tick() {
                return;
            }
            let me = *sink_token.get().expect("token published before arming");
            let now = clock.now();
            next = next.wrapping_add(period);
            let mut offset = next.wrapping_sub(now);
            if offset > period {
                // A full period or more behind; restart the cadence.
                next = now.wrapping_add(period);
                offset = period;
            }
            clock.arm(me, offset);
        });
        token.set(alarm).expect("token cell starts empty");

        debug!(clock = clock.name(), period, "periodic ticker started");
        clock.arm(alarm, period);
        Periodic { clock, alarm }
    }

    pub fn stop(self) {}
}

impl Drop for Periodic {
    fn drop(&mut self) {
        self.clock.delete_alarm(self.alarm);
    }
}
