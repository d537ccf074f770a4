use std::sync::{Arc, Condvar, Mutex};

use chime_clock::Clock;

struct Notifier {
    fired: Mutex<bool>,
    cv: Condvar,
}

/// Blocks the calling thread for `ticks` on `clock`.
///
/// The clock's sleep adjustment is subtracted from the offset, so a
/// calibrated clock wakes closer to the requested instant than the raw
/// alarm would. Sleeping for zero ticks returns immediately.
pub fn sleep(clock: &Arc<Clock>, ticks: u32) {
    if ticks == 0 {
        return;
    }
    let notifier = Arc::new(Notifier {
        fired: Mutex::new(false),
        cv: Condvar::new(),
    });

    let target = Arc::clone(&notifier);
    let alarm = clock.create_alarm(move |_| {
        *target.fired.lock().expect("sleep flag holder panicked") = true;
        target.cv.notify_all();
    });
    clock.arm(alarm, ticks.saturating_sub(clock.adjust_sleep()));

    let mut fired = notifier.fired.lock().expect("sleep flag holder panicked");
    while !*fired {
        fired = notifier.cv.wait(fired).expect("sleep flag holder panicked");
    }
    drop(fired);
    clock.delete_alarm(alarm);
}

/// Busy-waits until `ticks` have elapsed on `clock`.
///
/// Only sensible for waits shorter than the cost of parking a thread;
/// anything longer belongs in [`sleep`].
pub fn spin(clock: &Arc<Clock>, ticks: u32) {
    let start = clock.now();
    while clock.now().wrapping_sub(start) < ticks {
        std::hint::spin_loop();
    }
}
