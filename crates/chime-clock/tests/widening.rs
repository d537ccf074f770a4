use std::sync::{Arc, Mutex};

use chime_clock::{mock_clock, Clock, ClockConfig, MockHandle};

fn eight_bit() -> (Arc<Clock>, MockHandle) {
    mock_clock(8, ClockConfig::default())
}

fn fire_times(clock: &Arc<Clock>) -> (chime_clock::Alarm, Arc<Mutex<Vec<u32>>>) {
    let fired: Arc<Mutex<Vec<u32>>> = Arc::default();
    let sink_fired = Arc::clone(&fired);
    let alarm = clock.create_alarm(move |clock| sink_fired.lock().unwrap().push(clock.now()));
    (alarm, fired)
}

#[test]
fn readings_stay_exact_across_counter_rollover() {
    let (clock, mock) = eight_bit();

    let mut readings = Vec::new();
    for _ in 0..7 {
        mock.advance(50);
        readings.push(clock.now());
    }

    // 255 -> 0 rollover happens between the fifth and sixth step.
    assert_eq!(readings, [50, 100, 150, 200, 250, 300, 350]);
}

#[test]
fn reported_range_is_full_width_once_extended() {
    let (clock, _mock) = eight_bit();
    assert_eq!(clock.max_value(), u32::MAX);

    let (raw, _mock) = mock_clock(8, ClockConfig {
        widen: false,
        ..ClockConfig::default()
    });
    assert_eq!(raw.max_value(), 255);
}

#[test]
fn alarm_beyond_the_device_range_fires_exactly_once() {
    let (clock, mock) = eight_bit();
    let (alarm, fired) = fire_times(&clock);

    clock.arm(alarm, 1_000);
    mock.advance(1);
    mock.advance(100);
    mock.advance(898);
    assert!(fired.lock().unwrap().is_empty());
    assert_eq!(clock.now(), 999);

    mock.advance(1);
    assert_eq!(*fired.lock().unwrap(), [1_000]);

    // No stale repeat after further wraps.
    mock.advance(1_000);
    assert_eq!(*fired.lock().unwrap(), [1_000]);
}

#[test]
fn idle_clocks_keep_counting_through_the_heartbeat() {
    let (clock, mock) = eight_bit();

    // Nothing armed by the caller; the half-range heartbeat alone must
    // carry the checkpoint across many wraps.
    mock.advance(5_000);
    assert_eq!(clock.now(), 5_000);
}

#[test]
fn early_wakeups_postpone_without_dispatching() {
    let (clock, mock) = eight_bit();
    let (alarm, fired) = fire_times(&clock);

    clock.arm(alarm, 100);
    assert_eq!(mock.set_calls(), 2); // heartbeat at creation, then the alarm

    mock.fire();
    assert!(fired.lock().unwrap().is_empty());
    // The early wakeup re-armed the device for the remaining distance.
    assert_eq!(mock.set_calls(), 3);
    assert_eq!(mock.armed_target(), Some(100));

    mock.advance(100);
    assert_eq!(*fired.lock().unwrap(), [100]);
}

#[test]
fn half_range_clamp_bounds_every_device_program() {
    let (clock, mock) = eight_bit();
    let (alarm, _fired) = fire_times(&clock);

    // Device target is clamped to half the range even for far alarms, so
    // the compare value stays ahead of a counter that may already have
    // moved past the checkpoint.
    clock.arm(alarm, 1_000);
    assert_eq!(mock.armed_target(), Some(127));
}

#[test]
fn jumping_past_the_compare_edge_delays_until_the_next_wrap() {
    let (clock, mock) = eight_bit();
    let (alarm, fired) = fire_times(&clock);

    clock.arm(alarm, 100);
    assert_eq!(mock.armed_target(), Some(100));

    // Counter warps past the compare value without ever matching it. The
    // hardware analogue is a comparator miss: nothing fires until the
    // counter comes around again.
    mock.jump(200);
    assert_eq!(clock.now(), 200);
    assert!(fired.lock().unwrap().is_empty());

    mock.advance(156);
    assert_eq!(mock.counter(), 100);
    assert_eq!(*fired.lock().unwrap(), [356]);
    assert_eq!(clock.now(), 356);
}
