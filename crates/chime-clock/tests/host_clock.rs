use std::sync::mpsc;
use std::time::{Duration, Instant};

use chime_clock::{Clocks, HostClockConfig};

fn clocks() -> Clocks {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
    Clocks::host(HostClockConfig::default())
}

#[test]
fn microsecond_alarms_fire_no_earlier_than_programmed() {
    let clocks = clocks();
    let (tx, rx) = mpsc::channel();

    let started = Instant::now();
    let alarm = clocks.usec.create_alarm(move |_| {
        let _ = tx.send(Instant::now());
    });
    clocks.usec.arm(alarm, 20_000);

    let fired_at = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("alarm never fired");
    assert!(fired_at.duration_since(started) >= Duration::from_millis(20));

    clocks.usec.delete_alarm(alarm);
}

#[test]
fn millisecond_alarms_ride_the_converted_clock() {
    let clocks = clocks();
    let (tx, rx) = mpsc::channel();

    let started = Instant::now();
    let alarm = clocks.msec.create_alarm(move |clock| {
        let _ = tx.send(clock.now());
    });
    clocks.msec.arm(alarm, 30);

    let fired_now = rx
        .recv_timeout(Duration::from_secs(10))
        .expect("alarm never fired");
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert!(fired_now >= 30);

    clocks.msec.delete_alarm(alarm);
}

#[test]
fn host_readings_are_monotonic() {
    let clocks = clocks();

    let mut last = clocks.usec.now();
    for _ in 0..10_000 {
        let now = clocks.usec.now();
        assert!(now >= last, "reading went backwards: {last} -> {now}");
        last = now;
    }
}

#[test]
fn cancelled_host_alarms_never_fire() {
    let clocks = clocks();
    let (tx, rx) = mpsc::channel();

    let alarm = clocks.usec.create_alarm(move |_| {
        let _ = tx.send(());
    });
    clocks.usec.arm(alarm, 50_000);
    clocks.usec.cancel(alarm);

    std::thread::sleep(Duration::from_millis(120));
    assert!(rx.try_recv().is_err());
}
