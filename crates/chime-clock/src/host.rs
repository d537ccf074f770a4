//! Host timer backend: a monotonic `Instant`-based counter and a deadline
//! thread that turns wall-clock waits into tick deliveries.
//!
//! Tick-to-duration conversion rounds up, so the worker never wakes before
//! the programmed target; the core tolerates the resulting sub-tick lateness
//! by resynchronizing on every fire.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::device::{TickDevice, TickHandle};

pub const DEFAULT_HOST_FREQ_HZ: u64 = 1_000_000;

/// A [`TickDevice`] counting real time at `freq_hz`, full 32-bit range.
pub struct HostDevice {
    epoch: Instant,
    freq_hz: u64,
    shared: Arc<HostShared>,
    worker: Option<JoinHandle<()>>,
}

struct HostShared {
    ctl: Mutex<HostCtl>,
    cv: Condvar,
}

#[derive(Default)]
struct HostCtl {
    deadline: Option<Instant>,
    handle: Option<TickHandle>,
    shutdown: bool,
}

impl HostDevice {
    pub fn new(freq_hz: u64) -> Self {
        assert!(freq_hz > 0, "host clock frequency must be non-zero");
        let shared = Arc::new(HostShared {
            ctl: Mutex::new(HostCtl::default()),
            cv: Condvar::new(),
        });
        let worker = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("chime-host".into())
                .spawn(move || run_worker(&shared))
                .expect("failed to spawn host timer thread")
        };
        debug!(freq_hz, "host tick device started");
        Self {
            epoch: Instant::now(),
            freq_hz,
            shared,
            worker: Some(worker),
        }
    }

    fn lock_ctl(&self) -> MutexGuard<'_, HostCtl> {
        self.shared.ctl.lock().expect("host timer mutex poisoned")
    }

    fn ticks_elapsed(&self) -> u64 {
        let ns = self.epoch.elapsed().as_nanos();
        (ns * self.freq_hz as u128 / 1_000_000_000u128) as u64
    }

    fn ns_from_ticks_ceil(&self, ticks: u32) -> u64 {
        let numer = ticks as u128 * 1_000_000_000u128;
        let denom = self.freq_hz as u128;
        ((numer + denom - 1) / denom) as u64
    }
}

impl TickDevice for HostDevice {
    fn now(&mut self) -> u32 {
        self.ticks_elapsed() as u32
    }

    fn set(&mut self, ticks: u32) {
        let deadline = Instant::now() + Duration::from_nanos(self.ns_from_ticks_ceil(ticks));
        let mut ctl = self.lock_ctl();
        ctl.deadline = Some(deadline);
        self.shared.cv.notify_one();
    }

    fn cancel(&mut self) {
        let mut ctl = self.lock_ctl();
        ctl.deadline = None;
        self.shared.cv.notify_one();
    }

    fn attach(&mut self, handle: TickHandle) {
        self.lock_ctl().handle = Some(handle);
    }
}

impl Drop for HostDevice {
    fn drop(&mut self) {
        {
            let mut ctl = self.lock_ctl();
            ctl.shutdown = true;
            self.shared.cv.notify_one();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(shared: &HostShared) {
    let mut ctl = shared.ctl.lock().expect("host timer mutex poisoned");
    loop {
        if ctl.shutdown {
            return;
        }
        match ctl.deadline {
            None => {
                ctl = shared.cv.wait(ctl).expect("host timer mutex poisoned");
            }
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    let (guard, _) = shared
                        .cv
                        .wait_timeout(ctl, deadline - now)
                        .expect("host timer mutex poisoned");
                    ctl = guard;
                } else {
                    ctl.deadline = None;
                    let handle = ctl.handle.clone();
                    // Fire with the control lock released: dispatch re-enters
                    // this device through `set`/`cancel`.
                    drop(ctl);
                    if let Some(handle) = handle {
                        handle.fire();
                    }
                    ctl = shared.ctl.lock().expect("host timer mutex poisoned");
                }
            }
        }
    }
}
