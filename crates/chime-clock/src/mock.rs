//! Deterministic test clock.
//!
//! [`mock_clock`] builds a real core over a counter that only moves when the
//! test says so. [`MockHandle::advance`] steps the counter in chunks so that
//! dispatch happens at exactly the programmed target value, however many
//! alarms come due inside the advanced window. Interaction counters expose
//! how the core drove the device.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::{Clock, ClockConfig};
use crate::device::{TickDevice, TickHandle};

/// A clock over a `width_bits`-wide mock counter, plus its control handle.
pub fn mock_clock(width_bits: u32, config: ClockConfig) -> (Arc<Clock>, MockHandle) {
    assert!(
        (2..=32).contains(&width_bits),
        "mock counters are 2..=32 bits wide"
    );
    let mask = if width_bits == 32 {
        u32::MAX
    } else {
        (1 << width_bits) - 1
    };
    let state = Arc::new(Mutex::new(MockState {
        mask,
        counter: 0,
        target: None,
        handle: None,
        now_calls: 0,
        set_calls: 0,
        cancel_calls: 0,
    }));
    let clock = Clock::new(Box::new(MockDevice { state: state.clone() }), config);
    (clock, MockHandle { state })
}

struct MockState {
    mask: u32,
    counter: u32,
    /// Absolute (masked) counter value to fire at.
    target: Option<u32>,
    handle: Option<TickHandle>,
    now_calls: u32,
    set_calls: u32,
    cancel_calls: u32,
}

struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state mutex poisoned")
    }
}

impl TickDevice for MockDevice {
    fn now(&mut self) -> u32 {
        let mut st = self.state();
        st.now_calls += 1;
        st.counter
    }

    fn set(&mut self, ticks: u32) {
        let mut st = self.state();
        st.set_calls += 1;
        st.target = Some(st.counter.wrapping_add(ticks) & st.mask);
    }

    fn cancel(&mut self) {
        let mut st = self.state();
        st.cancel_calls += 1;
        st.target = None;
    }

    fn max_value(&self) -> u32 {
        self.state().mask
    }

    fn attach(&mut self, handle: TickHandle) {
        self.state().handle = Some(handle);
    }
}

/// Test-side control over a mock clock's counter.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state mutex poisoned")
    }

    /// Moves the counter forward by `ticks`, dispatching at every programmed
    /// target crossed on the way. Dispatch runs on the calling thread with
    /// the counter stopped exactly at the target, so callbacks observe the
    /// precise fire time.
    pub fn advance(&self, mut ticks: u32) {
        while ticks > 0 {
            let fire = {
                let mut st = self.state();
                match st.target {
                    Some(target) => {
                        let distance = target.wrapping_sub(st.counter) & st.mask;
                        if distance <= ticks {
                            st.counter = target;
                            st.target = None;
                            ticks -= distance;
                            st.handle.clone()
                        } else {
                            st.counter = st.counter.wrapping_add(ticks) & st.mask;
                            ticks = 0;
                            None
                        }
                    }
                    None => {
                        st.counter = st.counter.wrapping_add(ticks) & st.mask;
                        ticks = 0;
                        None
                    }
                }
            };
            // Fired outside the state lock: dispatch reads the counter and
            // reprograms the target through the device.
            match fire {
                Some(handle) => handle.fire(),
                None => break,
            }
        }
    }

    /// Sets the counter without dispatching, like hardware whose compare
    /// edge was skipped over. Overdue alarms are delivered at the next fire.
    pub fn jump(&self, to: u32) {
        let mut st = self.state();
        st.counter = to & st.mask;
    }

    /// Invokes the clock's dispatch as a spurious interrupt would: nothing
    /// due means nothing runs and the device is re-armed for the remainder.
    pub fn fire(&self) {
        let handle = self.state().handle.clone();
        if let Some(handle) = handle {
            handle.fire();
        }
    }

    /// Raw counter value.
    pub fn counter(&self) -> u32 {
        self.state().counter
    }

    /// Absolute counter value the device is armed for.
    pub fn armed_target(&self) -> Option<u32> {
        self.state().target
    }

    pub fn now_calls(&self) -> u32 {
        self.state().now_calls
    }

    pub fn set_calls(&self) -> u32 {
        self.state().set_calls
    }

    pub fn cancel_calls(&self) -> u32 {
        self.state().cancel_calls
    }
}
