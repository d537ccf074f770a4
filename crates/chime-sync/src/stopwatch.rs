use std::sync::Arc;

use chime_clock::Clock;

/// Measures elapsed ticks between two points on one clock.
pub struct Stopwatch {
    clock: Arc<Clock>,
    started: u32,
}

impl Stopwatch {
    pub fn start(clock: Arc<Clock>) -> Stopwatch {
        let started = clock.now();
        Stopwatch { clock, started }
    }

    /// Ticks since start or the last [`restart`](Self::restart).
    ///
    /// Wrapping arithmetic keeps the result exact while less than one full
    /// clock period has passed.
    pub fn elapsed(&self) -> u32 {
        self.clock.now().wrapping_sub(self.started)
    }

    /// Reports the elapsed ticks and starts the next measurement.
    pub fn restart(&mut self) -> u32 {
        let now = self.clock.now();
        let elapsed = now.wrapping_sub(self.started);
        self.started = now;
        elapsed
    }
}
