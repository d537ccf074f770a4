//! Blocking time utilities layered on [`chime_clock`] clocks.
//!
//! Everything in this crate parks a thread on an alarm: one-shot sleeps,
//! fixed-cadence wakeups, and channel receives with a deadline. Alarm
//! callbacks stay tiny (set a flag, post a message, unpark) so they are
//! safe to run from whatever thread drives the underlying clock.

#![forbid(unsafe_code)]

mod periodic;
mod sleep;
mod stopwatch;
mod timeout;

pub use periodic::{periodic_wakeup, Periodic};
pub use sleep::{sleep, spin};
pub use stopwatch::Stopwatch;
pub use timeout::{
    send_after, unpark_after, MailSender, Mailbox, MessageTimer, TimeoutError, WakeupTimer,
};
