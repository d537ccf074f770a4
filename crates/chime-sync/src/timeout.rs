use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::Thread;

use chime_clock::{Alarm, Clock};
use thiserror::Error;

/// The deadline passed before a message arrived.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("timed out before a message arrived")]
pub struct TimeoutError;

/// Wire format inside the mailbox channel. Deadline markers carry the
/// sequence number of the receive that armed them, so a marker from an
/// already-satisfied receive can be told apart and skipped.
enum Envelope<T> {
    Payload(T),
    Elapsed { seq: u64 },
}

/// Single-consumer mailbox whose receives can carry a clock deadline.
///
/// Senders are cheap clones; the mailbox itself keeps one sender alive, so
/// a receive never observes a disconnected channel.
pub struct Mailbox<T> {
    tx: Sender<Envelope<T>>,
    rx: Receiver<Envelope<T>>,
    next_seq: u64,
}

pub struct MailSender<T> {
    tx: Sender<Envelope<T>>,
}

impl<T> Clone for MailSender<T> {
    fn clone(&self) -> Self {
        MailSender {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MailSender<T> {
    /// Posts a message. Delivery to a dropped mailbox is silently ignored.
    pub fn send(&self, message: T) {
        let _ = self.tx.send(Envelope::Payload(message));
    }
}

impl<T: Send + 'static> Mailbox<T> {
    pub fn new() -> Mailbox<T> {
        let (tx, rx) = mpsc::channel();
        Mailbox {
            tx,
            rx,
            next_seq: 0,
        }
    }

    pub fn sender(&self) -> MailSender<T> {
        MailSender {
            tx: self.tx.clone(),
        }
    }

    /// Blocks until a message arrives.
    pub fn recv(&mut self) -> T {
        loop {
            match self.rx.recv().expect("mailbox keeps its own sender alive") {
                Envelope::Payload(message) => return message,
                Envelope::Elapsed { .. } => {}
            }
        }
    }

    /// Returns the next message without blocking, if one is queued.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(Envelope::Payload(message)) => return Some(message),
                Ok(Envelope::Elapsed { .. }) => {}
                Err(_) => return None,
            }
        }
    }

    /// Blocks until a message arrives or `ticks` elapse on `clock`.
    pub fn recv_timeout(&mut self, clock: &Arc<Clock>, ticks: u32) -> Result<T, TimeoutError> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let tx = self.tx.clone();
        let alarm = clock.create_alarm(move |_| {
            let _ = tx.send(Envelope::Elapsed { seq });
        });
        clock.arm(alarm, ticks);

        let result = loop {
            match self.rx.recv().expect("mailbox keeps its own sender alive") {
                Envelope::Payload(message) => break Ok(message),
                Envelope::Elapsed { seq: fired } if fired == seq => break Err(TimeoutError),
                // Deadline of an earlier receive that was satisfied first.
                Envelope::Elapsed { .. } => {}
            }
        };
        clock.delete_alarm(alarm);
        result
    }
}

impl<T: Send + 'static> Default for Mailbox<T> {
    fn default() -> Self {
        Mailbox::new()
    }
}

/// Handle for a pending [`send_after`]; dropping it cancels the send.
pub struct MessageTimer {
    clock: Arc<Clock>,
    alarm: Alarm,
}

impl MessageTimer {
    pub fn is_pending(&self) -> bool {
        self.clock.is_armed(self.alarm)
    }

    pub fn cancel(self) {}
}

impl Drop for MessageTimer {
    fn drop(&mut self) {
        self.clock.delete_alarm(self.alarm);
    }
}

/// Posts `message` to `mailbox` once `ticks` elapse on `clock`.
pub fn send_after<T: Send + 'static>(
    clock: Arc<Clock>,
    mailbox: &Mailbox<T>,
    ticks: u32,
    message: T,
) -> MessageTimer {
    let tx = mailbox.tx.clone();
    let mut slot = Some(message);
    let alarm = clock.create_alarm(move |_| {
        if let Some(message) = slot.take() {
            let _ = tx.send(Envelope::Payload(message));
        }
    });
    clock.arm(alarm, ticks);
    MessageTimer { clock, alarm }
}

/// Handle for a pending [`unpark_after`]; dropping it cancels the wakeup.
pub struct WakeupTimer {
    clock: Arc<Clock>,
    alarm: Alarm,
}

impl WakeupTimer {
    pub fn is_pending(&self) -> bool {
        self.clock.is_armed(self.alarm)
    }

    pub fn cancel(self) {}
}

impl Drop for WakeupTimer {
    fn drop(&mut self) {
        self.clock.delete_alarm(self.alarm);
    }
}

/// Unparks `thread` once `ticks` elapse on `clock`.
///
/// Pair with a `park` loop that rechecks its wake condition: parking can
/// return spuriously, and the alarm may fire before the thread parks.
pub fn unpark_after(clock: Arc<Clock>, ticks: u32, thread: Thread) -> WakeupTimer {
    let alarm = clock.create_alarm(move |_| thread.unpark());
    clock.arm(alarm, ticks);
    WakeupTimer { clock, alarm }
}

#[cfg(test)]
mod tests {
    use chime_clock::{mock_clock, ClockConfig};

    use super::*;

    #[test]
    fn stale_deadline_markers_are_skipped() {
        let (clock, _mock) = mock_clock(32, ClockConfig::default());
        let mut mailbox = Mailbox::new();

        // A marker left over from an earlier receive must neither satisfy
        // nor abort the next one.
        mailbox
            .tx
            .send(Envelope::Elapsed { seq: 99 })
            .expect("receiver held locally");
        mailbox.sender().send("fresh");

        assert_eq!(mailbox.recv_timeout(&clock, 1_000), Ok("fresh"));
    }

    #[test]
    fn a_marker_for_the_current_receive_times_out() {
        let (clock, _mock) = mock_clock(32, ClockConfig::default());
        let mut mailbox: Mailbox<&str> = Mailbox::new();

        mailbox
            .tx
            .send(Envelope::Elapsed { seq: 0 })
            .expect("receiver held locally");

        assert_eq!(mailbox.recv_timeout(&clock, 1_000), Err(TimeoutError));
    }
}
