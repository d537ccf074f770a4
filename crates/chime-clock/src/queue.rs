//! Relative-offset alarm queue.
//!
//! Armed alarms form a singly linked chain where each entry stores the delta
//! to its predecessor; summing deltas from the head gives each entry's target
//! relative to `base`, the clock value recorded at the last [`resync`]. Delta
//! encoding keeps every stored quantity a small forward distance, which is
//! what makes 32-bit targets safe across counter wraparound.
//!
//! Slots live in an arena with a free list. A generation counter per slot
//! lets callers detect tokens that outlived their alarm. The sink payload is
//! generic so this structure stays independent of the dispatch machinery; the
//! clock checks sinks out of their slot while a callback runs.
//!
//! [`resync`]: AlarmQueue::resync

pub(crate) struct AlarmQueue<S> {
    slots: Vec<Slot<S>>,
    free_head: Option<usize>,
    head: Option<usize>,
    /// Clock value at the last resync; head offsets are relative to this.
    base: u32,
    /// Modulus for elapsed-time arithmetic, `max_value + 1` of the domain the
    /// queue operates in (`1 << 32` for full-width or widened clocks).
    period: u64,
}

struct Slot<S> {
    gen: u32,
    state: SlotState<S>,
}

enum SlotState<S> {
    /// On the free list.
    Free { next_free: Option<usize> },
    /// Allocated but not queued. `sink` is `None` while checked out.
    Idle { sink: Option<S> },
    /// Queued `offset` ticks after its predecessor (or after `base` for the
    /// head). `sink` is `None` while checked out.
    Armed {
        sink: Option<S>,
        offset: u32,
        next: Option<usize>,
    },
}

impl<S> AlarmQueue<S> {
    pub fn new(period: u64) -> Self {
        assert!(period >= 2, "a one-value counter cannot express offsets");
        assert!(period <= 1 << 32);
        Self {
            slots: Vec::new(),
            free_head: None,
            head: None,
            base: 0,
            period,
        }
    }

    /// Allocates a slot holding `sink`, returning its index and generation.
    pub fn alloc(&mut self, sink: S) -> (usize, u32) {
        match self.free_head {
            Some(idx) => {
                let next_free = match &self.slots[idx].state {
                    SlotState::Free { next_free } => *next_free,
                    _ => unreachable!("free list points at a live slot"),
                };
                self.free_head = next_free;
                self.slots[idx].state = SlotState::Idle { sink: Some(sink) };
                (idx, self.slots[idx].gen)
            }
            None => {
                self.slots.push(Slot {
                    gen: 0,
                    state: SlotState::Idle { sink: Some(sink) },
                });
                (self.slots.len() - 1, 0)
            }
        }
    }

    /// Releases a slot back to the free list, invalidating outstanding tokens.
    /// The slot must not be armed.
    pub fn free(&mut self, idx: usize) {
        debug_assert!(!self.is_armed(idx), "freeing an armed alarm slot");
        let slot = &mut self.slots[idx];
        slot.gen = slot.gen.wrapping_add(1);
        slot.state = SlotState::Free {
            next_free: self.free_head,
        };
        self.free_head = Some(idx);
    }

    /// Generation of a live slot, or `None` if the slot is free or the index
    /// is out of range.
    pub fn gen(&self, idx: usize) -> Option<u32> {
        let slot = self.slots.get(idx)?;
        if matches!(slot.state, SlotState::Free { .. }) {
            None
        } else {
            Some(slot.gen)
        }
    }

    pub fn is_armed(&self, idx: usize) -> bool {
        matches!(self.slots[idx].state, SlotState::Armed { .. })
    }

    pub fn sink_checked_out(&self, idx: usize) -> bool {
        matches!(
            self.slots[idx].state,
            SlotState::Idle { sink: None } | SlotState::Armed { sink: None, .. }
        )
    }

    pub fn take_sink(&mut self, idx: usize) -> Option<S> {
        match &mut self.slots[idx].state {
            SlotState::Idle { sink } | SlotState::Armed { sink, .. } => sink.take(),
            SlotState::Free { .. } => None,
        }
    }

    pub fn put_sink(&mut self, idx: usize, value: S) {
        match &mut self.slots[idx].state {
            SlotState::Idle { sink } | SlotState::Armed { sink, .. } => {
                debug_assert!(sink.is_none(), "restoring a sink that was never taken");
                *sink = Some(value);
            }
            SlotState::Free { .. } => unreachable!("restoring a sink into a freed slot"),
        }
    }

    /// Records `now` as the new base and consumes the elapsed ticks through
    /// the leading entries: entries whose target has passed end up at offset
    /// zero, the first future entry keeps the remainder.
    pub fn resync(&mut self, now: u32) {
        debug_assert!((now as u64) < self.period);
        let mut remaining = self.elapsed(now);
        self.base = now;
        let mut cur = self.head;
        while remaining > 0 {
            let Some(idx) = cur else { break };
            let (offset, next) = self.link(idx);
            if offset > remaining {
                self.set_offset(idx, offset - remaining);
                break;
            }
            remaining -= offset;
            self.set_offset(idx, 0);
            cur = next;
        }
    }

    /// Ticks from `base` to `now`, modulo the counter period.
    fn elapsed(&self, now: u32) -> u32 {
        ((now as u64 + self.period - self.base as u64) % self.period) as u32
    }

    /// Splices an idle slot into the chain, `offset` ticks from `base`.
    /// Entries with equal targets keep arming order. Returns whether the
    /// slot became the new head.
    pub fn insert(&mut self, idx: usize, mut offset: u32) -> bool {
        let sink = match &mut self.slots[idx].state {
            SlotState::Idle { sink } => sink.take(),
            _ => unreachable!("arming a slot that is not idle"),
        };

        // Walk past every entry whose accumulated target is not strictly
        // later than ours, reducing our offset to a delta as we go.
        let mut prev = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            let (c_offset, c_next) = self.link(c);
            if c_offset > offset {
                break;
            }
            offset -= c_offset;
            prev = Some(c);
            cur = c_next;
        }
        if let Some(c) = cur {
            let (c_offset, _) = self.link(c);
            self.set_offset(c, c_offset - offset);
        }
        self.slots[idx].state = SlotState::Armed {
            sink,
            offset,
            next: cur,
        };
        match prev {
            None => {
                self.head = Some(idx);
                true
            }
            Some(p) => {
                self.set_next(p, Some(idx));
                false
            }
        }
    }

    /// Removes an armed slot from the chain, folding its delta into the
    /// successor so later targets are unchanged. Returns whether it was the
    /// head.
    pub fn unlink(&mut self, idx: usize) -> bool {
        let mut prev = None;
        let mut cur = self.head;
        while let Some(c) = cur {
            if c == idx {
                break;
            }
            prev = Some(c);
            cur = self.link(c).1;
        }
        debug_assert_eq!(cur, Some(idx), "unlinking an alarm that is not queued");

        let state = std::mem::replace(&mut self.slots[idx].state, SlotState::Idle { sink: None });
        let SlotState::Armed { sink, offset, next } = state else {
            unreachable!("unlinking a slot that is not armed");
        };
        self.slots[idx].state = SlotState::Idle { sink };
        if let Some(n) = next {
            let (n_offset, _) = self.link(n);
            self.set_offset(n, n_offset + offset);
        }
        match prev {
            None => {
                self.head = next;
                true
            }
            Some(p) => {
                self.set_next(p, next);
                false
            }
        }
    }

    /// Head slot and its offset from `base`.
    pub fn peek(&self) -> Option<(usize, u32)> {
        let head = self.head?;
        Some((head, self.link(head).0))
    }

    /// Unlinks and returns the head if its target has been reached.
    pub fn pop_due(&mut self) -> Option<usize> {
        let (idx, offset) = self.peek()?;
        if offset != 0 {
            return None;
        }
        self.unlink(idx);
        Some(idx)
    }

    fn link(&self, idx: usize) -> (u32, Option<usize>) {
        match &self.slots[idx].state {
            SlotState::Armed { offset, next, .. } => (*offset, *next),
            _ => unreachable!("slot is not linked"),
        }
    }

    fn set_offset(&mut self, idx: usize, value: u32) {
        match &mut self.slots[idx].state {
            SlotState::Armed { offset, .. } => *offset = value,
            _ => unreachable!("slot is not linked"),
        }
    }

    fn set_next(&mut self, idx: usize, value: Option<usize>) {
        match &mut self.slots[idx].state {
            SlotState::Armed { next, .. } => *next = value,
            _ => unreachable!("slot is not linked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: u64 = 1 << 32;

    fn drain_due(q: &mut AlarmQueue<&'static str>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Some(idx) = q.pop_due() {
            out.push(q.take_sink(idx).unwrap());
            q.free(idx);
        }
        out
    }

    #[test]
    fn inserts_keep_target_order() {
        let mut q = AlarmQueue::new(FULL);
        let (b, _) = q.alloc("b");
        let (a, _) = q.alloc("a");
        let (c, _) = q.alloc("c");
        q.insert(b, 30);
        q.insert(a, 10);
        q.insert(c, 20);
        q.resync(30);
        assert_eq!(drain_due(&mut q), ["a", "c", "b"]);
    }

    #[test]
    fn equal_targets_keep_arm_order() {
        let mut q = AlarmQueue::new(FULL);
        let (a, _) = q.alloc("a");
        let (b, _) = q.alloc("b");
        let (c, _) = q.alloc("c");
        q.insert(a, 25);
        q.insert(b, 25);
        q.insert(c, 25);
        q.resync(25);
        assert_eq!(drain_due(&mut q), ["a", "b", "c"]);
    }

    #[test]
    fn unlink_preserves_later_targets() {
        let mut q = AlarmQueue::new(FULL);
        let (a, _) = q.alloc("a");
        let (b, _) = q.alloc("b");
        let (c, _) = q.alloc("c");
        q.insert(a, 10);
        q.insert(b, 20);
        q.insert(c, 30);
        assert!(!q.unlink(b));
        q.resync(29);
        assert_eq!(q.pop_due(), Some(a));
        // c's delta absorbed b's; its absolute target is still 30.
        assert_eq!(q.peek(), Some((c, 1)));
        q.resync(30);
        assert_eq!(q.pop_due(), Some(c));
    }

    #[test]
    fn unlinking_the_head_promotes_the_next_entry() {
        let mut q = AlarmQueue::new(FULL);
        let (a, _) = q.alloc("a");
        let (b, _) = q.alloc("b");
        q.insert(a, 10);
        q.insert(b, 40);
        assert!(q.unlink(a));
        let (head, offset) = q.peek().unwrap();
        assert_eq!(head, b);
        assert_eq!(offset, 40);
    }

    #[test]
    fn resync_consumes_through_leading_entries() {
        let mut q = AlarmQueue::new(FULL);
        let (a, _) = q.alloc("a");
        let (b, _) = q.alloc("b");
        q.insert(a, 10);
        q.insert(b, 25);
        q.resync(12);
        assert_eq!(q.peek(), Some((a, 0)));
        assert_eq!(q.pop_due(), Some(a));
        // b kept the remainder: 25 - 12.
        assert_eq!(q.peek(), Some((b, 13)));
        assert_eq!(q.pop_due(), None);
    }

    #[test]
    fn elapsed_wraps_modulo_the_counter_period() {
        let mut q: AlarmQueue<&'static str> = AlarmQueue::new(256);
        q.resync(250);
        let (a, _) = q.alloc("a");
        q.insert(a, 10);
        // 250 -> 4 is 10 ticks on an 8-bit counter.
        q.resync(4);
        assert_eq!(q.peek(), Some((a, 0)));
    }

    #[test]
    fn offsets_beyond_one_period_need_several_resyncs() {
        let mut q: AlarmQueue<&'static str> = AlarmQueue::new(256);
        let (a, _) = q.alloc("a");
        q.insert(a, 300);
        q.resync(200);
        assert_eq!(q.peek(), Some((a, 100)));
        q.resync(44); // +100 wrapped
        assert_eq!(q.peek(), Some((a, 0)));
    }

    #[test]
    fn freed_slots_are_reused_with_a_new_generation() {
        let mut q = AlarmQueue::new(FULL);
        let (a, gen0) = q.alloc("a");
        q.free(a);
        assert_eq!(q.gen(a), None);
        let (b, gen1) = q.alloc("b");
        assert_eq!(b, a);
        assert_ne!(gen0, gen1);
        assert_eq!(q.gen(b), Some(gen1));
    }

    #[test]
    fn checked_out_sinks_are_tracked() {
        let mut q = AlarmQueue::new(FULL);
        let (a, _) = q.alloc("a");
        assert!(!q.sink_checked_out(a));
        let sink = q.take_sink(a).unwrap();
        assert!(q.sink_checked_out(a));
        q.put_sink(a, sink);
        assert!(!q.sink_checked_out(a));
    }
}
