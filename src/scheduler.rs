//! Discrete-event scheduler, ported from `original_source/src/Scheduler.cpp`.
//!
//! The source dispatches wakeups through per-event member-function-pointer
//! callbacks (`wrapper_to_*` static casts keyed by a tag). Here a single
//! tagged enum, `Wakeup`, carries everything a handler needs to resume
//! work, and `Simulation::dispatch` matches on it — no function pointers,
//! no casts.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::error::SimError;
use crate::ids::{EventId, EventIdGen, PacketId, TerminalId};
use crate::timestamp::Timestamp;

/// Everything a scheduled callback needs to know when it fires. One
/// variant per distinct wakeup reason in the MAC/PHY/traffic state
/// machines. Wakeups that used to be reached through a C++ member-function
/// pointer (`wrapper_to_*`) are instead a tagged variant matched by
/// `Simulation::dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A new MSDU is ready to hand to the MAC for the named terminal's
    /// connection index.
    NewPacket { terminal: TerminalId, connection: usize },
    /// Retry a deferred transmission attempt (NAV still active at the time
    /// it was first tried).
    TxAttempt { terminal: TerminalId },
    /// Backoff/AIFS countdown elapsed; attempt to actually transmit.
    StartTxop { terminal: TerminalId },
    /// A frame this terminal sent physically finishes its airtime.
    StopTx { terminal: TerminalId, packet: PacketId, target: TerminalId },
    /// A frame not addressed to `terminal` finishes its airtime within
    /// earshot; `terminal` gets a zero-interference decode attempt purely
    /// to overhear NAV-bearing fields (no ACK/retry consequence for the
    /// sender either way).
    Overheard { terminal: TerminalId, packet: PacketId },
    /// Waiting for an ACK; fires if none arrived in time.
    AckTimeout { terminal: TerminalId },
    /// Waiting for a CTS after RTS; fires if none arrived in time.
    CtsTimeout { terminal: TerminalId },
    /// Waiting for a BlockAck after an aggregated burst; fires if none
    /// arrived in time.
    BaTimeout { terminal: TerminalId },
    /// A held TXOP has run out of time and must be relinquished.
    TxopExpired { terminal: TerminalId },
    /// NAV (virtual carrier sense) timer expired.
    NavExpired { terminal: TerminalId },
    /// Checks whether the medium is actually idle despite a still-running
    /// NAV set from an overheard RTS (releases NAV early if so).
    CheckNav { terminal: TerminalId },
    /// Emit a SIFS-deferred ACK to `target`.
    SendAck { terminal: TerminalId, target: TerminalId },
    /// Emit a SIFS-deferred CTS to `target`.
    SendCts { terminal: TerminalId, target: TerminalId },
    /// Emit a BlockAck to `target` covering the pending-ack list.
    SendBa { terminal: TerminalId, target: TerminalId },
    /// Send the next fragment of the current train (after an ACK, or
    /// chained inside a TXOP aggregation burst).
    SendNextFragment { terminal: TerminalId },
    /// Periodic statistics snapshot / progress tick.
    StatsTick,
    /// End of the simulated run.
    EndOfRun,
}

#[derive(Debug, Clone, Copy)]
struct ScheduledEvent {
    at: Timestamp,
    seq: u64,
    id: EventId,
    wakeup: Wakeup,
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}
impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    /// `BinaryHeap` is a max-heap; to get min-time-first behavior we reverse
    /// the comparison here rather than wrapping every push in
    /// `std::cmp::Reverse`. Ties break on insertion sequence, oldest first,
    /// matching the source's FIFO tie-break for same-tick events.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap event queue with soft cancellation: `cancel` flips a side-table
/// flag rather than searching the heap, matching the source's "lazy
/// deletion" approach (`active` flag on each scheduled event).
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<ScheduledEvent>,
    active: HashMap<u64, bool>,
    ids: EventIdGen,
    next_seq: u64,
    now: Timestamp,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Schedules `wakeup` to fire at `at`, returning the handle needed to
    /// cancel it later. Panics (4.1: `SchedulingInThePast`) if `at` is
    /// before `now` — no legitimate caller in this state machine ever
    /// schedules into the past, so this always indicates a bug upstream,
    /// not a recoverable condition.
    pub fn schedule(&mut self, at: Timestamp, wakeup: Wakeup) -> EventId {
        if at < self.now {
            panic!(
                "{}",
                SimError::Event(format!(
                    "SchedulingInThePast: tried to schedule {wakeup:?} at {at:?} but now is {:?}",
                    self.now
                ))
            );
        }
        let id = self.ids.next();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.active.insert(id.get(), true);
        self.heap.push(ScheduledEvent {
            at,
            seq,
            id,
            wakeup,
        });
        id
    }

    /// Cancels a previously scheduled event. A no-op if it already fired or
    /// was already cancelled.
    pub fn cancel(&mut self, id: EventId) {
        self.active.insert(id.get(), false);
    }

    /// Pops and returns the next still-active event at or before `t_max`,
    /// advancing `self.now` to its timestamp. Returns `None` once the heap
    /// is drained of active events or the next event would exceed `t_max`;
    /// use `is_empty_of_active` to tell the two apart (4.1: a drain before
    /// `t_max` is a protocol deadlock, not a normal end of run).
    pub fn pop_next(&mut self, t_max: Timestamp) -> Option<(EventId, Wakeup)> {
        loop {
            let ev = self.heap.peek()?;
            if ev.at > t_max {
                return None;
            }
            let ev = self.heap.pop().unwrap();
            if !*self.active.get(&ev.id.get()).unwrap_or(&false) {
                continue;
            }
            self.active.remove(&ev.id.get());
            self.now = ev.at;
            return Some((ev.id, ev.wakeup));
        }
    }

    /// True once no scheduled event remains that could ever fire (everything
    /// left in the heap, if anything, is soft-cancelled). Distinguishes a
    /// genuine drain from `pop_next` simply hitting the `t_max` horizon.
    pub fn is_empty_of_active(&self) -> bool {
        self.heap
            .iter()
            .all(|ev| !*self.active.get(&ev.id.get()).unwrap_or(&false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fire_in_timestamp_order() {
        let mut sched = Scheduler::new();
        sched.schedule(Timestamp::from_ticks(30), Wakeup::StatsTick);
        sched.schedule(Timestamp::from_ticks(10), Wakeup::EndOfRun);
        sched.schedule(Timestamp::from_ticks(20), Wakeup::StatsTick);

        let (_, w1) = sched.pop_next(Timestamp::from_ticks(1000)).unwrap();
        assert_eq!(w1, Wakeup::EndOfRun);
        assert_eq!(sched.now(), Timestamp::from_ticks(10));

        let (_, w2) = sched.pop_next(Timestamp::from_ticks(1000)).unwrap();
        assert_eq!(w2, Wakeup::StatsTick);
        assert_eq!(sched.now(), Timestamp::from_ticks(20));
    }

    #[test]
    fn same_timestamp_ties_break_on_insertion_order() {
        let mut sched = Scheduler::new();
        sched.schedule(Timestamp::from_ticks(5), Wakeup::EndOfRun);
        sched.schedule(Timestamp::from_ticks(5), Wakeup::StatsTick);

        let (_, first) = sched.pop_next(Timestamp::from_ticks(1000)).unwrap();
        assert_eq!(first, Wakeup::EndOfRun);
    }

    #[test]
    fn cancelled_events_are_skipped() {
        let mut sched = Scheduler::new();
        let id = sched.schedule(Timestamp::from_ticks(5), Wakeup::EndOfRun);
        sched.schedule(Timestamp::from_ticks(10), Wakeup::StatsTick);
        sched.cancel(id);

        let (_, w) = sched.pop_next(Timestamp::from_ticks(1000)).unwrap();
        assert_eq!(w, Wakeup::StatsTick);
    }

    #[test]
    fn pop_next_respects_t_max_horizon() {
        let mut sched = Scheduler::new();
        sched.schedule(Timestamp::from_ticks(500), Wakeup::EndOfRun);
        assert!(sched.pop_next(Timestamp::from_ticks(100)).is_none());
        assert!(sched.pop_next(Timestamp::from_ticks(500)).is_some());
    }

    #[test]
    #[should_panic(expected = "SchedulingInThePast")]
    fn scheduling_in_the_past_panics() {
        let mut sched = Scheduler::new();
        sched.schedule(Timestamp::from_ticks(100), Wakeup::EndOfRun);
        sched.pop_next(Timestamp::from_ticks(100));
        assert_eq!(sched.now(), Timestamp::from_ticks(100));

        sched.schedule(Timestamp::from_ticks(50), Wakeup::StatsTick);
    }
}
