//! The simulation arena: owns everything the MAC/PHY/traffic state
//! machines only ever described as an effect. Ported from
//! `original_source/src/Simulation.cpp`, whose `Simulation` class held
//! `vector<Terminal*>` plus the `Channel`/`Scheduler` and wired every
//! cross-object callback directly; here it is the only place that holds
//! `&mut` access to more than one terminal at a time, via short-lived
//! `split_at_mut` borrows, and the only place that executes a `MacEffect`.

use std::collections::HashMap;

use crate::channel::Channel;
use crate::ids::{EventId, PacketId, PacketIdGen, TerminalId};
use crate::mac::{MacEffect, TimerSlot, TxResolution};
use crate::packet::Mpdu;
use crate::phy::ReceiveOutcome;
use crate::rng::Mt19937;
use crate::scheduler::{Scheduler, Wakeup};
use crate::terminal::Terminal;
use crate::timestamp::Timestamp;

/// One terminal's outstanding named timers, so a `MacEffect::Cancel` can
/// find the `EventId` the scheduler actually holds.
#[derive(Debug, Default)]
struct TimerTable(HashMap<TimerSlot, EventId>);

impl TimerTable {
    fn set(&mut self, slot: TimerSlot, id: EventId) {
        self.0.insert(slot, id);
    }
    fn take(&mut self, slot: TimerSlot) -> Option<EventId> {
        self.0.remove(&slot)
    }
}

pub struct Simulation {
    pub channel: Channel,
    pub rng: Mt19937,
    pub scheduler: Scheduler,
    pub terminals: Vec<Terminal>,
    pub ids: PacketIdGen,
    index: HashMap<TerminalId, usize>,
    timers: Vec<TimerTable>,
    /// Frames currently airborne, keyed by (packet, receiver), so the
    /// `StopTx` handler can hand the exact frame back to the receiving
    /// PHY without the channel needing to carry full `Mpdu` payloads
    /// itself (it only tracks id/source/target/power for interference).
    in_flight: HashMap<(PacketId, TerminalId), Mpdu>,
    transient_time: Timestamp,
    pub run_to: Timestamp,
}

impl Simulation {
    pub fn new(channel: Channel, rng: Mt19937, transient_time: Timestamp, run_to: Timestamp) -> Self {
        Simulation {
            channel,
            rng,
            scheduler: Scheduler::new(),
            terminals: Vec::new(),
            ids: PacketIdGen::default(),
            index: HashMap::new(),
            timers: Vec::new(),
            in_flight: HashMap::new(),
            transient_time,
            run_to,
        }
    }

    pub fn add_terminal(&mut self, terminal: Terminal) {
        let idx = self.terminals.len();
        self.index.insert(terminal.id, idx);
        self.timers.push(TimerTable::default());
        self.terminals.push(terminal);
    }

    fn idx_of(&self, id: TerminalId) -> usize {
        self.index[&id]
    }

    /// Drives the full run, popping events until the scheduler drains or
    /// `run_to` is reached, flipping on per-terminal statistics once
    /// `transient_time` has elapsed (matching the source's warm-up gate).
    pub fn run(&mut self) {
        let mut stats_armed = self.transient_time == Timestamp::ZERO;
        if stats_armed {
            for t in &mut self.terminals {
                t.enable_stats();
            }
        }
        loop {
            let Some((_id, wakeup)) = self.scheduler.pop_next(self.run_to) else {
                if self.scheduler.is_empty_of_active() && self.scheduler.now() < self.run_to {
                    crate::protocol_invariant!(
                        "scheduler drained at {:?} before reaching t_max {:?}",
                        self.scheduler.now(),
                        self.run_to
                    );
                }
                break;
            };
            let now = self.scheduler.now();
            if !stats_armed && now >= self.transient_time {
                stats_armed = true;
                for t in &mut self.terminals {
                    t.enable_stats();
                }
            }
            if matches!(wakeup, Wakeup::EndOfRun) {
                break;
            }
            self.dispatch(now, wakeup);
        }
    }

    fn schedule(&mut self, idx: usize, at: Timestamp, wakeup: Wakeup, slot: TimerSlot) {
        let id = self.scheduler.schedule(at, wakeup);
        self.timers[idx].set(slot, id);
    }

    fn cancel(&mut self, idx: usize, slot: TimerSlot) {
        if let Some(id) = self.timers[idx].take(slot) {
            self.scheduler.cancel(id);
        }
    }

    /// Resolves a frame's mode/power for `sender -> target` via the
    /// sender's `LinkAdapt` consulting the target's `Phy` oracle. The two
    /// terminals are disjoint indices into `self.terminals`, so a single
    /// `split_at_mut` gives simultaneous `&mut` (sender) and `&` (peer)
    /// access without either object holding a reference to the other.
    fn resolve_tx(&mut self, sender_idx: usize, target: TerminalId, nbytes: u32) -> TxResolution {
        let target_idx = self.idx_of(target);
        let sender_id = self.terminals[sender_idx].id;
        let path_loss = self.channel.get_path_loss(sender_id, target);

        let (mode, power_dbm) = if sender_idx < target_idx {
            let (left, right) = self.terminals.split_at_mut(target_idx);
            let sender = &mut left[sender_idx];
            let peer = &right[0];
            let la = sender.link_adapt_for(target).expect("connection to target exists");
            (
                la.current_mode(&peer.phy, path_loss, nbytes),
                la.current_power(&peer.phy, path_loss, nbytes),
            )
        } else {
            let (left, right) = self.terminals.split_at_mut(sender_idx);
            let peer = &left[target_idx];
            let sender = &mut right[0];
            let la = sender.link_adapt_for(target).expect("connection to target exists");
            (
                la.current_mode(&peer.phy, path_loss, nbytes),
                la.current_power(&peer.phy, path_loss, nbytes),
            )
        };
        TxResolution { mode, power_dbm }
    }

    fn dispatch(&mut self, now: Timestamp, wakeup: Wakeup) {
        match wakeup {
            Wakeup::NewPacket { terminal, connection } => self.on_new_packet(now, terminal, connection),
            Wakeup::TxAttempt { terminal } => {
                let idx = self.idx_of(terminal);
                if self.terminals[idx].mac.in_txop() {
                    // 4.4.3: "If in TXOP, call transmit() directly" — CTS
                    // just came back (or a fragment train is continuing)
                    // and the burst keeps going without re-entering backoff.
                    let Some(target) = self.terminals[idx].mac.peek_next_target() else { return };
                    let nbytes = self.terminals[idx].mac.next_payload_bytes();
                    let res = self.resolve_tx(idx, target, nbytes);
                    let effects = self.terminals[idx].mac.transmit(now, &mut self.ids, res);
                    self.apply(idx, now, effects);
                } else {
                    let interf = self.channel.get_interf_dbm(terminal);
                    let busy = self.terminals[idx].phy.carrier_sensing(interf);
                    let effects = self.terminals[idx].mac.tx_attempt(now, busy, &mut self.rng);
                    self.apply(idx, now, effects);
                }
            }
            Wakeup::StartTxop { terminal } => {
                let idx = self.idx_of(terminal);
                let Some(target) = self.terminals[idx].mac.peek_next_target() else { return };
                let nbytes = 20;
                let res = self.resolve_tx(idx, target, nbytes);
                let effects = self.terminals[idx].mac.start_txop(now, &mut self.ids, res);
                self.apply(idx, now, effects);
            }
            Wakeup::StopTx { terminal, packet, target } => self.on_stop_tx(now, terminal, packet, target),
            Wakeup::Overheard { terminal, packet } => self.on_overheard(now, terminal, packet),
            Wakeup::AckTimeout { terminal } => {
                let idx = self.idx_of(terminal);
                let effects = self.terminals[idx].mac.ack_timed_out(now, &mut self.rng);
                self.apply(idx, now, effects);
            }
            Wakeup::CtsTimeout { terminal } => {
                let idx = self.idx_of(terminal);
                let effects = self.terminals[idx].mac.cts_timed_out(now, &mut self.rng);
                self.apply(idx, now, effects);
            }
            Wakeup::BaTimeout { terminal } => {
                let idx = self.idx_of(terminal);
                let effects = self.terminals[idx].mac.ba_timed_out(now);
                self.apply(idx, now, effects);
            }
            Wakeup::TxopExpired { terminal } => {
                let idx = self.idx_of(terminal);
                let effects = self.terminals[idx].mac.end_txop(now, &mut self.rng);
                self.apply(idx, now, effects);
            }
            Wakeup::NavExpired { terminal } => {
                let idx = self.idx_of(terminal);
                let effects = self.terminals[idx].mac.end_nav(now, &mut self.rng);
                self.apply(idx, now, effects);
            }
            Wakeup::CheckNav { terminal } => {
                let idx = self.idx_of(terminal);
                let effects = self.terminals[idx].mac.check_nav(now);
                self.apply(idx, now, effects);
            }
            Wakeup::SendAck { terminal, target } => {
                let idx = self.idx_of(terminal);
                let res = self.resolve_tx(idx, target, 14);
                let nav = Timestamp::ZERO;
                let effects = self.terminals[idx].mac.send_ack(now, target, &mut self.ids, res, nav);
                self.apply(idx, now, effects);
            }
            Wakeup::SendCts { terminal, target } => {
                let idx = self.idx_of(terminal);
                let res = self.resolve_tx(idx, target, 14);
                let effects = self.terminals[idx].mac.send_cts(target, &mut self.ids, res);
                self.apply(idx, now, effects);
            }
            Wakeup::SendBa { terminal, target } => {
                let idx = self.idx_of(terminal);
                let res = self.resolve_tx(idx, target, 20);
                let effects = self.terminals[idx].mac.send_ba(target, &mut self.ids, res, Timestamp::ZERO);
                self.apply(idx, now, effects);
            }
            Wakeup::SendNextFragment { terminal } => {
                let idx = self.idx_of(terminal);
                let Some(target) = self.terminals[idx].mac.peek_next_target() else { return };
                let nbytes = self.terminals[idx].mac.next_payload_bytes();
                let res = self.resolve_tx(idx, target, nbytes);
                let effects = self.terminals[idx].mac.transmit(now, &mut self.ids, res);
                self.apply(idx, now, effects);
            }
            Wakeup::StatsTick | Wakeup::EndOfRun => {}
        }
    }

    fn on_new_packet(&mut self, now: Timestamp, terminal: TerminalId, connection: usize) {
        let idx = self.idx_of(terminal);
        let term = &mut self.terminals[idx];
        let Some(conn) = term.connections.get_mut(connection) else { return };
        let (msdu, next_at) = conn.traffic.generate(&mut self.ids, &mut self.rng);
        let target = conn.target;
        let ac = conn.ac;
        let stats_on = term.stats_enabled;
        if stats_on {
            term.stats.record_queue_sample(term.mac.queue_len());
        }

        // Traffic arrivals recur for the life of the run and are never
        // individually cancelled, so they bypass the per-terminal
        // `TimerTable` (which only tracks cancellable MAC timers).
        self.scheduler
            .schedule(next_at, Wakeup::NewPacket { terminal, connection });

        let effects = self.terminals[idx].mac.unitdata_req(msdu, target, ac, now, &mut self.rng);
        if self.terminals[idx].stats_enabled && effects.iter().any(|e| matches!(e, MacEffect::QueueOverflow)) {
            self.terminals[idx].stats.record_queue_drop();
        }
        self.apply(idx, now, effects);
    }

    fn on_stop_tx(&mut self, now: Timestamp, terminal: TerminalId, packet: PacketId, target: TerminalId) {
        let sender_idx = self.idx_of(terminal);
        let Some((path_loss, interf_max)) = self.channel.stop_send(packet, target) else { return };
        let target_idx = self.idx_of(target);
        let interf_mw = if interf_max > 0.0 { interf_max } else { 0.0 };

        let mpdu = self.in_flight.remove(&(packet, target));
        let Some(mpdu) = mpdu else { return };

        let outcome = {
            let recv_term = &mut self.terminals[target_idx];
            recv_term.phy.receive(&mpdu, path_loss, interf_mw, now, &mut self.rng)
        };

        self.notify_busy_free(now);

        match outcome {
            ReceiveOutcome::Received => self.on_received(now, target_idx, sender_idx, mpdu),
            ReceiveOutcome::Corrupted { .. } | ReceiveOutcome::BelowSensitivity | ReceiveOutcome::TransceiverBusy => {
                // Corrupted or unreceivable: sender's timeout (already scheduled
                // at transmit time) will fire and drive retry/drop.
            }
        }
    }

    fn on_received(&mut self, now: Timestamp, recv_idx: usize, _sender_idx: usize, mpdu: Mpdu) {
        let (effects, notify) = self.terminals[recv_idx].mac.receive_this(mpdu.clone(), now, &mut self.rng);
        if let Some((_peer, _is_last)) = notify {
            if let crate::standard::TransmissionMode::Mcs(m) = mpdu.mode {
                self.terminals[recv_idx].mac.apply_rx_notify(m);
            }
        }
        self.apply(recv_idx, now, effects);
    }

    /// After the channel's busy/free state may have changed (a frame
    /// started or ended), re-checks every subscribed terminal and fires
    /// `phy_cca_busy`/`phy_cca_free` for those whose view actually flipped.
    fn notify_busy_free(&mut self, now: Timestamp) {
        let busy_waiters: Vec<TerminalId> = self.channel.waiting_busy_list().to_vec();
        for t in busy_waiters {
            let idx = self.idx_of(t);
            let interf = self.channel.get_interf_dbm(t);
            if self.terminals[idx].phy.carrier_sensing(interf) {
                self.channel.stop_waiting(t);
                let effects = self.terminals[idx].mac.phy_cca_busy(now);
                self.apply(idx, now, effects);
            }
        }
        let free_waiters: Vec<TerminalId> = self.channel.waiting_free_list().to_vec();
        for t in free_waiters {
            let idx = self.idx_of(t);
            let interf = self.channel.get_interf_dbm(t);
            if !self.terminals[idx].phy.carrier_sensing(interf) {
                self.channel.stop_waiting(t);
                let effects = self.terminals[idx].mac.phy_cca_free(now, &mut self.rng);
                self.apply(idx, now, effects);
            }
        }
    }

    fn apply(&mut self, idx: usize, now: Timestamp, effects: Vec<MacEffect>) {
        let terminal_id = self.terminals[idx].id;
        for effect in effects {
            match effect {
                MacEffect::Schedule(at, wakeup, slot) => self.schedule(idx, at, wakeup, slot),
                MacEffect::Cancel(slot) => self.cancel(idx, slot),
                MacEffect::WaitBusy => self.channel.wait_busy(terminal_id),
                MacEffect::WaitFree => self.channel.wait_free(terminal_id),
                MacEffect::StopWaitBusy | MacEffect::StopWaitFree => self.channel.stop_waiting(terminal_id),
                MacEffect::Transmit(mpdu) => self.transmit(idx, now, mpdu),
                MacEffect::LaFailed(target) => {
                    if let Some(la) = self.terminals[idx].link_adapt_for(target) {
                        la.failed();
                    }
                }
                MacEffect::LaRtsFailed(target) => {
                    if let Some(la) = self.terminals[idx].link_adapt_for(target) {
                        la.rts_failed();
                    }
                }
                MacEffect::LaSuccess(target, lastfrag) => {
                    if let Some(la) = self.terminals[idx].link_adapt_for(target) {
                        la.success(lastfrag);
                    }
                }
                MacEffect::LaRxSuccess(target, mode) => {
                    if let Some(la) = self.terminals[idx].link_adapt_for(target) {
                        la.rx_success(mode);
                    }
                }
                MacEffect::Delivered { msdu, target: _, tx_time: _, now: t } => {
                    if self.terminals[idx].stats_enabled {
                        let delay = t.as_secs() - msdu.generated_at.as_secs();
                        self.terminals[idx].stats.record_delivery(msdu.size_bytes, delay.max(0.0));
                    }
                }
                MacEffect::RetryDropped { .. } => {
                    if self.terminals[idx].stats_enabled {
                        self.terminals[idx].stats.record_retry_drop();
                    }
                }
                MacEffect::QueueOverflow => {}
                MacEffect::AttemptedFragment => {
                    if self.terminals[idx].stats_enabled {
                        self.terminals[idx].stats.packets_attempted += 1;
                    }
                }
            }
        }
    }

    /// Hands a built frame to the sender's PHY (busy gating + energy) and
    /// the channel (propagation/interference), then schedules its
    /// corresponding `StopTx` at the end of its airtime. Every other
    /// registered terminal also gets an `Overheard` wakeup at the same
    /// instant, so RTS/DATA/CTS NAV fields are visible to bystanders
    /// (hidden-terminal virtual carrier sensing) without those terminals
    /// counting as real receivers for interference accounting.
    fn transmit(&mut self, idx: usize, now: Timestamp, mpdu: Mpdu) {
        let duration = Timestamp::from_secs(mpdu.duration).unwrap_or(Timestamp::ZERO);
        let end = now + duration;
        let sender_id = self.terminals[idx].id;

        self.terminals[idx].phy.phy_tx_start_req(&mpdu, now);
        self.channel
            .send_packet_one(mpdu.id, mpdu.source, mpdu.target, mpdu.tx_power_dbm, now);

        self.in_flight.insert((mpdu.id, mpdu.target), mpdu.clone());
        let target = mpdu.target;
        self.scheduler
            .schedule(end, Wakeup::StopTx { terminal: sender_id, packet: mpdu.id, target });

        for bystander in self.channel.other_terminals(mpdu.source) {
            if bystander == target {
                continue;
            }
            self.in_flight.insert((mpdu.id, bystander), mpdu.clone());
            self.scheduler
                .schedule(end, Wakeup::Overheard { terminal: bystander, packet: mpdu.id });
        }

        self.notify_busy_free(now);
    }

    /// A frame not addressed to `terminal` reaches the end of its airtime.
    /// Decoded with zero interference (only the addressed target's
    /// reception is charged the real interference seen while airborne).
    /// If it decodes, only NAV bookkeeping (`receive_bc`) applies, never
    /// the full `receive_this` state machine.
    fn on_overheard(&mut self, now: Timestamp, terminal: TerminalId, packet: PacketId) {
        let Some(mpdu) = self.in_flight.remove(&(packet, terminal)) else { return };
        let idx = self.idx_of(terminal);
        let path_loss = self.channel.get_path_loss(mpdu.source, terminal);
        let outcome = self.terminals[idx].phy.receive(&mpdu, path_loss, 0.0, now, &mut self.rng);
        if outcome == ReceiveOutcome::Received {
            let effects = self.terminals[idx].mac.receive_bc(&mpdu, now);
            self.apply(idx, now, effects);
        }
    }
}
