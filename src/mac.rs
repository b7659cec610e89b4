//! DCF/EDCA MAC state machine, ported from `original_source/src/MAC.cpp` and
//! `MAC_private.h`.
//!
//! The source drives everything through member-function-pointer callbacks
//! into the scheduler, and reaches sideways into its paired `PHY` and
//! `Channel` directly. Here `Mac` holds no back-references at all: every
//! operation returns a `Vec<MacEffect>` describing what must happen next
//! (arm/cancel a timer, subscribe to the channel, hand a frame to the PHY,
//! notify link adaptation, report a delivery/drop to the terminal's
//! counters). `Simulation::dispatch` is the only place that owns the
//! scheduler, channel and peer PHYs, so it is the only place that executes
//! these effects — this keeps `Mac` unit-testable without a scheduler.

use std::collections::{HashMap, VecDeque};

use crate::ids::{PacketId, PacketIdGen, TerminalId};
use crate::packet::{self, AckPolicy, DataMpdu, Mpdu, Msdu, PacketType};
use crate::rng::Mt19937;
use crate::scheduler::Wakeup;
use crate::standard::{Dot11Standard, Mcs, TransmissionMode};
use crate::timestamp::Timestamp;

pub const SLOT_TIME_SECS: f64 = 9e-6;
pub const SIFS_SECS: f64 = 16e-6;
pub const DIFS_SECS: f64 = 34e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Ac {
    Bk,
    Be,
    Vi,
    Vo,
    Legacy,
}

pub const ALL_ACS: [Ac; 5] = [Ac::Bk, Ac::Be, Ac::Vi, Ac::Vo, Ac::Legacy];

#[derive(Debug, Clone, Copy)]
pub struct AcParams {
    pub cw_min: u32,
    pub cw_max: u32,
    pub aifsn: u32,
    pub txop_max_secs: f64,
}

/// Table 4.4.1, scaled for 802.11ah (`TXOPmax` x10).
pub fn ac_params(ac: Ac, std: Dot11Standard) -> AcParams {
    let txop_scale = if matches!(std, Dot11Standard::Ah) { 10.0 } else { 1.0 };
    match ac {
        Ac::Bk => AcParams { cw_min: 31, cw_max: 1023, aifsn: 7, txop_max_secs: 0.0 },
        Ac::Be => AcParams { cw_min: 31, cw_max: 1023, aifsn: 3, txop_max_secs: 0.0 },
        Ac::Vi => AcParams { cw_min: 15, cw_max: 31, aifsn: 2, txop_max_secs: 3.008e-3 * txop_scale },
        Ac::Vo => AcParams { cw_min: 7, cw_max: 15, aifsn: 2, txop_max_secs: 1.504e-3 * txop_scale },
        Ac::Legacy => AcParams { cw_min: 15, cw_max: 1023, aifsn: 2, txop_max_secs: 0.0 },
    }
}

fn aifs_secs(ac: Ac, std: Dot11Standard) -> f64 {
    SIFS_SECS + ac_params(ac, std).aifsn as f64 * SLOT_TIME_SECS
}

#[derive(Debug, Clone, Copy)]
pub struct MacParams {
    pub rts_threshold: u32,
    pub retry_limit: u32,
    pub frag_threshold: u32,
    pub max_queue_size: usize,
    pub set_ba_agg: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    Txop,
    Ack,
    Cts,
    Ba,
    TxopExpire,
    Nav,
    CheckNav,
    TxAttempt,
    NextFrag,
    SendAck,
    SendCts,
    SendBa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxopOutcome {
    Success,
    AckFail,
    CtsFail,
}

#[derive(Debug, Clone)]
struct Queued {
    msdu: Msdu,
    target: TerminalId,
}

/// What `Simulation` must do in response to a `Mac` state transition. One
/// variant per side effect the C++ source reached outside the MAC object
/// for (scheduler, PHY, channel, link adaptation, terminal counters).
#[derive(Debug, Clone)]
pub enum MacEffect {
    Schedule(Timestamp, Wakeup, TimerSlot),
    Cancel(TimerSlot),
    WaitBusy,
    WaitFree,
    StopWaitBusy,
    StopWaitFree,
    /// Hand a fully-built frame to the PHY/channel for transmission.
    Transmit(Mpdu),
    LaFailed(TerminalId),
    LaRtsFailed(TerminalId),
    LaSuccess(TerminalId, bool),
    LaRxSuccess(TerminalId, Mcs),
    Delivered { msdu: Msdu, target: TerminalId, tx_time: Timestamp, now: Timestamp },
    RetryDropped { msdu: Msdu, target: TerminalId },
    QueueOverflow,
    AttemptedFragment,
}

/// Everything the MAC needs from the rest of the simulation to decide a
/// frame's mode/power and build it. Resolved by `Simulation` (it owns
/// `LinkAdapt` and the peer's `Phy`) and handed in just before the frame is
/// actually built, rather than `Mac` reaching for them itself.
#[derive(Debug, Clone, Copy)]
pub struct TxResolution {
    pub mode: TransmissionMode,
    pub power_dbm: f64,
}

pub struct Mac {
    pub owner: TerminalId,
    std: Dot11Standard,
    params: MacParams,

    queues: HashMap<Ac, VecDeque<Queued>>,
    cw: HashMap<Ac, u32>,
    boc: HashMap<Ac, u32>,
    boc_flag: HashMap<Ac, bool>,

    my_ac: Option<Ac>,
    counting: bool,
    time_to_send: Timestamp,

    nav: Timestamp,
    nav_rts: Timestamp,

    cur_msdu: Option<Msdu>,
    cur_target: Option<TerminalId>,
    cur_frags: Vec<DataMpdu>,
    current_frag: usize,
    nfrags: usize,
    retry_count: u32,
    rx_mode: Mcs,

    in_txop: bool,
    txop_end: Timestamp,
    txop_la_outcome: Option<TxopOutcome>,
    aggregating: bool,
    burst_frames_sent: u32,
    ba_pending_ids: Vec<PacketId>,
    ba_pending: Vec<(PacketId, Msdu, TerminalId)>,

    pub n_attempted_fragments: u64,
}

impl Mac {
    pub fn new(owner: TerminalId, std: Dot11Standard, params: MacParams) -> Self {
        let mut cw = HashMap::new();
        let mut boc = HashMap::new();
        let mut boc_flag = HashMap::new();
        let mut queues = HashMap::new();
        for ac in ALL_ACS {
            cw.insert(ac, ac_params(ac, std).cw_min);
            boc.insert(ac, 0);
            boc_flag.insert(ac, true);
            queues.insert(ac, VecDeque::new());
        }
        Mac {
            owner,
            std,
            params,
            queues,
            cw,
            boc,
            boc_flag,
            my_ac: None,
            counting: false,
            time_to_send: Timestamp::ZERO,
            nav: Timestamp::ZERO,
            nav_rts: Timestamp::ZERO,
            cur_msdu: None,
            cur_target: None,
            cur_frags: Vec::new(),
            current_frag: 0,
            nfrags: 0,
            retry_count: 0,
            rx_mode: Mcs::Mcs0,
            in_txop: false,
            txop_end: Timestamp::ZERO,
            txop_la_outcome: None,
            aggregating: false,
            burst_frames_sent: 0,
            ba_pending_ids: Vec::new(),
            ba_pending: Vec::new(),
            n_attempted_fragments: 0,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queues.values().map(|q| q.len()).sum()
    }

    fn secs_to_timestamp(secs: f64) -> Timestamp {
        Timestamp::from_secs(secs.max(0.0)).unwrap_or(Timestamp::ZERO)
    }

    /// Whether a TXOP is currently in progress, so a caller dispatching
    /// `Wakeup::TxAttempt` can route straight to `transmit()` (4.4.3: "if in
    /// TXOP, call `transmit()` directly") instead of re-entering the
    /// backoff/contention path.
    pub fn in_txop(&self) -> bool {
        self.in_txop
    }

    /// The peer this MAC will next build a frame for: either the one it is
    /// mid fragment-train with, or the target of the head of whichever
    /// queue would win contention.
    pub fn peek_next_target(&self) -> Option<TerminalId> {
        if let Some(t) = self.cur_target {
            return Some(t);
        }
        ALL_ACS
            .into_iter()
            .filter_map(|ac| self.queues[&ac].front())
            .next()
            .map(|q| q.target)
    }

    /// Size (in bytes) of the frame the next `transmit()` call will send:
    /// either the in-flight fragment being retried, or the head of the
    /// winning AC's queue, clamped to `frag_threshold`. Used by the caller
    /// to size the `nbytes` argument to the link-adaptation oracles so
    /// OPT-mode rate/power choices reflect the frame actually going out.
    pub fn next_payload_bytes(&self) -> u32 {
        if let Some(frag) = self.cur_frags.get(self.current_frag.saturating_sub(1)) {
            return frag.mpdu.size_bytes;
        }
        if let Some(t) = self.peek_next_target() {
            let ac = self.my_ac.or_else(|| self.ac_of_head(t));
            if let Some(ac) = ac {
                if let Some(q) = self.queues[&ac].front() {
                    return q.msdu.size_bytes.min(self.params.frag_threshold);
                }
            }
        }
        0
    }

    fn ac_of_head(&self, target: TerminalId) -> Option<Ac> {
        ALL_ACS
            .into_iter()
            .find(|ac| matches!(self.queues[ac].front(), Some(q) if q.target == target))
    }

    // ---- macUnitdataReq ----------------------------------------------

    pub fn unitdata_req(&mut self, msdu: Msdu, target: TerminalId, ac: Ac, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        if self.queue_len() >= self.params.max_queue_size {
            return vec![MacEffect::QueueOverflow];
        }
        let was_empty = self.queues[&ac].is_empty();
        self.queues.get_mut(&ac).unwrap().push_back(Queued { msdu, target });
        if was_empty && self.ba_pending_ids.is_empty() && self.cur_msdu.is_none() {
            self.tx_attempt(now, false, rng)
        } else {
            Vec::new()
        }
    }

    // ---- tx_attempt (4.4.3) -------------------------------------------

    pub fn tx_attempt(&mut self, now: Timestamp, phy_busy: bool, rng: &mut Mt19937) -> Vec<MacEffect> {
        if self.current_frag == 0 {
            if let Some(target) = self.peek_next_target() {
                let ac = self.my_ac.or_else(|| self.ac_of_head(target));
                if let Some(ac) = ac {
                    if let Some(q) = self.queues[&ac].front() {
                        let bytes = q.msdu.size_bytes;
                        self.nfrags = bytes.div_ceil(self.params.frag_threshold).max(1) as usize;
                        self.current_frag = 1;
                    }
                }
            }
        }

        if self.in_txop {
            return Vec::new(); // caller drives transmit() directly while in TXOP
        }

        if now <= self.nav {
            return vec![MacEffect::Schedule(
                self.nav.plus_ticks(1),
                Wakeup::TxAttempt { terminal: self.owner },
                TimerSlot::TxAttempt,
            )];
        }

        if phy_busy {
            return vec![MacEffect::WaitFree];
        }

        self.begin_countdown(now, rng)
    }

    /// Invoked when the channel reports free (either from `tx_attempt`'s
    /// `WaitFree` subscription, or a genuine `phyCCA_free` indication).
    pub fn phy_cca_free(&mut self, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        if now <= self.nav {
            return vec![MacEffect::Schedule(
                self.nav.plus_ticks(1),
                Wakeup::NavExpired { terminal: self.owner },
                TimerSlot::Nav,
            )];
        }
        if self.counting {
            self.resume_countdown(now, rng)
        } else {
            self.begin_countdown(now, rng)
        }
    }

    pub fn phy_cca_busy(&mut self, now: Timestamp) -> Vec<MacEffect> {
        if let Some(ac) = self.my_ac {
            let remaining_ticks = self
                .time_to_send
                .checked_sub(now)
                .map(|t| t.ticks())
                .unwrap_or(0);
            let slot_ticks = (SLOT_TIME_SECS / crate::timestamp::TIME_UNIT).round() as u64;
            let boc = if slot_ticks == 0 { 0 } else { (remaining_ticks / slot_ticks) as u32 };
            self.boc.insert(ac, boc.min(self.cw[&ac]));
        }
        self.counting = false;
        vec![MacEffect::Cancel(TimerSlot::Txop)]
    }

    // ---- backoff / internal contention (4.4.4) -------------------------

    fn begin_countdown(&mut self, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        self.internal_contention(now, rng);
        let Some(ac) = self.my_ac else { return Vec::new() };
        let aifs = Mac::secs_to_timestamp(aifs_secs(ac, self.std));
        let boc = self.boc[&ac];
        let slot = Mac::secs_to_timestamp(SLOT_TIME_SECS * boc as f64);
        self.time_to_send = now + aifs + slot;
        self.counting = true;
        vec![
            MacEffect::WaitBusy,
            MacEffect::Schedule(self.time_to_send, Wakeup::StartTxop { terminal: self.owner }, TimerSlot::Txop),
        ]
    }

    fn resume_countdown(&mut self, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        let Some(ac) = self.my_ac else { return self.begin_countdown(now, rng) };
        let aifs = Mac::secs_to_timestamp(aifs_secs(ac, self.std));
        let boc = self.boc[&ac];
        let slot = Mac::secs_to_timestamp(SLOT_TIME_SECS * boc as f64);
        self.time_to_send = now + aifs + slot;
        self.counting = true;
        vec![
            MacEffect::WaitBusy,
            MacEffect::Schedule(self.time_to_send, Wakeup::StartTxop { terminal: self.owner }, TimerSlot::Txop),
        ]
    }

    /// Draws a fresh `U[0, CW-1]` backoff counter for `ac` against its
    /// current `cw` value.
    fn draw_boc(&mut self, ac: Ac, rng: &mut Mt19937) {
        let cw = self.cw[&ac];
        self.boc.insert(ac, rng.discrete_uniform(0, cw as i64 - 1).max(0) as u32);
    }

    /// 4.4.4: pick the AC that wins this round among all non-empty queues.
    fn internal_contention(&mut self, now: Timestamp, rng: &mut Mt19937) {
        let nonempty: Vec<Ac> = ALL_ACS.into_iter().filter(|ac| !self.queues[ac].is_empty()).collect();
        if nonempty.is_empty() {
            self.my_ac = None;
            return;
        }

        for &ac in &nonempty {
            if self.boc_flag[&ac] {
                self.cw.insert(ac, ac_params(ac, self.std).cw_min);
                self.draw_boc(ac, rng);
                self.boc_flag.insert(ac, false);
            }
        }

        let mut ttt: HashMap<Ac, Timestamp> = HashMap::new();
        for &ac in &nonempty {
            let aifs = Mac::secs_to_timestamp(aifs_secs(ac, self.std));
            let slot = Mac::secs_to_timestamp(SLOT_TIME_SECS * self.boc[&ac] as f64);
            ttt.insert(ac, now + aifs + slot);
        }

        let winner = *nonempty
            .iter()
            .min_by_key(|ac| ttt[ac].ticks())
            .expect("nonempty checked above");
        let winner_ttt = ttt[&winner];

        for &ac in &nonempty {
            if ac == winner {
                continue;
            }
            if ttt[&ac] == winner_ttt {
                let doubled = (self.cw[&ac] * 2 + 1).min(ac_params(ac, self.std).cw_max);
                self.cw.insert(ac, doubled);
                self.draw_boc(ac, rng);
                let aifs = Mac::secs_to_timestamp(aifs_secs(ac, self.std));
                let slot = Mac::secs_to_timestamp(SLOT_TIME_SECS * self.boc[&ac] as f64);
                ttt.insert(ac, now + aifs + slot);
            } else {
                let loser_ttt = ttt[&ac];
                let diff_ticks = loser_ttt.ticks().saturating_sub(winner_ttt.ticks());
                let slot_ticks = (SLOT_TIME_SECS / crate::timestamp::TIME_UNIT).round() as u64;
                let dec = if slot_ticks == 0 { 0 } else { (diff_ticks / slot_ticks) as u32 };
                let cur = self.boc[&ac];
                self.boc.insert(ac, cur.saturating_sub(dec));
            }
        }

        self.my_ac = Some(winner);
    }

    fn request_boc_redraw(&mut self, ac: Ac) {
        self.boc_flag.insert(ac, true);
    }

    // ---- start/end TXOP (4.4.5) ----------------------------------------

    /// Fires when the backoff countdown elapses. `res` resolves the RTS
    /// (MCS0/fixed power) mode/power for the opening frame.
    pub fn start_txop(&mut self, now: Timestamp, id_gen: &mut PacketIdGen, res: TxResolution) -> Vec<MacEffect> {
        self.counting = false;
        let Some(ac) = self.my_ac else { return Vec::new() };
        let acp = ac_params(ac, self.std);

        if !self.in_txop && acp.txop_max_secs > 0.0 {
            let Some(target) = self.peek_next_target() else { return Vec::new() };
            self.in_txop = true;
            self.aggregating = self.params.set_ba_agg;
            self.burst_frames_sent = 0;
            self.txop_la_outcome = None;

            let planned = self.plan_txop_duration(ac, target);
            self.txop_end = now + Mac::secs_to_timestamp(planned) + Timestamp::from_ticks(1);

            let rts = packet::control_frame(
                id_gen,
                PacketType::Rts,
                TransmissionMode::Mcs(Mcs::Mcs0),
                self.std,
                res.power_dbm,
                self.owner,
                target,
                self.txop_end,
            );
            let cts_dur = packet::calc_duration(
                packet::control_frame(id_gen, PacketType::Cts, TransmissionMode::Mcs(Mcs::Mcs0), self.std, 0.0, self.owner, target, Timestamp::ZERO).nbits(),
                TransmissionMode::Mcs(Mcs::Mcs0),
                self.std,
                true,
            );
            let timeout = now + rts_total_hold(rts.duration) + Mac::secs_to_timestamp(SIFS_SECS + cts_dur) + Timestamp::from_ticks(5);
            let mut effects = vec![MacEffect::Transmit(rts)];
            effects.push(MacEffect::Schedule(timeout, Wakeup::CtsTimeout { terminal: self.owner }, TimerSlot::Cts));
            effects
        } else {
            self.transmit(now, id_gen, res)
        }
    }

    /// Rough capacity planning for a TXOP: how many queued MSDUs (to the
    /// same target, if aggregating) fit before `TXOPmax`, including the
    /// opening RTS/CTS and per-frame ACK/BA overhead.
    fn plan_txop_duration(&self, ac: Ac, target: TerminalId) -> f64 {
        let acp = ac_params(ac, self.std);
        let budget = acp.txop_max_secs;
        let mut used = 0.0;
        let mode = TransmissionMode::Mcs(Mcs::Mcs0);
        let avg_frag_bits = (self.params.frag_threshold.min(1500) * 8) as u32;
        let frame_dur = packet::calc_duration(avg_frag_bits, mode, self.std, true);
        let ack_dur = packet::calc_duration(112, mode, self.std, true);

        if let Some(q) = self.queues.values().flatten().find(|q| q.target == target) {
            let _ = q;
        }
        let mut count = 0;
        for q in self.queues.values().flatten().filter(|q| q.target == target) {
            let _ = q;
            let add = frame_dur + SIFS_SECS + if self.aggregating { 0.0 } else { ack_dur + SIFS_SECS };
            if used + add > budget {
                break;
            }
            used += add;
            count += 1;
        }
        if self.aggregating && count > 0 {
            used += ack_dur + SIFS_SECS; // one trailing BlockAck
        }
        used.max(frame_dur)
    }

    pub fn end_txop(&mut self, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        self.in_txop = false;
        let outcome = self.txop_la_outcome.take().unwrap_or(TxopOutcome::Success);
        let mut effects = Vec::new();
        if let Some(target) = self.cur_target.or_else(|| self.peek_next_target()) {
            effects.push(match outcome {
                TxopOutcome::Success => MacEffect::LaSuccess(target, true),
                TxopOutcome::AckFail => MacEffect::LaFailed(target),
                TxopOutcome::CtsFail => MacEffect::LaRtsFailed(target),
            });
        }
        if !self.queue_len_empty() && self.ba_pending_ids.is_empty() {
            effects.extend(self.tx_attempt(now, false, rng));
        }
        effects
    }

    fn queue_len_empty(&self) -> bool {
        self.queue_len() == 0
    }

    // ---- transmit (4.4.6) ----------------------------------------------

    pub fn transmit(&mut self, now: Timestamp, id_gen: &mut PacketIdGen, res: TxResolution) -> Vec<MacEffect> {
        let Some(target) = self.peek_next_target() else { return Vec::new() };
        if self.cur_msdu.is_none() {
            let ac = self.my_ac.unwrap_or(Ac::Be);
            if let Some(q) = self.queues.get_mut(&ac).and_then(|q| q.pop_front()) {
                self.cur_target = Some(q.target);
                let ack_policy = if self.in_txop && self.aggregating {
                    AckPolicy::BlockAck
                } else {
                    AckPolicy::NormalAck
                };
                self.cur_frags = packet::fragment(
                    id_gen,
                    &q.msdu,
                    self.params.frag_threshold,
                    res.mode,
                    self.std,
                    ack_policy,
                    res.power_dbm,
                    self.owner,
                    q.target,
                );
                self.nfrags = self.cur_frags.len();
                self.current_frag = 1;
                self.cur_msdu = Some(q.msdu);
            } else {
                return Vec::new();
            }
        }

        let Some(frag) = self.cur_frags.get_mut(self.current_frag - 1) else { return Vec::new() };
        frag.mpdu.mode = res.mode;
        frag.mpdu.tx_power_dbm = res.power_dbm;
        if self.burst_frames_sent > 0 {
            frag.mpdu.duration = packet::calc_duration(frag.mpdu.nbits(), res.mode, self.std, false);
        }
        self.n_attempted_fragments += 1;

        let frame_bytes_with_mac = frag.mpdu.size_bytes;
        if !self.in_txop && frame_bytes_with_mac >= self.params.rts_threshold {
            let rts = packet::control_frame(
                id_gen,
                PacketType::Rts,
                TransmissionMode::Mcs(Mcs::Mcs0),
                self.std,
                res.power_dbm,
                self.owner,
                target,
                now + Mac::secs_to_timestamp(
                    rts_total_hold(frag.mpdu.duration) + 2.0 * SIFS_SECS,
                ),
            );
            let cts_dur = 14.0 * 8.0 / 6.0 * 1e-6; // rough fallback, overwritten below
            let _ = cts_dur;
            let timeout = now + Mac::secs_to_timestamp(rts_total_hold(rts.duration) + SIFS_SECS + 5.0 * crate::timestamp::TIME_UNIT);
            return vec![
                MacEffect::Transmit(rts),
                MacEffect::Schedule(timeout, Wakeup::CtsTimeout { terminal: self.owner }, TimerSlot::Cts),
            ];
        }

        self.send_data(now, frag.clone())
    }

    fn send_data(&mut self, now: Timestamp, frag: DataMpdu) -> Vec<MacEffect> {
        let mut mpdu = frag.mpdu;
        let nav = if self.in_txop {
            self.txop_end
        } else {
            now + Mac::secs_to_timestamp(mpdu.duration + SIFS_SECS) + Mac::secs_to_timestamp(rx_ack_duration(mpdu.mode, self.std))
        };
        mpdu.nav = nav;
        self.nav = nav;
        self.burst_frames_sent += 1;

        let mut effects = vec![MacEffect::Transmit(mpdu.clone())];
        if self.in_txop && self.aggregating {
            self.ba_pending_ids.push(mpdu.id);
            if let Some(msdu) = self.cur_msdu.clone() {
                self.ba_pending.push((mpdu.id, msdu, mpdu.target));
            }
            effects.push(MacEffect::Schedule(
                Timestamp::from_secs(mpdu.duration).unwrap_or(Timestamp::ZERO) + now,
                Wakeup::SendNextFragment { terminal: self.owner },
                TimerSlot::NextFrag,
            ));
        } else {
            let timeout = now
                + Mac::secs_to_timestamp(mpdu.duration + SIFS_SECS + rx_ack_duration(mpdu.mode, self.std))
                + Timestamp::from_ticks(5);
            effects.push(MacEffect::Schedule(timeout, Wakeup::AckTimeout { terminal: self.owner }, TimerSlot::Ack));
        }
        effects
    }

    /// Called at `now + SIFS` by the receiver to emit an ACK.
    pub fn send_ack(&mut self, now: Timestamp, target: TerminalId, id_gen: &mut PacketIdGen, res: TxResolution, nav: Timestamp) -> Vec<MacEffect> {
        let ack = packet::control_frame(id_gen, PacketType::Ack, res.mode, self.std, res.power_dbm, self.owner, target, nav);
        let _ = now;
        vec![MacEffect::Transmit(ack)]
    }

    pub fn send_cts(&mut self, target: TerminalId, id_gen: &mut PacketIdGen, res: TxResolution) -> Vec<MacEffect> {
        let cts = packet::control_frame(
            id_gen,
            PacketType::Cts,
            TransmissionMode::Mcs(Mcs::Mcs0),
            self.std,
            res.power_dbm,
            self.owner,
            target,
            self.nav_rts,
        );
        vec![MacEffect::Transmit(cts)]
    }

    pub fn send_ba(&mut self, target: TerminalId, id_gen: &mut PacketIdGen, res: TxResolution, nav: Timestamp) -> Vec<MacEffect> {
        let mut ba = packet::control_frame(id_gen, PacketType::Ba, res.mode, self.std, res.power_dbm, self.owner, target, nav);
        ba.acked_ids = std::mem::take(&mut self.ba_pending_ids);
        vec![MacEffect::Transmit(ba)]
    }

    // ---- timeouts (4.4.7) ----------------------------------------------

    pub fn ack_timed_out(&mut self, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        let mut effects = Vec::new();
        let target = self.cur_target;
        if self.in_txop {
            self.txop_la_outcome = Some(TxopOutcome::AckFail);
        } else if let Some(t) = target {
            effects.push(MacEffect::LaFailed(t));
        }
        effects.extend(self.retry_or_drop(now, target, rng));
        effects
    }

    pub fn cts_timed_out(&mut self, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        let mut effects = Vec::new();
        let target = self.cur_target.or_else(|| self.peek_next_target());
        if self.in_txop {
            self.txop_la_outcome = Some(TxopOutcome::CtsFail);
            return vec![MacEffect::Schedule(self.txop_end, Wakeup::TxopExpired { terminal: self.owner }, TimerSlot::TxopExpire)];
        }
        if let Some(t) = target {
            effects.push(MacEffect::LaRtsFailed(t));
        }
        effects.extend(self.retry_or_drop(now, target, rng));
        effects
    }

    pub fn ba_timed_out(&mut self, now: Timestamp) -> Vec<MacEffect> {
        self.txop_la_outcome = Some(TxopOutcome::AckFail);
        let target = self.cur_target;
        let pending = std::mem::take(&mut self.ba_pending);
        self.ba_pending_ids.clear();
        for (_, msdu, t) in pending.into_iter().rev() {
            self.queues.entry(self.my_ac.unwrap_or(Ac::Be)).or_default().push_front(Queued { msdu, target: t });
        }
        let _ = now;
        let _ = target;
        Vec::new()
    }

    fn retry_or_drop(&mut self, now: Timestamp, target: Option<TerminalId>, rng: &mut Mt19937) -> Vec<MacEffect> {
        self.retry_count += 1;
        let ac = self.my_ac.unwrap_or(Ac::Be);
        let mut effects = Vec::new();
        if self.retry_count >= self.params.retry_limit {
            if let Some(msdu) = self.cur_msdu.take() {
                effects.push(MacEffect::RetryDropped { msdu, target: target.unwrap_or(self.owner) });
            }
            self.advance_past_current_msdu();
        } else {
            let doubled = (self.cw[&ac] * 2 + 1).min(ac_params(ac, self.std).cw_max);
            self.cw.insert(ac, doubled);
            self.request_boc_redraw(ac);
        }
        effects.extend(self.tx_attempt(now, false, rng));
        effects
    }

    fn advance_past_current_msdu(&mut self) {
        self.cur_msdu = None;
        self.cur_target = None;
        self.cur_frags.clear();
        self.current_frag = 0;
        self.nfrags = 0;
        self.retry_count = 0;
    }

    // ---- receive (4.4.8) ------------------------------------------------

    pub fn receive_bc(&mut self, mpdu: &Mpdu, now: Timestamp) -> Vec<MacEffect> {
        let mut effects = Vec::new();
        if mpdu.nav > self.nav {
            self.nav = mpdu.nav;
        }
        if mpdu.packet_type == PacketType::Rts {
            let cts_dur = packet::calc_duration(112, TransmissionMode::Mcs(Mcs::Mcs0), self.std, true);
            let at = now + Mac::secs_to_timestamp(2.0 * SIFS_SECS + cts_dur) + Mac::secs_to_timestamp(2.0 * SLOT_TIME_SECS);
            effects.push(MacEffect::Schedule(at, Wakeup::CheckNav { terminal: self.owner }, TimerSlot::CheckNav));
        }
        effects
    }

    pub fn check_nav(&mut self, now: Timestamp) -> Vec<MacEffect> {
        if now > self.nav {
            self.nav = now;
        }
        Vec::new()
    }

    pub fn end_nav(&mut self, now: Timestamp, rng: &mut Mt19937) -> Vec<MacEffect> {
        self.phy_cca_free(now, rng)
    }

    pub fn receive_this(&mut self, mpdu: Mpdu, now: Timestamp, rng: &mut Mt19937) -> (Vec<MacEffect>, Option<(TerminalId, bool)>) {
        match mpdu.packet_type {
            PacketType::Ack => {
                let mut effects = vec![MacEffect::Cancel(TimerSlot::Ack)];
                let target = self.cur_target;
                if self.current_frag >= self.nfrags {
                    if let (Some(msdu), Some(t)) = (self.cur_msdu.take(), target) {
                        effects.push(MacEffect::LaSuccess(t, true));
                        effects.push(MacEffect::Delivered { msdu, target: t, tx_time: now, now });
                    }
                    self.advance_past_current_msdu();
                    effects.extend(self.tx_attempt(now, false, rng));
                } else {
                    if let Some(t) = target {
                        effects.push(MacEffect::LaSuccess(t, false));
                    }
                    self.current_frag += 1;
                    effects.push(MacEffect::Schedule(
                        now + Mac::secs_to_timestamp(SIFS_SECS),
                        Wakeup::SendNextFragment { terminal: self.owner },
                        TimerSlot::NextFrag,
                    ));
                }
                (effects, None)
            }
            PacketType::Data => {
                let mut effects = Vec::new();
                if mpdu.nav > self.nav {
                    self.nav = mpdu.nav;
                }
                self.rx_mode = match mpdu.mode {
                    TransmissionMode::Mcs(m) => m,
                    _ => Mcs::Mcs0,
                };
                let data: DataMpdu = DataMpdu {
                    mpdu: mpdu.clone(),
                    msdu_id: PacketId::default(),
                    fragment_index: 0,
                    fragment_count: 1,
                    ack_policy: AckPolicy::NormalAck,
                    retries: 0,
                };
                let _ = data;
                let notify = Some((mpdu.source, false));
                effects.push(MacEffect::Schedule(
                    now + Mac::secs_to_timestamp(SIFS_SECS),
                    Wakeup::SendAck { terminal: self.owner, target: mpdu.source },
                    TimerSlot::SendAck,
                ));
                (effects, notify)
            }
            PacketType::Rts => {
                let mut effects = Vec::new();
                if now > self.nav {
                    self.nav_rts = mpdu.nav;
                    self.nav = mpdu.nav;
                    effects.push(MacEffect::Schedule(
                        now + Mac::secs_to_timestamp(SIFS_SECS),
                        Wakeup::SendCts { terminal: self.owner, target: mpdu.source },
                        TimerSlot::SendCts,
                    ));
                }
                (effects, None)
            }
            PacketType::Cts => {
                let mut effects = vec![MacEffect::Cancel(TimerSlot::Cts)];
                if self.in_txop {
                    effects.push(MacEffect::Schedule(
                        now + Mac::secs_to_timestamp(SIFS_SECS),
                        Wakeup::TxAttempt { terminal: self.owner },
                        TimerSlot::TxAttempt,
                    ));
                    effects.push(MacEffect::Schedule(self.txop_end, Wakeup::TxopExpired { terminal: self.owner }, TimerSlot::TxopExpire));
                } else {
                    effects.push(MacEffect::Schedule(
                        now,
                        Wakeup::SendNextFragment { terminal: self.owner },
                        TimerSlot::NextFrag,
                    ));
                }
                (effects, None)
            }
            PacketType::Ba => {
                let mut effects = vec![MacEffect::Cancel(TimerSlot::Ba)];
                let acked = mpdu.acked_ids.clone();
                let pending = std::mem::take(&mut self.ba_pending);
                self.retry_count += 1;
                let dropped = self.retry_count >= self.params.retry_limit;
                for (id, msdu, target) in pending {
                    if acked.contains(&id) {
                        effects.push(MacEffect::LaSuccess(target, true));
                        effects.push(MacEffect::Delivered { msdu, target, tx_time: now, now });
                    } else if dropped {
                        effects.push(MacEffect::RetryDropped { msdu, target });
                    } else {
                        let ac = self.my_ac.unwrap_or(Ac::Be);
                        self.queues.entry(ac).or_default().push_front(Queued { msdu, target });
                    }
                }
                self.ba_pending_ids.clear();
                self.advance_past_current_msdu();
                effects.extend(self.tx_attempt(now, false, rng));
                (effects, None)
            }
            PacketType::Dummy => (Vec::new(), None),
        }
    }

    pub fn apply_rx_notify(&mut self, rx_mode: Mcs) {
        self.rx_mode = rx_mode;
    }
}

fn rts_total_hold(rts_duration: f64) -> f64 {
    rts_duration
}

/// ACK airtime at `mode` for a bare 14-byte ACK, used to size NAV/timeouts
/// without constructing a throwaway `Mpdu`.
fn rx_ack_duration(mode: TransmissionMode, std: Dot11Standard) -> f64 {
    packet::calc_duration(14 * 8, mode, std, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PacketIdGen;

    fn params() -> MacParams {
        MacParams {
            rts_threshold: 2312,
            retry_limit: 7,
            frag_threshold: 2312,
            max_queue_size: 10,
            set_ba_agg: false,
        }
    }

    fn msdu(id_gen: &mut PacketIdGen, size: u32) -> Msdu {
        Msdu { id: id_gen.next(), size_bytes: size, generated_at: Timestamp::ZERO }
    }

    #[test]
    fn queue_overflow_reports_effect_without_enqueueing() {
        let mut ids = PacketIdGen::default();
        let mut rng = Mt19937::new(1);
        let mut mac = Mac::new(TerminalId(0), Dot11Standard::N, MacParams { max_queue_size: 1, ..params() });
        let target = TerminalId(1);
        let effects = mac.unitdata_req(msdu(&mut ids, 100), target, Ac::Be, Timestamp::ZERO, &mut rng);
        assert!(!matches!(effects[0], MacEffect::QueueOverflow));
        let effects2 = mac.unitdata_req(msdu(&mut ids, 100), target, Ac::Be, Timestamp::ZERO, &mut rng);
        assert!(matches!(effects2[0], MacEffect::QueueOverflow));
    }

    #[test]
    fn internal_contention_prefers_lower_aifsn_ac() {
        let mut ids = PacketIdGen::default();
        let mut rng = Mt19937::new(1);
        let mut mac = Mac::new(TerminalId(0), Dot11Standard::N, params());
        let target = TerminalId(1);
        mac.unitdata_req(msdu(&mut ids, 100), target, Ac::Be, Timestamp::ZERO, &mut rng);
        mac.unitdata_req(msdu(&mut ids, 100), target, Ac::Vo, Timestamp::ZERO, &mut rng);
        mac.boc.insert(Ac::Be, 0);
        mac.boc.insert(Ac::Vo, 0);
        mac.internal_contention(Timestamp::ZERO, &mut rng);
        assert_eq!(mac.my_ac, Some(Ac::Vo));
    }

    #[test]
    fn internal_contention_draws_boc_from_rng_on_first_arrival() {
        let mut ids = PacketIdGen::default();
        let mut rng = Mt19937::new(42);
        let mut mac = Mac::new(TerminalId(0), Dot11Standard::N, params());
        let target = TerminalId(1);
        mac.unitdata_req(msdu(&mut ids, 100), target, Ac::Be, Timestamp::ZERO, &mut rng);
        let cw_min = ac_params(Ac::Be, Dot11Standard::N).cw_min;
        assert!(mac.boc[&Ac::Be] <= cw_min);
        assert!(!mac.boc_flag[&Ac::Be]);
    }

    #[test]
    fn retry_limit_drops_and_resets_fragmentation_state() {
        let mut ids = PacketIdGen::default();
        let mut rng = Mt19937::new(1);
        let mut mac = Mac::new(TerminalId(0), Dot11Standard::N, MacParams { retry_limit: 1, ..params() });
        let target = TerminalId(1);
        mac.unitdata_req(msdu(&mut ids, 100), target, Ac::Be, Timestamp::ZERO, &mut rng);
        mac.cur_msdu = Some(msdu(&mut ids, 100));
        mac.cur_target = Some(target);
        mac.my_ac = Some(Ac::Be);
        let effects = mac.ack_timed_out(Timestamp::ZERO, &mut rng);
        assert!(effects.iter().any(|e| matches!(e, MacEffect::RetryDropped { .. })));
        assert_eq!(mac.current_frag, 0);
    }

    #[test]
    fn queue_len_reflects_all_acs() {
        let mut ids = PacketIdGen::default();
        let mut rng = Mt19937::new(1);
        let mut mac = Mac::new(TerminalId(0), Dot11Standard::N, params());
        let target = TerminalId(1);
        mac.unitdata_req(msdu(&mut ids, 10), target, Ac::Be, Timestamp::ZERO, &mut rng);
        mac.unitdata_req(msdu(&mut ids, 10), target, Ac::Vo, Timestamp::ZERO, &mut rng);
        assert_eq!(mac.queue_len(), 2);
    }
}
