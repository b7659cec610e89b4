//! Shared radio channel: static path loss, Jakes fading on active links,
//! and in-flight-frame interference accounting.
//!
//! Ported from `original_source/src/Channel.cpp`. The source's `Link` also
//! carries a multi-tap TGn power-delay-profile model (channel models A-F,
//! one Jakes process per tap, raised-cosine resampling); the distilled
//! design only calls for a single Jakes sum-of-sinusoids process per active
//! link (`fade(t) -> path_loss_dB`), so only that single-tap path is
//! implemented here — see `DESIGN.md` for the reasoning.

use std::collections::HashMap;

use crate::ids::{PacketId, TerminalId};
use crate::position::Position;
use crate::rng::Mt19937;
use crate::timestamp::Timestamp;

/// Unordered terminal pair, used as a path-loss / link table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TermPair(TerminalId, TerminalId);

impl TermPair {
    fn new(a: TerminalId, b: TerminalId) -> Self {
        if a.0 <= b.0 {
            TermPair(a, b)
        } else {
            TermPair(b, a)
        }
    }
}

/// Abramowitz & Stegun rational approximation of the Bessel function J0,
/// used by `Link::fade`'s coherence-time test (`bessel_j0`).
fn bessel_j0(x: f64) -> f64 {
    let ax = x.abs();
    if ax < 8.0 {
        let y = x * x;
        let p1 = -2957821389.0
            + y * (7416400538.0
                + y * (-5153438139.0 + y * (1322980509.0 + y * (-144979.0 + y * 0.0))));
        let num = -2957821389.0
            + y * (7416400538.0
                + y * (-5153438139.0
                    + y * (1322980509.0 + y * (-151654261.0 + y * 6467.491))));
        let den = 57568490411.0
            + y * (1029532985.0
                + y * (9494680.718
                    + y * (59272.64853 + y * (267.8532712 + y * 1.0))));
        let _ = p1;
        num / den
    } else {
        let z = 8.0 / ax;
        let y = z * z;
        let xx = ax - 0.785398164;
        let p0 = 1.0
            + y * (-0.1098628627e-2
                + y * (0.2734510407e-4 + y * (-0.2073370639e-5 + y * 0.2093887211e-6)));
        let q0 = -0.1562499995e-1
            + y * (0.1430488765e-3
                + y * (-0.6911147651e-5 + y * (0.7621095161e-6 + y * -0.934935152e-7)));
        (0.636619772 / ax).sqrt() * (xx.cos() * p0 - z * xx.sin() * q0)
    }
}

/// One Jakes sum-of-sinusoids fading process, driven by the same RNG as the
/// rest of the simulation (seeded once at link creation).
#[derive(Debug, Clone)]
struct Jakes {
    doppler_spread: f64,
    cos_beta: Vec<f64>,
    sin_beta: Vec<f64>,
    omega: Vec<f64>,
    theta: Vec<f64>,
    cos_alpha: f64,
    sin_alpha: f64,
}

impl Jakes {
    fn new(fd: f64, n_osc: usize, rng: &mut Mt19937) -> Self {
        let doppler_spread = 2.0 * std::f64::consts::PI * fd;
        let mut theta = Vec::with_capacity(n_osc);
        let mut beta = Vec::with_capacity(n_osc);
        for i in 0..n_osc {
            beta.push((std::f64::consts::PI / n_osc as f64) * (i as f64 + 1.0));
            theta.push(rng.uniform(0.0, 2.0 * std::f64::consts::PI));
        }
        let alpha = rng.uniform(0.0, 2.0 * std::f64::consts::PI);

        let omega: Vec<f64> = beta
            .iter()
            .map(|b| doppler_spread * (b * n_osc as f64 / (2 * n_osc + 1) as f64).cos())
            .collect();
        let cos_beta = beta.iter().map(|b| b.cos()).collect();
        let sin_beta = beta.iter().map(|b| b.sin()).collect();

        Jakes {
            doppler_spread,
            cos_beta,
            sin_beta,
            omega,
            theta,
            cos_alpha: alpha.cos(),
            sin_alpha: alpha.sin(),
        }
    }

    fn fade_calc(&self, t: f64) -> f64 {
        let n = self.omega.len() as f64;
        let mut sum_re = 0.0;
        let mut sum_im = 0.0;
        for i in 0..self.omega.len() {
            let c = (self.omega[i] * t + self.theta[i]).cos();
            sum_re += self.cos_beta[i] * c;
            sum_im += self.sin_beta[i] * c;
        }
        let common = std::f64::consts::SQRT_2 * (self.doppler_spread * t).cos();
        let re = 2.0 * sum_re + common * self.cos_alpha;
        let im = 2.0 * sum_im + common * self.sin_alpha;
        ((re * re + im * im).sqrt()) / (n + 0.5).sqrt()
    }
}

/// A time-varying channel link between two active terminals.
#[derive(Debug, Clone)]
struct Link {
    pair: TermPair,
    path_loss_mean: f64,
    path_loss: f64,
    jakes: Jakes,
    doppler_spread: f64,
    time_last: Timestamp,
    /// Smallest observed time delta that was still within the coherence
    /// window (fast-path skip threshold). The source caches this as a
    /// lower bound rather than recomputing Bessel J0 every call; if the
    /// Doppler spread is extremely small this bound can end up frozen near
    /// zero and never grow, effectively disabling the fast path forever —
    /// preserved here rather than "fixed", per the resolved open question.
    time_diff_min: f64,
}

impl Link {
    fn new(pair: TermPair, path_loss_mean: f64, fd: f64, n_osc: usize, rng: &mut Mt19937) -> Self {
        let jakes = Jakes::new(fd, n_osc, rng);
        let path_loss = path_loss_mean - 2.0 * to_db(jakes.fade_calc(0.0));
        Link {
            pair,
            path_loss_mean,
            path_loss,
            jakes,
            doppler_spread: 2.0 * std::f64::consts::PI * fd,
            time_last: Timestamp::ZERO,
            time_diff_min: -1.0,
        }
    }

    fn fade(&mut self, t: Timestamp) -> f64 {
        let time_diff_new = t.as_secs() - self.time_last.as_secs();

        if time_diff_new <= self.time_diff_min {
            return self.path_loss;
        }

        if bessel_j0(self.doppler_spread * time_diff_new) >= 0.9999 {
            self.time_diff_min = time_diff_new;
            return self.path_loss;
        }

        self.time_last = t;
        self.path_loss = self.path_loss_mean - 2.0 * to_db(self.jakes.fade_calc(t.as_secs()));
        self.path_loss
    }
}

fn to_db(amplitude: f64) -> f64 {
    20.0 * amplitude.max(1e-300).log10()
}

/// One frame currently in flight on the channel, with the running and peak
/// interference observed while it has been airborne.
#[derive(Debug, Clone)]
struct AirPacket {
    id: PacketId,
    source: TerminalId,
    target: TerminalId,
    power_dbm: f64,
    interf: f64,
    interf_max: f64,
}

/// Parameters shared by every link created from this channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelParams {
    pub loss_exponent: f64,
    pub ref_loss_db: f64,
    pub doppler_spread_hz: f64,
    pub number_sines: usize,
}

#[derive(Debug)]
pub struct Channel {
    params: ChannelParams,
    positions: HashMap<TerminalId, Position>,
    path_loss: HashMap<TermPair, f64>,
    links: HashMap<TermPair, Link>,
    air_pack: Vec<AirPacket>,
    waiting_busy: Vec<TerminalId>,
    waiting_free: Vec<TerminalId>,
}

impl Channel {
    pub fn new(params: ChannelParams) -> Self {
        Channel {
            params,
            positions: HashMap::new(),
            path_loss: HashMap::new(),
            links: HashMap::new(),
            air_pack: Vec::new(),
            waiting_busy: Vec::new(),
            waiting_free: Vec::new(),
        }
    }

    /// Registers a terminal's position and computes static path loss to
    /// every terminal already known to the channel.
    pub fn new_term(&mut self, id: TerminalId, pos: Position) {
        if self.positions.contains_key(&id) {
            return;
        }
        for (&other_id, &other_pos) in self.positions.iter() {
            let distance = pos.distance(&other_pos).max(1e-3);
            let pl = self.params.ref_loss_db + 10.0 * self.params.loss_exponent * distance.log10();
            self.path_loss.insert(TermPair::new(id, other_id), pl);
        }
        self.positions.insert(id, pos);
    }

    /// Creates (if absent) a time-varying fading link between two
    /// terminals, replacing their static path loss entry with the link's
    /// initial faded value.
    pub fn new_link(&mut self, a: TerminalId, b: TerminalId, now: Timestamp, rng: &mut Mt19937) {
        let pair = TermPair::new(a, b);
        if self.links.contains_key(&pair) {
            return;
        }
        let mean = *self.path_loss.get(&pair).unwrap_or(&0.0);
        let mut link = Link::new(
            pair,
            mean,
            self.params.doppler_spread_hz,
            self.params.number_sines,
            rng,
        );
        let pl = link.fade(now);
        self.path_loss.insert(pair, pl);
        self.links.insert(pair, link);
    }

    pub fn get_path_loss(&self, a: TerminalId, b: TerminalId) -> f64 {
        *self.path_loss.get(&TermPair::new(a, b)).unwrap_or(&f64::INFINITY)
    }

    /// Every registered terminal other than `exclude`, for broadcasting a
    /// frame to bystanders (overhearing, NAV bookkeeping).
    pub fn other_terminals(&self, exclude: TerminalId) -> Vec<TerminalId> {
        self.positions.keys().copied().filter(|&id| id != exclude).collect()
    }

    /// Total interference power, in dBm, visible at `target` — defined (per
    /// the source) as the MAX single-contributor power among in-flight
    /// frames, not a linear sum. Preserved as an intentional simplification
    /// rather than corrected to a summed-power model.
    pub fn get_interf_dbm(&self, target: TerminalId) -> f64 {
        let mut max_interf = f64::NEG_INFINITY;
        for ap in &self.air_pack {
            if ap.target == target {
                continue;
            }
            let pl = self.get_path_loss(ap.source, target);
            let candidate = ap.power_dbm - pl;
            if candidate >= max_interf {
                max_interf = candidate;
            }
        }
        max_interf
    }

    /// Registers `target` to be notified the next time the channel becomes
    /// busy or free.
    pub fn wait_busy(&mut self, target: TerminalId) {
        if !self.waiting_busy.contains(&target) {
            self.waiting_busy.push(target);
        }
    }

    pub fn wait_free(&mut self, target: TerminalId) {
        if !self.waiting_free.contains(&target) {
            self.waiting_free.push(target);
        }
    }

    pub fn stop_waiting(&mut self, target: TerminalId) {
        self.waiting_busy.retain(|t| *t != target);
        self.waiting_free.retain(|t| *t != target);
    }

    pub fn waiting_busy_list(&self) -> &[TerminalId] {
        &self.waiting_busy
    }

    pub fn waiting_free_list(&self) -> &[TerminalId] {
        &self.waiting_free
    }

    /// Places `source`'s frame on the channel, visible to `target` alone
    /// (point-to-point data/ACK/RTS/CTS/BA). Updates interference
    /// accounting for every already-airborne frame and re-evaluates the
    /// fading link, if one exists, for the pair.
    pub fn send_packet_one(
        &mut self,
        id: PacketId,
        source: TerminalId,
        target: TerminalId,
        power_dbm: f64,
        now: Timestamp,
    ) {
        self.recalc_on_new(id, source, target, power_dbm);
        self.refresh_link(source, target, now);
    }

    fn recalc_on_new(&mut self, id: PacketId, source: TerminalId, target: TerminalId, power_dbm: f64) {
        let mut interf = 0.0;
        for ap in &mut self.air_pack {
            // The new frame seen from each existing frame's target.
            let pl_new_at_old_target = self.path_loss.get(&TermPair::new(source, ap.target)).copied();
            if source == ap.target {
                ap.interf = f64::INFINITY;
                ap.interf_max = f64::INFINITY;
            } else if let Some(pl) = pl_new_at_old_target {
                let contrib = 10f64.powf((power_dbm - pl) / 10.0);
                ap.interf += contrib;
                if ap.interf > ap.interf_max {
                    ap.interf_max = ap.interf;
                }
            }

            if ap.target == target {
                interf = f64::INFINITY;
            } else {
                let pl = self.path_loss.get(&TermPair::new(ap.source, target)).copied();
                if let Some(pl) = pl {
                    interf += 10f64.powf((ap.power_dbm - pl) / 10.0);
                }
            }
        }

        self.air_pack.push(AirPacket {
            id,
            source,
            target,
            power_dbm,
            interf,
            interf_max: interf,
        });
    }

    fn refresh_link(&mut self, a: TerminalId, b: TerminalId, now: Timestamp) {
        let pair = TermPair::new(a, b);
        if let Some(link) = self.links.get_mut(&pair) {
            let pl = link.fade(now);
            self.path_loss.insert(pair, pl);
        }
    }

    /// Removes the named frame from the channel and returns
    /// `(path_loss_to_target, interf_max_seen_while_airborne)` for receive
    /// processing. Returns `None` if the frame is not found (already
    /// removed, e.g. by a prior collision cleanup).
    pub fn stop_send(&mut self, id: PacketId, target: TerminalId) -> Option<(f64, f64)> {
        let idx = self
            .air_pack
            .iter()
            .position(|ap| ap.id == id && ap.target == target)?;
        let finished = self.air_pack.remove(idx);
        let pl = self.get_path_loss(finished.source, target);

        // The finished frame's contribution to every still-airborne frame's
        // interference is withdrawn (but its recorded peak, interf_max,
        // stands — it already happened).
        for q in &mut self.air_pack {
            if q.target == finished.source {
                continue;
            }
            if let Some(&pl_at_q) = self.path_loss.get(&TermPair::new(finished.source, q.target)) {
                q.interf -= 10f64.powf((finished.power_dbm - pl_at_q) / 10.0);
            }
        }

        Some((pl, finished.interf_max))
    }

    pub fn is_airborne(&self, id: PacketId) -> bool {
        self.air_pack.iter().any(|ap| ap.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PacketIdGen;

    fn default_params() -> ChannelParams {
        ChannelParams {
            loss_exponent: 3.0,
            ref_loss_db: 40.0,
            doppler_spread_hz: 0.0,
            number_sines: 8,
        }
    }

    #[test]
    fn path_loss_grows_with_distance() {
        let mut ch = Channel::new(default_params());
        let a = TerminalId(0);
        let b = TerminalId(1);
        let c = TerminalId(2);
        ch.new_term(a, Position::new(0.0, 0.0));
        ch.new_term(b, Position::new(10.0, 0.0));
        ch.new_term(c, Position::new(100.0, 0.0));

        assert!(ch.get_path_loss(a, c) > ch.get_path_loss(a, b));
    }

    #[test]
    fn self_reception_path_loss_is_not_registered() {
        let ch = Channel::new(default_params());
        let a = TerminalId(0);
        assert_eq!(ch.get_path_loss(a, a), f64::INFINITY);
    }

    #[test]
    fn interference_rises_with_concurrent_transmissions() {
        let mut ch = Channel::new(default_params());
        let a = TerminalId(0);
        let b = TerminalId(1);
        let c = TerminalId(2);
        ch.new_term(a, Position::new(0.0, 0.0));
        ch.new_term(b, Position::new(5.0, 0.0));
        ch.new_term(c, Position::new(50.0, 0.0));

        let before = ch.get_interf_dbm(c);
        ch.send_packet_one(PacketId::default(), a, b, 0.0, Timestamp::ZERO);
        let after = ch.get_interf_dbm(c);
        assert!(after >= before);
    }

    #[test]
    fn two_frames_to_the_same_target_collide() {
        let mut ch = Channel::new(default_params());
        let mut ids = PacketIdGen::default();
        let a = TerminalId(0);
        let b = TerminalId(1);
        let c = TerminalId(2);
        ch.new_term(a, Position::new(0.0, 0.0));
        ch.new_term(b, Position::new(50.0, 0.0));
        ch.new_term(c, Position::new(100.0, 0.0));

        // Both a and b transmit to c at the same time: a collision at the
        // shared receiver, so the newly-sent frame's interference must be
        // flagged infinite (not just the pre-existing one's).
        ch.send_packet_one(ids.next(), a, c, 0.0, Timestamp::ZERO);
        let second = ids.next();
        ch.send_packet_one(second, b, c, 0.0, Timestamp::ZERO);

        let result = ch.stop_send(second, c);
        assert_eq!(result.map(|(_, interf_max)| interf_max), Some(f64::INFINITY));
    }

    #[test]
    fn finished_frame_contribution_is_withdrawn_from_survivors() {
        // r receives a long-running frame from sx. Two short interfering
        // frames (sy, then sz, both equidistant from r) arrive and leave in
        // sequence. If a finished frame's mW contribution is never
        // subtracted from the survivors (the bug), the second interferer's
        // arrival stacks on top of the first's stale contribution and the
        // observed peak roughly doubles; with the fix it stays flat.
        let params = default_params();
        let mut ch = Channel::new(params);
        let mut ids = PacketIdGen::default();
        let r = TerminalId(0);
        let sx = TerminalId(1);
        let sy = TerminalId(2);
        let sz = TerminalId(3);
        let w = TerminalId(4);
        ch.new_term(r, Position::new(0.0, 0.0));
        ch.new_term(sx, Position::new(1.0, 0.0));
        ch.new_term(sy, Position::new(5.0, 0.0));
        ch.new_term(sz, Position::new(0.0, 5.0));
        ch.new_term(w, Position::new(-5.0, 0.0));

        let pl = params.ref_loss_db + 10.0 * params.loss_exponent * 5.0f64.log10();
        let single_contrib = 10f64.powf((0.0 - pl) / 10.0);

        let x = ids.next();
        ch.send_packet_one(x, sx, r, 0.0, Timestamp::ZERO);
        let y = ids.next();
        ch.send_packet_one(y, sy, w, 0.0, Timestamp::ZERO);
        ch.stop_send(y, w);
        ch.send_packet_one(ids.next(), sz, w, 0.0, Timestamp::ZERO);

        let (_, interf_max) = ch.stop_send(x, r).unwrap();
        assert!(
            interf_max < 1.5 * single_contrib,
            "expected interf_max ~= {single_contrib}, got {interf_max} (stale interference not withdrawn)"
        );
    }

    #[test]
    fn stop_send_removes_the_frame() {
        let mut ch = Channel::new(default_params());
        let a = TerminalId(0);
        let b = TerminalId(1);
        ch.new_term(a, Position::new(0.0, 0.0));
        ch.new_term(b, Position::new(10.0, 0.0));
        let id = PacketId::default();
        ch.send_packet_one(id, a, b, 0.0, Timestamp::ZERO);
        assert!(ch.is_airborne(id));
        let result = ch.stop_send(id, b);
        assert!(result.is_some());
        assert!(!ch.is_airborne(id));
    }
}
