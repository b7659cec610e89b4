//! A station or access point, ported from `original_source/src/MobileStation.cpp`
//! and `AccessPoint.cpp`.
//!
//! The source gives each role its own class under a common `Terminal`
//! base; per the Design Notes "Inheritance" note, the two never actually
//! diverge in what state they hold (an AP is just a terminal with more
//! connections hanging off it), so there is one `Terminal` struct here,
//! distinguished only by how many connections it ends up with.

use crate::ids::TerminalId;
use crate::linkadapt::LinkAdapt;
use crate::mac::{Ac, Mac};
use crate::phy::Phy;
use crate::position::Position;
use crate::traffic::Traffic;

/// One traffic flow from this terminal to `target`, with its own traffic
/// generator, access category, and per-link rate/power adaptation state.
pub struct Connection {
    pub target: TerminalId,
    pub ac: Ac,
    pub traffic: Traffic,
    pub link_adapt: LinkAdapt,
}

/// Running per-terminal delivery statistics, sampled only after the
/// configured transient time has elapsed (`TransientTime` in SPEC_FULL.md
/// §6.2), matching the source's `stats_enabled` gate.
#[derive(Debug, Default, Clone)]
pub struct TerminalStats {
    pub bytes_delivered: u64,
    pub packets_delivered: u64,
    pub packets_dropped_retry: u64,
    pub packets_dropped_queue: u64,
    pub packets_attempted: u64,
    pub delay_sum_secs: f64,
    pub delay_sumsq_secs: f64,
    pub queue_len_sample_sum: f64,
    pub queue_len_sample_count: u64,
}

impl TerminalStats {
    pub fn record_delivery(&mut self, bytes: u32, delay_secs: f64) {
        self.bytes_delivered += bytes as u64;
        self.packets_delivered += 1;
        self.delay_sum_secs += delay_secs;
        self.delay_sumsq_secs += delay_secs * delay_secs;
    }

    pub fn record_retry_drop(&mut self) {
        self.packets_dropped_retry += 1;
    }

    pub fn record_queue_drop(&mut self) {
        self.packets_dropped_queue += 1;
    }

    pub fn record_queue_sample(&mut self, len: usize) {
        self.queue_len_sample_sum += len as f64;
        self.queue_len_sample_count += 1;
    }

    pub fn mean_delay_secs(&self) -> f64 {
        if self.packets_delivered == 0 {
            0.0
        } else {
            self.delay_sum_secs / self.packets_delivered as f64
        }
    }

    pub fn mean_queue_len(&self) -> f64 {
        if self.queue_len_sample_count == 0 {
            0.0
        } else {
            self.queue_len_sample_sum / self.queue_len_sample_count as f64
        }
    }

    pub fn throughput_bps(&self, duration_secs: f64) -> f64 {
        if duration_secs <= 0.0 {
            0.0
        } else {
            self.bytes_delivered as f64 * 8.0 / duration_secs
        }
    }
}

pub struct Terminal {
    pub id: TerminalId,
    pub position: Position,
    pub phy: Phy,
    pub mac: Mac,
    pub connections: Vec<Connection>,
    pub stats: TerminalStats,
    pub stats_enabled: bool,
}

impl Terminal {
    pub fn new(id: TerminalId, position: Position, phy: Phy, mac: Mac) -> Self {
        Terminal {
            id,
            position,
            phy,
            mac,
            connections: Vec::new(),
            stats: TerminalStats::default(),
            stats_enabled: false,
        }
    }

    pub fn add_connection(&mut self, connection: Connection) -> usize {
        self.connections.push(connection);
        self.connections.len() - 1
    }

    /// Called once simulated time passes `TransientTime`; statistics
    /// collected before this point are discarded, matching the source's
    /// warm-up exclusion.
    pub fn enable_stats(&mut self) {
        self.stats_enabled = true;
        self.stats = TerminalStats::default();
    }

    pub fn link_adapt_for(&mut self, target: TerminalId) -> Option<&mut LinkAdapt> {
        self.connections
            .iter_mut()
            .find(|c| c.target == target)
            .map(|c| &mut c.link_adapt)
    }

    pub fn queue_len(&self) -> usize {
        self.mac.queue_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linkadapt::{AdaptTarget, LinkAdaptParams, Strategy};
    use crate::mac::MacParams;
    use crate::phy::PhyParams;
    use crate::standard::{Dot11Standard, Mcs};
    use crate::timestamp::Timestamp;

    fn fixed_la(peer: TerminalId) -> LinkAdapt {
        LinkAdapt::new(
            peer,
            Dot11Standard::N,
            LinkAdaptParams {
                strategy: Strategy::Fixed(Mcs::Mcs3),
                adapt: AdaptTarget::Rate,
                power_min_dbm: 0.0,
                power_max_dbm: 20.0,
                power_step_up_db: 1.0,
                power_step_down_db: 1.0,
                target_per: 0.1,
                max_succeed_counter: 5,
                fail_limit: 2,
                use_rx_mode: false,
                adapt_la_thresh: false,
            },
        )
    }

    #[test]
    fn stats_reset_on_enable() {
        let mac = Mac::new(
            TerminalId(0),
            Dot11Standard::N,
            MacParams { rts_threshold: 2312, retry_limit: 7, frag_threshold: 2312, max_queue_size: 50, set_ba_agg: false },
        );
        let phy = Phy::new(TerminalId(0), Dot11Standard::N, PhyParams { noise_variance_dbm: -95.0, cca_sensitivity_dbm: -82.0 });
        let mut term = Terminal::new(TerminalId(0), Position { x: 0.0, y: 0.0 }, phy, mac);
        term.stats.record_delivery(100, 0.01);
        term.enable_stats();
        assert_eq!(term.stats.packets_delivered, 0);
    }

    #[test]
    fn connection_lookup_resolves_link_adapt_by_target() {
        let mac = Mac::new(
            TerminalId(0),
            Dot11Standard::N,
            MacParams { rts_threshold: 2312, retry_limit: 7, frag_threshold: 2312, max_queue_size: 50, set_ba_agg: false },
        );
        let phy = Phy::new(TerminalId(0), Dot11Standard::N, PhyParams { noise_variance_dbm: -95.0, cca_sensitivity_dbm: -82.0 });
        let mut term = Terminal::new(TerminalId(0), Position { x: 0.0, y: 0.0 }, phy, mac);
        let target = TerminalId(1);
        term.add_connection(Connection {
            target,
            ac: Ac::Be,
            traffic: Traffic::new_constant(1000.0, Timestamp::ZERO),
            link_adapt: fixed_la(target),
        });
        assert!(term.link_adapt_for(target).is_some());
        assert!(term.link_adapt_for(TerminalId(9)).is_none());
    }
}
