//! Per-link rate/power adaptation, ported from `original_source/src/link_adapt.cpp`.
//!
//! The source expresses the three algorithms (fixed, OPT, SUBOPT) as one
//! class with a mode tag and a pile of `if (mode == ...)` branches; here
//! `LinkAdapt` holds a `Strategy` enum and dispatches on it directly.

use crate::ids::TerminalId;
use crate::phy::Phy;
use crate::standard::{Dot11Standard, Mcs, TransmissionMode};

/// What `LinkAdapt` adjusts when an algorithm calls for a change: the MCS,
/// or the transmit power, never both at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptTarget {
    Rate,
    Power,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Fixed(Mcs),
    Opt,
    Subopt,
}

/// Default succeed-counter thresholds the source re-enquires with after an
/// `adapt_la_thresh`-triggered reset: a low-mobility value used on first
/// entry, and a more aggressive high-mobility value once re-triggered.
const LOW_MOBILITY_SUCCEED_COUNTER: u32 = 10;
const HIGH_MOBILITY_SUCCEED_COUNTER: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct LinkAdaptParams {
    pub strategy: Strategy,
    pub adapt: AdaptTarget,
    pub power_min_dbm: f64,
    pub power_max_dbm: f64,
    pub power_step_up_db: f64,
    pub power_step_down_db: f64,
    pub target_per: f64,
    pub max_succeed_counter: u32,
    pub fail_limit: u32,
    pub use_rx_mode: bool,
    /// `true` if `max_succeed_counter` should be treated as "enquiry mode"
    /// and re-derived from mobility after each reset, rather than held
    /// fixed at the configured value.
    pub adapt_la_thresh: bool,
}

/// Adaptation state for one direction of one link (`from` -> `to`).
#[derive(Debug)]
pub struct LinkAdapt {
    pub peer: TerminalId,
    standard: Dot11Standard,
    params: LinkAdaptParams,
    current_mode: Mcs,
    power_dbm: f64,
    succeed_counter: u32,
    fail_counter: u32,
    max_succeed_counter: u32,
}

impl LinkAdapt {
    pub fn new(peer: TerminalId, standard: Dot11Standard, params: LinkAdaptParams) -> Self {
        let current_mode = match params.strategy {
            Strategy::Fixed(m) => m,
            Strategy::Opt | Strategy::Subopt => Mcs::Mcs0,
        };
        let max_succeed_counter = params.max_succeed_counter;
        LinkAdapt {
            peer,
            standard,
            params,
            current_mode,
            power_dbm: params.power_max_dbm,
            succeed_counter: 0,
            fail_counter: 0,
            max_succeed_counter,
        }
    }

    /// Current transmission mode for a frame of `nbytes`, consulting the
    /// peer's PHY oracle when in OPT mode.
    pub fn current_mode(&self, peer_phy: &Phy, path_loss_db: f64, nbytes: u32) -> TransmissionMode {
        match self.params.strategy {
            Strategy::Fixed(m) => TransmissionMode::Mcs(m),
            Strategy::Subopt => TransmissionMode::Mcs(self.current_mode),
            Strategy::Opt => TransmissionMode::Mcs(peer_phy.opt_mode(
                path_loss_db,
                nbytes * 8,
                self.params.target_per,
                self.power_dbm,
            )),
        }
    }

    /// Current transmit power, consulting the peer's PHY oracle in OPT mode.
    pub fn current_power(&self, peer_phy: &Phy, path_loss_db: f64, nbytes: u32) -> f64 {
        match self.params.strategy {
            Strategy::Fixed(_) => self.params.power_max_dbm,
            Strategy::Subopt => self.power_dbm,
            Strategy::Opt => peer_phy.opt_power(
                path_loss_db,
                nbytes * 8,
                self.params.target_per,
                self.current_mode,
                self.params.power_min_dbm,
                self.params.power_max_dbm,
                self.params.power_step_up_db,
            ),
        }
    }

    fn enter_enquiry_mode(&mut self) {
        if self.params.max_succeed_counter == 0 {
            self.max_succeed_counter = LOW_MOBILITY_SUCCEED_COUNTER;
        } else if self.params.adapt_la_thresh {
            self.max_succeed_counter = HIGH_MOBILITY_SUCCEED_COUNTER;
        }
    }

    /// ACK timed out: the transmission attempt failed outright.
    pub fn failed(&mut self) {
        if !matches!(self.params.strategy, Strategy::Subopt) {
            return;
        }
        self.fail_counter += 1;
        self.succeed_counter = 0;
        self.enter_enquiry_mode();

        if self.fail_counter >= self.params.fail_limit {
            if self.params.adapt == AdaptTarget::Rate || self.current_mode != Mcs::Mcs0 {
                self.current_mode = self.current_mode.saturating_dec();
            } else {
                self.power_dbm = (self.power_dbm + self.params.power_step_up_db)
                    .min(self.params.power_max_dbm);
            }
            self.fail_counter = 0;
            self.succeed_counter = 0;
        }
    }

    /// CTS timed out. Meaningful only in POWER adapt mode; identical logic
    /// to `failed`.
    pub fn rts_failed(&mut self) {
        self.failed();
    }

    /// ACK received for a fragment; `lastfrag` is true only when it was the
    /// final fragment of the MSDU (adaptation only acts on that signal).
    pub fn success(&mut self, lastfrag: bool) {
        if !matches!(self.params.strategy, Strategy::Subopt) || !lastfrag {
            return;
        }
        self.succeed_counter += 1;
        self.fail_counter = 0;

        if self.succeed_counter >= self.max_succeed_counter.max(1) {
            if self.params.adapt == AdaptTarget::Rate || self.power_dbm <= self.params.power_min_dbm {
                self.current_mode = self.current_mode.saturating_inc(self.standard.max_mcs());
            } else {
                self.power_dbm =
                    (self.power_dbm - self.params.power_step_down_db).max(self.params.power_min_dbm);
            }
            self.succeed_counter = 0;
            if self.params.adapt_la_thresh {
                self.max_succeed_counter = 0;
            }
        }
    }

    /// A data frame was received correctly from the peer at `rx_mode`; jump
    /// up to it immediately if it beats the current mode and `use_rx_mode`
    /// is enabled.
    pub fn rx_success(&mut self, rx_mode: Mcs) {
        if !matches!(self.params.strategy, Strategy::Subopt) || !self.params.use_rx_mode {
            return;
        }
        if rx_mode > self.current_mode {
            self.current_mode = rx_mode;
            self.succeed_counter = 0;
            self.fail_counter = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::{Phy, PhyParams};

    fn subopt_params() -> LinkAdaptParams {
        LinkAdaptParams {
            strategy: Strategy::Subopt,
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
        }
    }

    #[test]
    fn fixed_mode_never_changes() {
        let la = LinkAdapt::new(TerminalId(1), Dot11Standard::N, LinkAdaptParams {
            strategy: Strategy::Fixed(Mcs::Mcs3),
            ..subopt_params()
        });
        let phy = Phy::new(TerminalId(1), Dot11Standard::N, PhyParams {
            noise_variance_dbm: -95.0,
            cca_sensitivity_dbm: -82.0,
        });
        assert_eq!(la.current_mode(&phy, 50.0, 500), TransmissionMode::Mcs(Mcs::Mcs3));
    }

    #[test]
    fn repeated_failure_drops_rate_then_stays_at_mcs0() {
        let mut la = LinkAdapt::new(TerminalId(1), Dot11Standard::N, LinkAdaptParams {
            strategy: Strategy::Subopt,
            ..subopt_params()
        });
        la.current_mode = Mcs::Mcs1;
        la.failed();
        la.failed();
        assert_eq!(la.current_mode, Mcs::Mcs0);
        la.failed();
        la.failed();
        assert_eq!(la.current_mode, Mcs::Mcs0);
    }

    #[test]
    fn repeated_success_raises_rate_up_to_standard_ceiling() {
        let mut la = LinkAdapt::new(TerminalId(1), Dot11Standard::N, LinkAdaptParams {
            strategy: Strategy::Subopt,
            max_succeed_counter: 1,
            ..subopt_params()
        });
        for _ in 0..20 {
            la.success(true);
        }
        assert_eq!(la.current_mode, Dot11Standard::N.max_mcs());
    }

    #[test]
    fn success_only_acts_on_last_fragment() {
        let mut la = LinkAdapt::new(TerminalId(1), Dot11Standard::N, LinkAdaptParams {
            strategy: Strategy::Subopt,
            max_succeed_counter: 1,
            ..subopt_params()
        });
        la.success(false);
        assert_eq!(la.current_mode, Mcs::Mcs0);
    }

    #[test]
    fn rx_success_jumps_up_when_use_rx_mode_enabled() {
        let mut la = LinkAdapt::new(TerminalId(1), Dot11Standard::N, LinkAdaptParams {
            strategy: Strategy::Subopt,
            use_rx_mode: true,
            ..subopt_params()
        });
        la.rx_success(Mcs::Mcs5);
        assert_eq!(la.current_mode, Mcs::Mcs5);
    }
}
