//! Physical layer: carrier sense, half-duplex busy gating, and the
//! SNR-to-PER error model. Ported from `original_source/src/PHY.cpp`.
//!
//! The source calls back into its paired `MAC` directly (`mymac->phyCCA_busy()`,
//! `mymac->phyRxEndInd(pck)`). Rather than give `Phy` a back-pointer to its
//! owning terminal's MAC, every notification point here returns a plain
//! value describing what happened; `Terminal`/`Simulation` drive the MAC
//! from that return value. This keeps ownership a simple tree instead of a
//! cycle.

use crate::ids::TerminalId;
use crate::packet::Mpdu;
use crate::rng::Mt19937;
use crate::standard::{ber_params, Dot11Standard, Mcs, TransmissionMode};
use crate::timestamp::Timestamp;

/// Burst length used by the PER-from-BER conversion, `1 - (1 - ber/L)^nbits`.
const BURST_LENGTH: f64 = 3.3;

#[derive(Debug, Clone, Copy)]
pub struct PhyParams {
    pub noise_variance_dbm: f64,
    pub cca_sensitivity_dbm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReceiveOutcome {
    /// Received power fell below the receiver's sensitivity floor.
    BelowSensitivity,
    /// The transceiver was already transmitting or receiving another frame
    /// that overlaps this one in time (half-duplex collision).
    TransceiverBusy,
    /// The frame was decoded successfully and should be handed to the MAC.
    Received,
    /// The frame's simulated bit errors caused it to fail decoding.
    Corrupted { snir_db: f64, per: f64 },
}

#[derive(Debug)]
pub struct Phy {
    pub id: TerminalId,
    pub standard: Dot11Standard,
    params: PhyParams,
    busy_begin: Timestamp,
    busy_end: Timestamp,
    energy_joules: f64,
}

impl Phy {
    pub fn new(id: TerminalId, standard: Dot11Standard, params: PhyParams) -> Self {
        Phy {
            id,
            standard,
            params,
            busy_begin: Timestamp::ZERO,
            busy_end: Timestamp::ZERO,
            energy_joules: 0.0,
        }
    }

    pub fn energy_joules(&self) -> f64 {
        self.energy_joules
    }

    /// Bit error rate for `mode` at the given SNR, using the three-regime
    /// polynomial model (floor at low SNR, mid-range polynomial, high-range
    /// polynomial), per `Standard::ber_params`.
    pub fn calculate_ber(&self, mode: Mcs, snr_db: f64) -> f64 {
        let (min_thresh, max_thresh, coeff, coeff_high) = ber_params(self.standard, mode);

        if snr_db < min_thresh {
            0.5
        } else if snr_db > max_thresh {
            let mut berlog = 0.0;
            let mut auxpow = 1.0;
            for c in coeff_high {
                berlog += auxpow * c;
                auxpow *= snr_db;
            }
            10f64.powf(berlog)
        } else {
            let mut berlog = 0.0;
            let mut auxpow = 1.0;
            for c in coeff {
                berlog += auxpow * c;
                auxpow *= snr_db;
            }
            10f64.powf(berlog)
        }
    }

    fn per_from_ber(&self, mode: Mcs, snr_db: f64, nbits: u32) -> f64 {
        let ber = self.calculate_ber(mode, snr_db);
        1.0 - (1.0 - ber / BURST_LENGTH).powi(nbits as i32)
    }

    /// Returns true if the channel is sensed busy (interference at or above
    /// CCA sensitivity).
    pub fn carrier_sensing(&self, interf_dbm: f64) -> bool {
        interf_dbm >= self.params.cca_sensitivity_dbm
    }

    /// Walks MCS down from the standard's ceiling until the predicted PER
    /// for `pack_nbits` at `power_dbm` (given `path_loss_db` to the
    /// target) is at or below `per_target`, stopping at MCS0 regardless.
    pub fn opt_mode(
        &self,
        path_loss_db: f64,
        pack_nbits: u32,
        per_target: f64,
        power_dbm: f64,
    ) -> Mcs {
        let mut mode = self.standard.max_mcs();
        let snr = power_dbm - path_loss_db - self.params.noise_variance_dbm;

        loop {
            if mode == Mcs::Mcs0 {
                break;
            }
            let per = self.per_from_ber(mode, snr, pack_nbits);
            if per <= per_target {
                break;
            }
            mode = mode.saturating_dec();
        }
        mode
    }

    /// Walks transmit power up from `pmin` in `pstep` increments until the
    /// predicted PER at `mode` is at or below `per_target` or `pmax` is
    /// reached.
    pub fn opt_power(
        &self,
        path_loss_db: f64,
        pack_nbits: u32,
        per_target: f64,
        mode: Mcs,
        pmin: f64,
        pmax: f64,
        pstep: f64,
    ) -> f64 {
        let att = path_loss_db + self.params.noise_variance_dbm;
        let mut power = pmin;

        loop {
            let snr = power - att;
            if power >= pmax {
                break;
            }
            let per = self.per_from_ber(mode, snr, pack_nbits);
            if per <= per_target {
                break;
            }
            power += pstep;
        }
        power
    }

    /// Simulates reception of `pck`, which arrived with the given path loss
    /// (dB) and accumulated interference (mW, linear — 0 means none).
    pub fn receive(
        &mut self,
        pck: &Mpdu,
        path_loss_db: f64,
        interf_mw: f64,
        now: Timestamp,
        rng: &mut Mt19937,
    ) -> ReceiveOutcome {
        let power_dbm = power_of(pck);
        let rx_pow = power_dbm - path_loss_db;

        if rx_pow < self.params.cca_sensitivity_dbm {
            return ReceiveOutcome::BelowSensitivity;
        }

        let duration = Timestamp::from_secs(pck.duration).unwrap_or(Timestamp::ZERO);
        let busy_start = now.checked_sub(duration).unwrap_or(Timestamp::ZERO);

        let overlaps_existing = (busy_start < self.busy_end && busy_start > self.busy_begin)
            || (now < self.busy_end && now > self.busy_begin);
        if overlaps_existing {
            return ReceiveOutcome::TransceiverBusy;
        }

        self.busy_end = now;
        self.busy_begin = busy_start;

        let noise_interf_var = if interf_mw > 0.0 {
            10.0 * (interf_mw + 10f64.powf(self.params.noise_variance_dbm / 10.0)).log10()
        } else {
            self.params.noise_variance_dbm
        };

        let snir = rx_pow - noise_interf_var;
        let mode = match pck.mode {
            TransmissionMode::Mcs(m) => m,
            TransmissionMode::Opt | TransmissionMode::Subopt => Mcs::Mcs0,
        };
        let per = self.per_from_ber(mode, snir, pck.nbits());

        if rng.uniform01() > per {
            ReceiveOutcome::Received
        } else {
            ReceiveOutcome::Corrupted { snir_db: snir, per }
        }
    }

    /// Marks the transceiver busy for the duration of an outbound
    /// transmission and accrues its energy cost.
    pub fn phy_tx_start_req(&mut self, pck: &Mpdu, now: Timestamp) {
        self.busy_begin = now;
        self.busy_end = now.plus_ticks((pck.duration / crate::timestamp::TIME_UNIT) as u64);
        self.energy_joules += pck.duration * 10f64.powf(power_of(pck) / 10.0);
    }
}

fn power_of(pck: &Mpdu) -> f64 {
    pck.tx_power_dbm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    fn phy() -> Phy {
        Phy::new(
            TerminalId(0),
            Dot11Standard::N,
            PhyParams {
                noise_variance_dbm: -95.0,
                cca_sensitivity_dbm: -82.0,
            },
        )
    }

    #[test]
    fn ber_is_floor_at_low_snr() {
        let p = phy();
        assert_eq!(p.calculate_ber(Mcs::Mcs0, -100.0), 0.5);
    }

    #[test]
    fn ber_decreases_with_snr() {
        let p = phy();
        let low = p.calculate_ber(Mcs::Mcs0, 2.0);
        let high = p.calculate_ber(Mcs::Mcs0, 20.0);
        assert!(high <= low);
    }

    #[test]
    fn opt_mode_never_exceeds_standard_ceiling() {
        let p = phy();
        let mode = p.opt_mode(50.0, 1000, 0.1, 20.0);
        assert!(mode <= p.standard.max_mcs());
    }

    #[test]
    fn opt_power_stops_at_pmax() {
        let p = phy();
        let power = p.opt_power(200.0, 1000, 1e-12, Mcs::Mcs7, 0.0, 10.0, 1.0);
        assert!(power <= 10.0 + 1e-9);
    }

    #[test]
    fn receive_below_sensitivity_is_ignored() {
        let mut p = phy();
        let mut rng = Mt19937::new(1);
        let pck = Mpdu {
            id: crate::ids::PacketId::default(),
            packet_type: PacketType::Data,
            source: TerminalId(1),
            target: TerminalId(0),
            size_bytes: 100,
            mode: TransmissionMode::Mcs(Mcs::Mcs0),
            duration: 1e-4,
            tx_power_dbm: -10.0,
            nav: Timestamp::ZERO,
            acked_ids: Vec::new(),
        };
        let outcome = p.receive(&pck, 200.0, 0.0, Timestamp::ZERO, &mut rng);
        assert_eq!(outcome, ReceiveOutcome::BelowSensitivity);
    }
}
