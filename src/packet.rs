//! Frame types and duration calculations, ported from `original_source/src/Packet.cpp`.
//!
//! The source spreads these across `Packet`/`MSDU`/`MPDU`/`DataMPDU` with a
//! small inheritance chain; here they are plain structs composed by value,
//! with `PacketType` as the finite tag that used to be virtual dispatch.

use crate::ids::{PacketId, PacketIdGen, TerminalId};
use crate::standard::{bits_per_symbol, Dot11Standard, TransmissionMode};
use crate::timestamp::Timestamp;

/// Per-frame-type byte overhead (MAC header + FCS), in bytes, used by
/// `calc_duration`.
const OVERHEAD_DATA: u32 = 28;
const OVERHEAD_ACK: u32 = 14;
const OVERHEAD_RTS: u32 = 20;
const OVERHEAD_CTS: u32 = 14;
const OVERHEAD_BA: u32 = 20;
const MPDU_DELIMITER: u32 = 4;
const SERVICE_FIELD: u32 = 2;
const PHY_OVERHEAD: u32 = 5;
const CODING_OVERHEAD: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Data,
    Ack,
    Rts,
    Cts,
    Ba,
    Dummy,
}

impl PacketType {
    fn overhead_bytes(self) -> u32 {
        match self {
            PacketType::Data => OVERHEAD_DATA,
            PacketType::Ack => OVERHEAD_ACK,
            PacketType::Rts => OVERHEAD_RTS,
            PacketType::Cts => OVERHEAD_CTS,
            PacketType::Ba => OVERHEAD_BA,
            PacketType::Dummy => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckPolicy {
    NoAck,
    NormalAck,
    BlockAck,
}

/// A MAC service data unit handed down from the traffic generator: a
/// logical application payload before fragmentation.
#[derive(Debug, Clone)]
pub struct Msdu {
    pub id: PacketId,
    pub size_bytes: u32,
    pub generated_at: Timestamp,
}

/// One over-the-air protocol data unit: either a data fragment or a
/// control/management frame (ACK/RTS/CTS/BlockAck).
#[derive(Debug, Clone)]
pub struct Mpdu {
    pub id: PacketId,
    pub packet_type: PacketType,
    pub source: TerminalId,
    pub target: TerminalId,
    pub size_bytes: u32,
    pub mode: TransmissionMode,
    pub duration: f64,
    /// Transmit power assigned by link adaptation (or the sender's fixed
    /// power), in dBm.
    pub tx_power_dbm: f64,
    /// Reserved-time (NAV) field: how long this frame asks other stations
    /// to defer, relative to the scheduler clock at arrival.
    pub nav: Timestamp,
    /// PacketIDs acknowledged by a BlockAck frame; empty for every other
    /// packet type.
    pub acked_ids: Vec<PacketId>,
}

/// A data MPDU additionally carries fragmentation bookkeeping and the
/// MSDU it was cut from, for reassembly accounting and retry tracking.
#[derive(Debug, Clone)]
pub struct DataMpdu {
    pub mpdu: Mpdu,
    pub msdu_id: PacketId,
    pub fragment_index: u32,
    pub fragment_count: u32,
    pub ack_policy: AckPolicy,
    pub retries: u32,
}

impl DataMpdu {
    pub fn is_last_fragment(&self) -> bool {
        self.fragment_index + 1 == self.fragment_count
    }
}

impl Mpdu {
    pub fn nbits(&self) -> u32 {
        self.size_bytes * 8
    }
}

/// Splits an MSDU into `ceil(size_bytes / frag_threshold)` data MPDUs, each
/// carrying at most `frag_threshold` bytes of payload plus the data
/// overhead, per the source's fragmentation rule.
#[allow(clippy::too_many_arguments)]
pub fn fragment(
    id_gen: &mut PacketIdGen,
    msdu: &Msdu,
    frag_threshold: u32,
    mode: TransmissionMode,
    std: Dot11Standard,
    ack_policy: AckPolicy,
    tx_power_dbm: f64,
    source: TerminalId,
    target: TerminalId,
) -> Vec<DataMpdu> {
    let count = msdu.size_bytes.div_ceil(frag_threshold).max(1);
    let mut out = Vec::with_capacity(count as usize);
    let mut remaining = msdu.size_bytes;
    for idx in 0..count {
        let payload = remaining.min(frag_threshold);
        remaining -= payload;
        let size_bytes = payload + OVERHEAD_DATA + if ack_policy == AckPolicy::BlockAck { MPDU_DELIMITER } else { 0 };
        let duration = calc_duration(size_bytes * 8, mode, std, true);
        out.push(DataMpdu {
            mpdu: Mpdu {
                id: id_gen.next(),
                packet_type: PacketType::Data,
                source,
                target,
                size_bytes,
                mode,
                duration,
                tx_power_dbm,
                nav: Timestamp::ZERO,
                acked_ids: Vec::new(),
            },
            msdu_id: msdu.id,
            fragment_index: idx,
            fragment_count: count,
            ack_policy,
            retries: 0,
        });
    }
    out
}

/// Builds a zero-payload control frame (ACK, RTS, CTS, BlockAck) of the
/// given type at the given mode.
#[allow(clippy::too_many_arguments)]
pub fn control_frame(
    id_gen: &mut PacketIdGen,
    packet_type: PacketType,
    mode: TransmissionMode,
    std: Dot11Standard,
    tx_power_dbm: f64,
    source: TerminalId,
    target: TerminalId,
    nav: Timestamp,
) -> Mpdu {
    let size_bytes = packet_type.overhead_bytes();
    let duration = calc_duration(size_bytes * 8, mode, std, true);
    Mpdu {
        id: id_gen.next(),
        packet_type,
        source,
        target,
        size_bytes,
        mode,
        duration,
        tx_power_dbm,
        nav,
        acked_ids: Vec::new(),
    }
}

/// Over-the-air duration of `nbits` of payload at the given mode, including
/// PLCP preamble/header when `add_preamble` is set (it is skipped for the
/// aggregated portion of a TXOP burst that shares one preamble).
pub fn calc_duration(
    nbits: u32,
    mode: TransmissionMode,
    std: Dot11Standard,
    add_preamble: bool,
) -> f64 {
    let mcs = match mode {
        TransmissionMode::Mcs(m) => m,
        // Control frames and fragments queued before adaptation resolves a
        // concrete rate fall back to the standard's base MCS for sizing
        // purposes; the real rate is substituted once LinkAdapt picks one.
        TransmissionMode::Opt | TransmissionMode::Subopt => crate::standard::Mcs::Mcs0,
    };

    let bps = bits_per_symbol(std, mcs) as f64;
    let symbol_period = std.symbol_period();
    let total_bits = nbits + SERVICE_FIELD * 8 + MPDU_DELIMITER * 8 + CODING_OVERHEAD;
    let nsymbols = (total_bits as f64 / bps).ceil();

    let preamble = if add_preamble {
        PHY_OVERHEAD as f64 * 1e-6
    } else {
        0.0
    };

    preamble + nsymbols * symbol_period
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard::Mcs;

    #[test]
    fn fragmenting_below_threshold_yields_one_fragment() {
        let mut ids = PacketIdGen::default();
        let msdu = Msdu {
            id: ids.next(),
            size_bytes: 100,
            generated_at: Timestamp::ZERO,
        };
        let frags = fragment(
            &mut ids,
            &msdu,
            1500,
            TransmissionMode::Mcs(Mcs::Mcs0),
            Dot11Standard::A,
            AckPolicy::NormalAck,
            15.0,
            TerminalId(0),
            TerminalId(1),
        );
        assert_eq!(frags.len(), 1);
        assert!(frags[0].is_last_fragment());
    }

    #[test]
    fn fragmenting_above_threshold_splits_evenly() {
        let mut ids = PacketIdGen::default();
        let msdu = Msdu {
            id: ids.next(),
            size_bytes: 3000,
            generated_at: Timestamp::ZERO,
        };
        let frags = fragment(
            &mut ids,
            &msdu,
            1500,
            TransmissionMode::Mcs(Mcs::Mcs0),
            Dot11Standard::A,
            AckPolicy::NormalAck,
            15.0,
            TerminalId(0),
            TerminalId(1),
        );
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].fragment_index, 0);
        assert_eq!(frags[1].fragment_index, 1);
        assert!(!frags[0].is_last_fragment());
        assert!(frags[1].is_last_fragment());
    }

    #[test]
    fn higher_mcs_yields_shorter_duration() {
        let slow = calc_duration(1200, TransmissionMode::Mcs(Mcs::Mcs0), Dot11Standard::N, true);
        let fast = calc_duration(1200, TransmissionMode::Mcs(Mcs::Mcs7), Dot11Standard::N, true);
        assert!(fast < slow);
    }

    #[test]
    fn skipping_preamble_shortens_duration() {
        let with = calc_duration(1200, TransmissionMode::Mcs(Mcs::Mcs0), Dot11Standard::N, true);
        let without = calc_duration(1200, TransmissionMode::Mcs(Mcs::Mcs0), Dot11Standard::N, false);
        assert!(without < with);
    }
}
