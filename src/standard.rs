//! Per-standard PHY tables, ported exactly from `original_source/src/Standard.cpp`.
//!
//! `TransmissionMode` folds the C++ `transmission_mode` enum (MCS0..MCS9
//! plus the `OPT`/`SUBOPT` adaptation sentinels) into one finite Rust enum,
//! per the Design Notes mandate to encode "dynamic dispatch" fields as
//! tagged enums rather than open hierarchies.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dot11Standard {
    A,
    N,
    Ac,
    Ah,
}

impl Dot11Standard {
    pub fn max_mcs(self) -> Mcs {
        match self {
            Dot11Standard::A | Dot11Standard::N => Mcs::Mcs7,
            Dot11Standard::Ac | Dot11Standard::Ah => Mcs::Mcs8,
        }
    }

    pub fn symbol_period(self) -> f64 {
        if matches!(self, Dot11Standard::Ah) {
            40e-6
        } else {
            4e-6
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "802.11a" => Some(Dot11Standard::A),
            "802.11n" => Some(Dot11Standard::N),
            "802.11ac" => Some(Dot11Standard::Ac),
            "802.11ah" => Some(Dot11Standard::Ah),
            _ => None,
        }
    }
}

impl fmt::Display for Dot11Standard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dot11Standard::A => "802.11a",
            Dot11Standard::N => "802.11n",
            Dot11Standard::Ac => "802.11ac",
            Dot11Standard::Ah => "802.11ah",
        };
        write!(f, "{s}")
    }
}

/// A concrete modulation and coding scheme, 0 through 9 (not all standards
/// support the full range — `Dot11Standard::max_mcs` bounds it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mcs {
    Mcs0,
    Mcs1,
    Mcs2,
    Mcs3,
    Mcs4,
    Mcs5,
    Mcs6,
    Mcs7,
    Mcs8,
    Mcs9,
}

impl Mcs {
    const ORDER: [Mcs; 10] = [
        Mcs::Mcs0,
        Mcs::Mcs1,
        Mcs::Mcs2,
        Mcs::Mcs3,
        Mcs::Mcs4,
        Mcs::Mcs5,
        Mcs::Mcs6,
        Mcs::Mcs7,
        Mcs::Mcs8,
        Mcs::Mcs9,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|m| *m == self).unwrap()
    }

    /// Saturating decrement, clamped at `Mcs0`.
    pub fn saturating_dec(self) -> Mcs {
        let i = self.index();
        Self::ORDER[i.saturating_sub(1)]
    }

    /// Saturating increment, clamped at `max` (the standard's max MCS).
    ///
    /// The source's `++` operator had a malformed guard
    /// (`(tm <= SUBOPT || MCS9)`, always true on the right side) that let it
    /// walk past the standard's real ceiling; this clamps correctly per the
    /// spec's resolved Open Question.
    pub fn saturating_inc(self, max: Mcs) -> Mcs {
        let i = self.index();
        let next = Self::ORDER.get(i + 1).copied().unwrap_or(self);
        if next.index() > max.index() {
            max
        } else {
            next
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "MCS0" => Mcs::Mcs0,
            "MCS1" => Mcs::Mcs1,
            "MCS2" => Mcs::Mcs2,
            "MCS3" => Mcs::Mcs3,
            "MCS4" => Mcs::Mcs4,
            "MCS5" => Mcs::Mcs5,
            "MCS6" => Mcs::Mcs6,
            "MCS7" => Mcs::Mcs7,
            "MCS8" => Mcs::Mcs8,
            "MCS9" => Mcs::Mcs9,
            _ => return None,
        })
    }
}

impl fmt::Display for Mcs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MCS{}", self.index())
    }
}

/// Transmission mode carried by an MPDU: either a concrete MCS, or one of
/// the two link-adaptation sentinels that mean "ask LinkAdapt" rather than
/// naming a fixed rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransmissionMode {
    Mcs(Mcs),
    Opt,
    Subopt,
}

impl fmt::Display for TransmissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmissionMode::Mcs(m) => write!(f, "{m}"),
            TransmissionMode::Opt => write!(f, "OPT"),
            TransmissionMode::Subopt => write!(f, "SUBOPT"),
        }
    }
}

impl TransmissionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPT" => Some(TransmissionMode::Opt),
            "SUBOPT" => Some(TransmissionMode::Subopt),
            other => Mcs::parse(other).map(TransmissionMode::Mcs),
        }
    }
}

/// Mbps for each MCS, per standard (`Standard::tx_mode_to_double`).
pub fn tx_mode_to_double(std: Dot11Standard, mcs: Mcs) -> f64 {
    use Mcs::*;
    match std {
        Dot11Standard::A => match mcs {
            Mcs0 => 6.0,
            Mcs1 => 9.0,
            Mcs2 => 12.0,
            Mcs3 => 18.0,
            Mcs4 => 24.0,
            Mcs5 => 36.0,
            Mcs6 => 48.0,
            Mcs7 => 54.0,
            _ => panic!("MCS not supported by 802.11a"),
        },
        Dot11Standard::N => match mcs {
            Mcs0 => 6.5,
            Mcs1 => 13.0,
            Mcs2 => 19.5,
            Mcs3 => 26.0,
            Mcs4 => 39.0,
            Mcs5 => 52.0,
            Mcs6 => 58.5,
            Mcs7 => 65.0,
            _ => panic!("MCS not supported by 802.11n"),
        },
        Dot11Standard::Ac => match mcs {
            Mcs0 => 6.5,
            Mcs1 => 13.0,
            Mcs2 => 19.5,
            Mcs3 => 26.0,
            Mcs4 => 39.0,
            Mcs5 => 52.0,
            Mcs6 => 58.5,
            Mcs7 => 65.0,
            Mcs8 => 78.0,
            _ => panic!("MCS not supported by 802.11ac"),
        },
        Dot11Standard::Ah => match mcs {
            Mcs0 => 0.65,
            Mcs1 => 1.30,
            Mcs2 => 1.95,
            Mcs3 => 2.60,
            Mcs4 => 3.90,
            Mcs5 => 5.20,
            Mcs6 => 5.85,
            Mcs7 => 6.50,
            Mcs8 => 7.80,
            _ => panic!("MCS not supported by 802.11ah"),
        },
    }
}

/// OFDM bits-per-symbol for each MCS, per standard.
pub fn bits_per_symbol(std: Dot11Standard, mcs: Mcs) -> u32 {
    use Mcs::*;
    match std {
        Dot11Standard::A => match mcs {
            Mcs0 => 24,
            Mcs1 => 36,
            Mcs2 => 48,
            Mcs3 => 72,
            Mcs4 => 96,
            Mcs5 => 144,
            Mcs6 => 192,
            Mcs7 => 216,
            _ => 0,
        },
        Dot11Standard::N | Dot11Standard::Ac | Dot11Standard::Ah => match mcs {
            Mcs0 => 26,
            Mcs1 => 52,
            Mcs2 => 78,
            Mcs3 => 104,
            Mcs4 => 156,
            Mcs5 => 208,
            Mcs6 => 234,
            Mcs7 => 260,
            Mcs8 => 312,
            _ => 0,
        },
    }
}

fn mcs_index(mcs: Mcs) -> usize {
    match mcs {
        Mcs::Mcs0 => 0,
        Mcs::Mcs1 => 1,
        Mcs::Mcs2 => 2,
        Mcs::Mcs3 => 3,
        Mcs::Mcs4 => 4,
        Mcs::Mcs5 => 5,
        Mcs::Mcs6 => 6,
        Mcs::Mcs7 => 7,
        Mcs::Mcs8 => 8,
        Mcs::Mcs9 => 8, // MCS9 only exists for ac/ah as an extension; tables top out at index 8.
    }
}

const MIN_THRESH_A: [f64; 8] = [
    -2.5103, 0.75061, 0.5000, 3.7609, 5.5103, 9.2712, 12.5206, 14.5321,
];
const MAX_THRESH_A: [f64; 8] = [
    1.9897, 5.2506, 5.0000, 8.2609, 10.5103, 14.7712, 18.5206, 20.0321,
];
const COEFF_A: [[f64; 5]; 8] = [
    [-2.2353000, -1.0721000, -0.1708900, 0.0243860, 0.0096656],
    [-0.3624500, -0.2937100, -0.0011057, -0.0408500, 0.0038022],
    [-0.4517200, -0.3560888, 0.0627930, -0.0651410, 0.0064799],
    [-0.3082200, -0.2063400, 0.1547100, -0.0389730, 0.0018157],
    [2.6965000, -1.9353000, 0.4736600, -0.0509360, 0.0016224],
    [34.8692000, -13.9070000, 2.0328000, -0.1283100, 0.0028499],
    [93.9622000, -26.7075000, 2.8106000, -0.1290100, 0.0021372],
    [-120.1972000, 26.3772000, -2.1564000, 0.0787190, -0.0011189],
];
const COEFF_HIGH_A: [[f64; 2]; 8] = [
    [-2.3974, -1.1580],
    [2.8250, -1.4824],
    [2.1138, -1.3738],
    [7.7079, -1.5347],
    [9.2576, -1.3244],
    [11.3789, -1.1004],
    [14.6479, -1.0454],
    [20.0742, -1.2278],
];

const MIN_THRESH_N: [f64; 8] = [
    -2.5103, 0.5000, 3.7609, 5.5103, 9.2712, 12.5206, 14.5321, 11.6188,
];
const MAX_THRESH_N: [f64; 8] = [
    1.9897, 5.0000, 8.2609, 10.5103, 14.7712, 18.5206, 20.0321, 21.5000,
];
const COEFF_N: [[f64; 5]; 8] = [
    [-2.2353000, -1.0721000, -0.1708900, 0.0243860, 0.0096656],
    [-0.4517200, -0.3560888, 0.0627930, -0.0651410, 0.0064799],
    [-0.3082200, -0.2063400, 0.1547100, -0.0389730, 0.0018157],
    [2.6965000, -1.9353000, 0.4736600, -0.0509360, 0.0016224],
    [34.8692000, -13.9070000, 2.0328000, -0.1283100, 0.0028499],
    [93.9622000, -26.7075000, 2.8106000, -0.1290100, 0.0021372],
    [-120.1972000, 26.3772000, -2.1564000, 0.0787190, -0.0011189],
    [-42.9748720, 11.0385340, -1.0249930, 0.0411790, -0.0006080],
];
const COEFF_HIGH_N: [[f64; 2]; 8] = [
    [-2.3974, -1.1580],
    [2.1138, -1.3738],
    [7.7079, -1.5347],
    [9.2576, -1.3244],
    [11.3789, -1.1004],
    [14.6479, -1.0454],
    [20.0742, -1.2278],
    [21.2886, -1.2977],
];

const MIN_THRESH_AC_AH: [f64; 9] = [
    -2.5103, 0.5000, 3.7609, 5.5103, 9.2712, 12.5206, 14.5321, 11.6188, 15.4106,
];
const MAX_THRESH_AC_AH: [f64; 9] = [
    1.9897, 5.0000, 8.2609, 10.5103, 14.7712, 18.5206, 20.0321, 21.5000, 22.5000,
];
const COEFF_AC_AH: [[f64; 5]; 9] = [
    [-2.2353000, -1.0721000, -0.1708900, 0.0243860, 0.0096656],
    [-0.4517200, -0.3560888, 0.0627930, -0.0651410, 0.0064799],
    [-0.3082200, -0.2063400, 0.1547100, -0.0389730, 0.0018157],
    [2.6965000, -1.9353000, 0.4736600, -0.0509360, 0.0016224],
    [34.8692000, -13.9070000, 2.0328000, -0.1283100, 0.0028499],
    [93.9622000, -26.7075000, 2.8106000, -0.1290100, 0.0021372],
    [-120.1972000, 26.3772000, -2.1564000, 0.0787190, -0.0011189],
    [-42.9748720, 11.0385340, -1.0249930, 0.0411790, -0.0006080],
    [-159.279240, 33.9061380, -2.6679000, 0.0922430, -0.0011850],
];
const COEFF_HIGH_AC_AH: [[f64; 2]; 9] = [
    [-2.3974, -1.1580],
    [2.1138, -1.3738],
    [7.7079, -1.5347],
    [9.2576, -1.3244],
    [11.3789, -1.1004],
    [14.6479, -1.0454],
    [20.0742, -1.2278],
    [21.2886, -1.2977],
    [18.1224, -0.9725],
];

/// The (min_thresh, max_thresh, mid-range coefficients, high-range
/// coefficients) quadruple used by the BER error model for one MCS under
/// one standard.
pub fn ber_params(std: Dot11Standard, mcs: Mcs) -> (f64, f64, [f64; 5], [f64; 2]) {
    let idx = mcs_index(mcs);
    match std {
        Dot11Standard::A => (
            MIN_THRESH_A[idx],
            MAX_THRESH_A[idx],
            COEFF_A[idx],
            COEFF_HIGH_A[idx],
        ),
        Dot11Standard::N => (
            MIN_THRESH_N[idx],
            MAX_THRESH_N[idx],
            COEFF_N[idx],
            COEFF_HIGH_N[idx],
        ),
        Dot11Standard::Ac | Dot11Standard::Ah => (
            MIN_THRESH_AC_AH[idx],
            MAX_THRESH_AC_AH[idx],
            COEFF_AC_AH[idx],
            COEFF_HIGH_AC_AH[idx],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mcs_saturates_at_standard_ceiling() {
        let std = Dot11Standard::A;
        let max = std.max_mcs();
        assert_eq!(max, Mcs::Mcs7);
        assert_eq!(Mcs::Mcs7.saturating_inc(max), Mcs::Mcs7);
        assert_eq!(Mcs::Mcs0.saturating_dec(), Mcs::Mcs0);
    }

    #[test]
    fn ac_rate_table_is_monotone_in_mcs() {
        let rates: Vec<f64> = [
            Mcs::Mcs0,
            Mcs::Mcs1,
            Mcs::Mcs2,
            Mcs::Mcs3,
            Mcs::Mcs4,
            Mcs::Mcs5,
            Mcs::Mcs6,
            Mcs::Mcs7,
            Mcs::Mcs8,
        ]
        .iter()
        .map(|m| tx_mode_to_double(Dot11Standard::Ac, *m))
        .collect();
        for w in rates.windows(2) {
            assert!(w[1] > w[0]);
        }
    }

    #[test]
    fn transmission_mode_round_trips_through_display_and_parse() {
        for tm in [
            TransmissionMode::Opt,
            TransmissionMode::Subopt,
            TransmissionMode::Mcs(Mcs::Mcs3),
        ] {
            let s = tm.to_string();
            assert_eq!(TransmissionMode::parse(&s), Some(tm));
        }
    }

    #[test]
    fn symbol_period_is_longer_for_ah() {
        assert!(Dot11Standard::Ah.symbol_period() > Dot11Standard::N.symbol_period());
    }
}
