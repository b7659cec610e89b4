//! Config file parser and parameter-sweep odometer, ported from
//! `original_source/src/Parameters.cpp`.
//!
//! The source's `param_vec_<T>` template holds one value list per key and
//! advances like an odometer on `next()`; here `SweepAxis` plays the same
//! role as a plain `Vec<T>` plus a cursor, and `ParamSet::advance` drives
//! the whole table the same way, with `Seed` pinned as the fastest-moving
//! axis per SPEC_FULL.md §6.1.

use std::collections::HashMap;
use std::path::Path;

use crate::error::SimError;
use crate::mac::Ac;
use crate::standard::{Dot11Standard, TransmissionMode};
use crate::traffic::{ArrivalProcess, PacketLengthEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Setup,
    Phy,
    Mac,
    Channel,
    Traffic,
    Adapt,
    Debug,
}

impl LogCategory {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "SETUP" => Some(LogCategory::Setup),
            "PHY" => Some(LogCategory::Phy),
            "MAC" => Some(LogCategory::Mac),
            "CHANNEL" => Some(LogCategory::Channel),
            "TRAFFIC" => Some(LogCategory::Traffic),
            "ADAPT" => Some(LogCategory::Adapt),
            "DEBUG" => Some(LogCategory::Debug),
            _ => None,
        }
    }
}

/// One named, possibly multi-valued config line. Every value list becomes
/// an independent sweep axis; `config.rs` never collapses a single-valued
/// list early, so `ParamSet` can treat "one value" and "a sweep of one"
/// identically.
#[derive(Debug, Clone)]
struct RawEntry {
    line: usize,
    values: Vec<String>,
}

/// Full parsed configuration: one concrete scalar value per key, selected
/// by the current position of the sweep odometer.
#[derive(Debug, Clone)]
pub struct ScenarioParams {
    pub seed: u32,
    pub max_sim_time_secs: f64,
    pub transient_time_secs: f64,
    pub confidence: f64,
    pub temp_output_interval_secs: f64,
    pub number_aps: usize,
    pub number_stas: usize,
    pub ap_positions: Vec<(f64, f64)>,
    pub radius: f64,
    pub packet_lengths: Vec<PacketLengthEntry>,
    pub data_rate_mbps: f64,
    pub arrival_process: ArrivalProcess,
    pub uplink_factor: f64,
    pub downlink_factor: f64,
    pub loss_exponent: f64,
    pub ref_loss_db: f64,
    pub noise_variance_dbm: f64,
    pub cca_sensitivity_dbm: f64,
    pub doppler_spread_hz: f64,
    pub number_sinus: usize,
    pub tx_mode: TransmissionMode,
    pub adapt_mode: AdaptModeParam,
    pub target_per: f64,
    pub tx_power_max_dbm: f64,
    pub tx_power_min_dbm: f64,
    pub tx_power_step_up_db: f64,
    pub tx_power_step_down_db: f64,
    pub la_max_succeed_counter: u32,
    pub la_fail_limit: u32,
    pub use_rx_mode: bool,
    pub rts_threshold: u32,
    pub retry_limit: u32,
    pub fragmentation_threshold: u32,
    pub queue_size: usize,
    pub pp_ac: HashMap<Ac, f64>,
    pub set_ba_agg: bool,
    pub standard: Dot11Standard,
    pub log_categories: Vec<LogCategory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptModeParam {
    Rate,
    Power,
}

/// A single config key's value list plus the odometer cursor over it.
#[derive(Debug, Clone)]
struct SweepAxis {
    values: Vec<String>,
    cursor: usize,
}

impl SweepAxis {
    fn current(&self) -> &str {
        &self.values[self.cursor]
    }

    /// Advances the cursor; returns `true` if it wrapped back to the
    /// start (signalling the caller to carry into the next slower axis),
    /// matching `param_vec_<T>::next()`'s `false`-means-wrapped contract
    /// inverted into a plain boolean "did wrap" flag.
    fn advance(&mut self) -> bool {
        self.cursor += 1;
        if self.cursor >= self.values.len() {
            self.cursor = 0;
            true
        } else {
            false
        }
    }
}

/// The full config file, parsed once, driven through every combination of
/// its sweep axes by `next_combination`.
pub struct Config {
    axes: HashMap<String, SweepAxis>,
    /// Order axes carry in, slowest first; `Seed` is always last (fastest).
    carry_order: Vec<String>,
    exhausted: bool,
    first: bool,
}

const RECOGNIZED_KEYS: &[&str] = &[
    "Seed", "MaxSimTime", "TransientTime", "Confidence", "TempOutputInterval",
    "NumberAPs", "NumberStas", "Radius", "PacketLength", "DataRate", "ArrivalTime",
    "UplinkFactor", "DownlinkFactor", "LossExponent", "RefLoss_dB", "NoiseVariance_dBm",
    "CCASensitivity_dBm", "DopplerSpread_Hz", "NumberSinus", "TxMode", "AdaptMode",
    "TargetPER", "TxPowerMax_dBm", "TxPowerMin_dBm", "TxPowerStepUp_dBm", "TxPowerStepDown_dBm",
    "LAMaxSucceedCounter", "LAFailLimit", "UseRxMode", "RTSThreshold", "RetryLimit",
    "FragmentationThreshold", "QueueSize", "ppAC_BK", "ppAC_BE", "ppAC_VI", "ppAC_VO",
    "ppAC_Legacy", "set_BA_agg", "Standard", "Log",
];

fn is_recognized(key: &str) -> bool {
    RECOGNIZED_KEYS.contains(&key) || key.starts_with("APPosition_")
}

impl Config {
    /// Parses `path` per SPEC_FULL.md §6.2: blank/`%`-comment lines
    /// skipped, `Name=v1,v2,...` after whitespace-stripping otherwise,
    /// unknown keys or bad value types are `Config` errors, malformed
    /// lines are `Syntax` errors citing the 1-based line number.
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|e| SimError::OpenFile {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut raw: HashMap<String, RawEntry> = HashMap::new();
        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let stripped: String = line.chars().filter(|c| !c.is_whitespace()).collect();
            if stripped.is_empty() || stripped.starts_with('%') {
                continue;
            }
            let (name, value) = stripped
                .split_once('=')
                .ok_or_else(|| SimError::syntax(line_no, format!("expected `Name=value`, got `{stripped}`")))?;
            if name.is_empty() || value.is_empty() {
                return Err(SimError::syntax(line_no, "empty key or value"));
            }
            if !is_recognized(name) {
                return Err(SimError::config(format!("unknown config key `{name}` at line {line_no}")));
            }
            let values: Vec<String> = value.split(',').map(|s| s.to_string()).collect();
            raw.insert(name.to_string(), RawEntry { line: line_no, values });
        }

        validate_packet_length(&raw)?;

        let mut axes = HashMap::new();
        let mut carry_order = Vec::new();
        for (name, entry) in raw {
            if entry.values.is_empty() {
                return Err(SimError::syntax(entry.line, format!("`{name}` has no values")));
            }
            if name != "Seed" {
                carry_order.push(name.clone());
            }
            axes.insert(name, SweepAxis { values: entry.values, cursor: 0 });
        }
        // Deterministic carry order (otherwise a `HashMap` iteration order
        // would make repeated runs of the same file enumerate sweep
        // combinations in a different sequence).
        carry_order.sort();
        if axes.contains_key("Seed") {
            carry_order.push("Seed".to_string());
        }

        Ok(Config { axes, carry_order, exhausted: false, first: true })
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.axes.get(key).map(|a| a.current())
    }

    fn get_or(&self, key: &str, default: &'static str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    fn parse_f64(&self, key: &str, default: f64) -> Result<f64, SimError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| SimError::config(format!("`{key}`: not a number: `{v}`"))),
        }
    }

    fn parse_u32(&self, key: &str, default: u32) -> Result<u32, SimError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| SimError::config(format!("`{key}`: not an integer: `{v}`"))),
        }
    }

    fn parse_usize(&self, key: &str, default: usize) -> Result<usize, SimError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| SimError::config(format!("`{key}`: not an integer: `{v}`"))),
        }
    }

    fn parse_bool(&self, key: &str, default: bool) -> Result<bool, SimError> {
        match self.get(key) {
            None => Ok(default),
            Some("1") | Some("true") | Some("TRUE") => Ok(true),
            Some("0") | Some("false") | Some("FALSE") => Ok(false),
            Some(v) => Err(SimError::config(format!("`{key}`: not a bool: `{v}`"))),
        }
    }

    /// Materializes the scenario for the odometer's current position.
    pub fn current(&self) -> Result<ScenarioParams, SimError> {
        let standard = Dot11Standard::parse(&self.get_or("Standard", "802.11n"))
            .ok_or_else(|| SimError::config("unrecognized `Standard`"))?;

        let tx_mode = TransmissionMode::parse(&self.get_or("TxMode", "MCS0"))
            .ok_or_else(|| SimError::config("unrecognized `TxMode`"))?;

        let adapt_mode = match self.get_or("AdaptMode", "RATE").as_str() {
            "RATE" => AdaptModeParam::Rate,
            "POWER" => AdaptModeParam::Power,
            other => return Err(SimError::config(format!("unrecognized `AdaptMode`: `{other}`"))),
        };

        let arrival_process = match self.get_or("ArrivalTime", "CONST").as_str() {
            "CONST" => ArrivalProcess::Constant,
            "EXP" => ArrivalProcess::Exponential,
            other => return Err(SimError::config(format!("unrecognized `ArrivalTime`: `{other}`"))),
        };

        let number_aps = self.parse_usize("NumberAPs", 1)?;
        let mut ap_positions = Vec::with_capacity(number_aps);
        for i in 0..number_aps {
            let key = format!("APPosition_{i}");
            let raw = self.get(&key).unwrap_or("0;0");
            let (x, y) = raw
                .split_once(';')
                .ok_or_else(|| SimError::config(format!("`{key}`: expected `x;y`, got `{raw}`")))?;
            let x: f64 = x.parse().map_err(|_| SimError::config(format!("`{key}`: bad x: `{x}`")))?;
            let y: f64 = y.parse().map_err(|_| SimError::config(format!("`{key}`: bad y: `{y}`")))?;
            ap_positions.push((x, y));
        }

        let packet_lengths = parse_packet_lengths(self.get_or("PacketLength", "1500(1.0)").as_str())?;

        let seed: u32 = self
            .get("Seed")
            .unwrap_or("1")
            .parse()
            .map_err(|_| SimError::config("`Seed`: not an integer"))?;

        let mut pp_ac = HashMap::new();
        pp_ac.insert(Ac::Bk, self.parse_f64("ppAC_BK", 0.0)?);
        pp_ac.insert(Ac::Be, self.parse_f64("ppAC_BE", 1.0)?);
        pp_ac.insert(Ac::Vi, self.parse_f64("ppAC_VI", 0.0)?);
        pp_ac.insert(Ac::Vo, self.parse_f64("ppAC_VO", 0.0)?);
        pp_ac.insert(Ac::Legacy, self.parse_f64("ppAC_Legacy", 0.0)?);

        let log_categories = match self.get("Log") {
            None => Vec::new(),
            Some(_) => {
                let raw = self.axes["Log"].values.clone();
                raw.iter()
                    .map(|s| LogCategory::parse(s).ok_or_else(|| SimError::config(format!("unrecognized `Log` category: `{s}`"))))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        Ok(ScenarioParams {
            seed,
            max_sim_time_secs: self.parse_f64("MaxSimTime", 1.0)?,
            transient_time_secs: self.parse_f64("TransientTime", 0.0)?,
            confidence: self.parse_f64("Confidence", 0.95)?,
            temp_output_interval_secs: self.parse_f64("TempOutputInterval", 1.0)?,
            number_aps,
            number_stas: self.parse_usize("NumberStas", 1)?,
            ap_positions,
            radius: self.parse_f64("Radius", 50.0)?,
            packet_lengths,
            data_rate_mbps: self.parse_f64("DataRate", 1.0)?,
            arrival_process,
            uplink_factor: self.parse_f64("UplinkFactor", 1.0)?,
            downlink_factor: self.parse_f64("DownlinkFactor", 1.0)?,
            loss_exponent: self.parse_f64("LossExponent", 3.0)?,
            ref_loss_db: self.parse_f64("RefLoss_dB", 40.0)?,
            noise_variance_dbm: self.parse_f64("NoiseVariance_dBm", -95.0)?,
            cca_sensitivity_dbm: self.parse_f64("CCASensitivity_dBm", -82.0)?,
            doppler_spread_hz: self.parse_f64("DopplerSpread_Hz", 0.0)?,
            number_sinus: self.parse_usize("NumberSinus", 8)?,
            tx_mode,
            adapt_mode,
            target_per: self.parse_f64("TargetPER", 0.1)?,
            tx_power_max_dbm: self.parse_f64("TxPowerMax_dBm", 20.0)?,
            tx_power_min_dbm: self.parse_f64("TxPowerMin_dBm", 0.0)?,
            tx_power_step_up_db: self.parse_f64("TxPowerStepUp_dBm", 1.0)?,
            tx_power_step_down_db: self.parse_f64("TxPowerStepDown_dBm", 1.0)?,
            la_max_succeed_counter: self.parse_u32("LAMaxSucceedCounter", 10)?,
            la_fail_limit: self.parse_u32("LAFailLimit", 2)?,
            use_rx_mode: self.parse_bool("UseRxMode", false)?,
            rts_threshold: self.parse_u32("RTSThreshold", 2312)?,
            retry_limit: self.parse_u32("RetryLimit", 7)?,
            fragmentation_threshold: self.parse_u32("FragmentationThreshold", 2312)?,
            queue_size: self.parse_usize("QueueSize", 50)?,
            pp_ac,
            set_ba_agg: self.parse_bool("set_BA_agg", false)?,
            standard,
            log_categories,
        })
    }

    /// Advances the odometer to the next combination. Returns `false` once
    /// every axis has carried all the way through (the sweep is done).
    pub fn next_combination(&mut self) -> bool {
        if self.first {
            self.first = false;
            return true;
        }
        if self.exhausted {
            return false;
        }
        for key in self.carry_order.clone() {
            let wrapped = self.axes.get_mut(&key).map(|a| a.advance()).unwrap_or(true);
            if !wrapped {
                return true;
            }
        }
        self.exhausted = true;
        false
    }
}

fn validate_packet_length(raw: &HashMap<String, RawEntry>) -> Result<(), SimError> {
    let Some(entry) = raw.get("PacketLength") else { return Ok(()) };
    for v in &entry.values {
        parse_packet_lengths(v)?;
    }
    Ok(())
}

/// Parses one `PacketLength` value, e.g. `100(0.5);1500(0.5)`, validating
/// the probabilities sum to 1 within `1e-6`.
fn parse_packet_lengths(s: &str) -> Result<Vec<PacketLengthEntry>, SimError> {
    if !s.contains('(') {
        let size: u32 = s
            .parse()
            .map_err(|_| SimError::config(format!("`PacketLength`: bad size `{s}`")))?;
        return Ok(vec![PacketLengthEntry { size_bytes: size, probability: 1.0 }]);
    }

    let mut entries = Vec::new();
    let mut total = 0.0;
    for part in s.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (size_str, rest) = part
            .split_once('(')
            .ok_or_else(|| SimError::config(format!("`PacketLength`: expected `len(prob)`, got `{part}`")))?;
        let prob_str = rest.strip_suffix(')').ok_or_else(|| {
            SimError::config(format!("`PacketLength`: missing closing paren in `{part}`"))
        })?;
        let size_bytes: u32 = size_str
            .parse()
            .map_err(|_| SimError::config(format!("`PacketLength`: bad size `{size_str}`")))?;
        let probability: f64 = prob_str
            .parse()
            .map_err(|_| SimError::config(format!("`PacketLength`: bad probability `{prob_str}`")))?;
        total += probability;
        entries.push(PacketLengthEntry { size_bytes, probability });
    }
    if (total - 1.0).abs() > 1e-6 {
        return Err(SimError::config(format!(
            "`PacketLength`: probabilities sum to {total}, expected 1.0 +/- 1e-6"
        )));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let f = write_config("% a comment\n\nSeed=1\n");
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.get("Seed"), Some("1"));
    }

    #[test]
    fn unknown_key_is_a_config_error() {
        let f = write_config("Bogus=1\n");
        assert!(Config::load(f.path()).is_err());
    }

    #[test]
    fn malformed_line_is_a_syntax_error() {
        let f = write_config("NotAKeyValuePair\n");
        let err = Config::load(f.path()).unwrap_err();
        assert!(matches!(err, SimError::Syntax { .. }));
    }

    #[test]
    fn packet_length_probabilities_must_sum_to_one() {
        let f = write_config("PacketLength=100(0.5);1500(0.6)\n");
        assert!(Config::load(f.path()).is_err());
    }

    #[test]
    fn seed_is_the_fastest_varying_axis() {
        let f = write_config("Seed=1,2,3\nDataRate=1,2\n");
        let mut cfg = Config::load(f.path()).unwrap();
        let mut seeds_seen_before_datarate_advances = 0;
        assert!(cfg.next_combination());
        let first_rate = cfg.current().unwrap().data_rate_mbps;
        loop {
            if !cfg.next_combination() {
                break;
            }
            seeds_seen_before_datarate_advances += 1;
            let rate = cfg.current().unwrap().data_rate_mbps;
            if (rate - first_rate).abs() > 1e-9 {
                break;
            }
        }
        assert_eq!(seeds_seen_before_datarate_advances, 2);
    }
}
