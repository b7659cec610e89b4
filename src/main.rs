//! Entry point for the WLAN discrete-event capacity simulator.
//!
//! Loads a `Name=v1,v2,...` config file, sweeps every parameter
//! combination it describes, runs one `Simulation` per (scenario, seed)
//! pair, and writes `results.txt`/`sim.log` into an output directory.
//! Ported from `original_source/src/main.cpp`'s top-level driver loop.

mod channel;
mod config;
mod error;
mod ids;
mod linkadapt;
mod mac;
mod output;
mod packet;
mod phy;
mod position;
mod rng;
mod scheduler;
mod simulation;
mod standard;
mod stats;
mod terminal;
mod timestamp;
mod traffic;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use channel::{Channel, ChannelParams};
use config::{AdaptModeParam, Config, ScenarioParams};
use ids::TerminalIdGen;
use linkadapt::{AdaptTarget, LinkAdapt, LinkAdaptParams, Strategy};
use mac::{Ac, Mac, MacParams};
use output::SeedAggregate;
use phy::{Phy, PhyParams};
use position::{sample_in_disc, Position};
use rng::Mt19937;
use scheduler::Wakeup;
use simulation::Simulation;
use standard::TransmissionMode;
use terminal::{Connection, Terminal};
use timestamp::Timestamp;
use traffic::{PacketLengthEntry, Traffic, TrafficParams};

/// IEEE 802.11 discrete-event WLAN capacity simulator.
///
/// The source's usage line is `sim [--no_pause] [--<dirname>]`, where the
/// scenario directory itself is the flag name rather than a flag's value;
/// that's not expressible with a standard argument parser, so this takes
/// the directory as a plain positional argument instead (defaulting to the
/// current directory rather than a path baked in at compile time).
#[derive(Parser, Debug)]
#[command(name = "sim", version, about)]
struct Cli {
    /// Directory holding `config.txt`; results are written alongside it.
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Skip the interactive "press enter to continue" pause at startup.
    #[arg(long)]
    no_pause: bool,
}

/// Key that identifies which sweep group an iteration belongs to: every
/// field of `ScenarioParams` except `Seed`, since `Seed` is the fastest
/// axis of the odometer and every other value only changes once its
/// seeds are exhausted.
fn group_key(p: &ScenarioParams) -> String {
    let fields: Vec<String> = vec![
        format!("{:?}", p.ap_positions),
        p.max_sim_time_secs.to_string(),
        p.transient_time_secs.to_string(),
        p.confidence.to_string(),
        p.temp_output_interval_secs.to_string(),
        format!("{}x{}", p.number_aps, p.number_stas),
        p.radius.to_string(),
        format!("{:?}", p.packet_lengths.iter().map(|e| (e.size_bytes, e.probability)).collect::<Vec<_>>()),
        p.data_rate_mbps.to_string(),
        format!("{:?}", p.arrival_process),
        p.uplink_factor.to_string(),
        p.downlink_factor.to_string(),
        p.loss_exponent.to_string(),
        p.ref_loss_db.to_string(),
        p.noise_variance_dbm.to_string(),
        p.cca_sensitivity_dbm.to_string(),
        p.doppler_spread_hz.to_string(),
        p.number_sinus.to_string(),
        p.tx_mode.to_string(),
        format!("{:?}", p.adapt_mode),
        p.target_per.to_string(),
        p.tx_power_max_dbm.to_string(),
        p.tx_power_min_dbm.to_string(),
        p.tx_power_step_up_db.to_string(),
        p.tx_power_step_down_db.to_string(),
        p.la_max_succeed_counter.to_string(),
        p.la_fail_limit.to_string(),
        p.use_rx_mode.to_string(),
        p.rts_threshold.to_string(),
        p.retry_limit.to_string(),
        p.fragmentation_threshold.to_string(),
        p.queue_size.to_string(),
        p.set_ba_agg.to_string(),
        p.standard.to_string(),
        format!("{:?}", p.log_categories),
    ];
    fields.join("|")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.dir.join("config.txt");
    let mut config =
        Config::load(&config_path).with_context(|| format!("loading {}", config_path.display()))?;

    let first = config.current().context("reading initial scenario")?;
    output::init_logging(&first.log_categories);

    if !cli.no_pause {
        info!("starting sweep over {}", config_path.display());
    }

    let mut results = output::create_results_file(&cli.dir)
        .with_context(|| format!("creating results.txt in {}", cli.dir.display()))?;

    let mut iteration = 0usize;
    let mut current_group: Option<(String, SeedAggregate, f64)> = None;

    loop {
        let params = config.current().context("reading scenario parameters")?;
        iteration += 1;
        info!("iteration {iteration}: seed={}", params.seed);

        let (terminals, active_duration) = run_one(&params)?;
        output::write_iteration(&mut results, &params, &terminals, active_duration)?;

        let key = group_key(&params);
        match &mut current_group {
            Some((existing_key, agg, _)) if *existing_key == key => {
                agg.record(&terminals, active_duration);
            }
            _ => {
                if let Some((_, agg, confidence)) = current_group.take() {
                    output::write_summary(&mut results, &agg, confidence)?;
                }
                let mut agg = SeedAggregate::new(terminals.len());
                agg.record(&terminals, active_duration);
                current_group = Some((key, agg, params.confidence));
            }
        }

        if !config.next_combination() {
            break;
        }
    }

    if let Some((_, agg, confidence)) = current_group {
        output::write_summary(&mut results, &agg, confidence)?;
    }

    info!("sweep complete: {iteration} iteration(s)");
    Ok(())
}

/// Builds the topology described by `params`, runs one simulation to
/// completion, and returns the finished terminals plus the duration over
/// which statistics were actually collected (`MaxSimTime - TransientTime`).
fn run_one(params: &ScenarioParams) -> Result<(Vec<Terminal>, f64)> {
    let mut layout_rng = Mt19937::new(params.seed);
    let mut id_gen = TerminalIdGen::default();

    let channel_params = ChannelParams {
        loss_exponent: params.loss_exponent,
        ref_loss_db: params.ref_loss_db,
        doppler_spread_hz: params.doppler_spread_hz,
        number_sines: params.number_sinus,
    };
    let channel = Channel::new(channel_params);

    let transient_time =
        Timestamp::from_secs(params.transient_time_secs).context("TransientTime out of range")?;
    let run_to = Timestamp::from_secs(params.max_sim_time_secs).context("MaxSimTime out of range")?;

    let mut sim = Simulation::new(channel, Mt19937::new(params.seed), transient_time, run_to);

    let mut ap_ids = Vec::with_capacity(params.number_aps);
    for i in 0..params.number_aps {
        let pos = params
            .ap_positions
            .get(i)
            .map(|&(x, y)| Position::new(x, y))
            .unwrap_or(Position::new(0.0, 0.0));
        let id = id_gen.next();
        sim.channel.new_term(id, pos);
        sim.add_terminal(build_terminal(id, pos, params));
        ap_ids.push(id);
    }

    let ac_table = [
        (Ac::Bk, *params.pp_ac.get(&Ac::Bk).unwrap_or(&0.0)),
        (Ac::Be, *params.pp_ac.get(&Ac::Be).unwrap_or(&1.0)),
        (Ac::Vi, *params.pp_ac.get(&Ac::Vi).unwrap_or(&0.0)),
        (Ac::Vo, *params.pp_ac.get(&Ac::Vo).unwrap_or(&0.0)),
        (Ac::Legacy, *params.pp_ac.get(&Ac::Legacy).unwrap_or(&0.0)),
    ];

    for _ in 0..params.number_stas {
        let pos = sample_in_disc(params.radius, &mut layout_rng);
        let id = id_gen.next();
        sim.channel.new_term(id, pos);

        let ac = pick_ac(&ac_table, &mut layout_rng);
        let ap = ap_ids.first().copied().unwrap_or(id);
        sim.channel.new_link(id, ap, Timestamp::ZERO, &mut layout_rng);

        let mut station = build_terminal(id, pos, params);
        attach_uplink(&mut station, ap, ac, params);
        sim.add_terminal(station);

        attach_downlink(&mut sim, ap, id, ac, params);
    }

    seed_traffic_wakeups(&mut sim);
    sim.run();

    let active_duration = (params.max_sim_time_secs - params.transient_time_secs).max(0.0);
    Ok((sim.terminals, active_duration))
}

fn pick_ac(table: &[(Ac, f64); 5], rng: &mut Mt19937) -> Ac {
    let total: f64 = table.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Ac::Be;
    }
    let u = rng.uniform(0.0, total);
    let mut acc = 0.0;
    for (ac, w) in table {
        acc += w;
        if u <= acc {
            return *ac;
        }
    }
    table.last().map(|(ac, _)| *ac).unwrap_or(Ac::Be)
}

fn build_terminal(id: ids::TerminalId, pos: Position, params: &ScenarioParams) -> Terminal {
    let mac = Mac::new(
        id,
        params.standard,
        MacParams {
            rts_threshold: params.rts_threshold,
            retry_limit: params.retry_limit,
            frag_threshold: params.fragmentation_threshold,
            max_queue_size: params.queue_size,
            set_ba_agg: params.set_ba_agg,
        },
    );
    let phy = Phy::new(
        id,
        params.standard,
        PhyParams {
            noise_variance_dbm: params.noise_variance_dbm,
            cca_sensitivity_dbm: params.cca_sensitivity_dbm,
        },
    );
    Terminal::new(id, pos, phy, mac)
}

fn build_link_adapt(peer: ids::TerminalId, params: &ScenarioParams) -> LinkAdapt {
    let strategy = match params.tx_mode {
        TransmissionMode::Mcs(m) => Strategy::Fixed(m),
        TransmissionMode::Opt => Strategy::Opt,
        TransmissionMode::Subopt => Strategy::Subopt,
    };
    let adapt = match params.adapt_mode {
        AdaptModeParam::Rate => AdaptTarget::Rate,
        AdaptModeParam::Power => AdaptTarget::Power,
    };
    LinkAdapt::new(
        peer,
        params.standard,
        LinkAdaptParams {
            strategy,
            adapt,
            power_min_dbm: params.tx_power_min_dbm,
            power_max_dbm: params.tx_power_max_dbm,
            power_step_up_db: params.tx_power_step_up_db,
            power_step_down_db: params.tx_power_step_down_db,
            target_per: params.target_per,
            max_succeed_counter: params.la_max_succeed_counter,
            fail_limit: params.la_fail_limit,
            use_rx_mode: params.use_rx_mode,
            adapt_la_thresh: false,
        },
    )
}

fn packet_lengths(params: &ScenarioParams) -> Vec<PacketLengthEntry> {
    params
        .packet_lengths
        .iter()
        .map(|e| PacketLengthEntry { size_bytes: e.size_bytes, probability: e.probability })
        .collect()
}

fn attach_uplink(station: &mut Terminal, ap: ids::TerminalId, ac: Ac, params: &ScenarioParams) {
    let traffic_params = TrafficParams {
        data_rate_bps: params.data_rate_mbps * 1e6 * params.uplink_factor,
        arrival_process: params.arrival_process,
        packet_lengths: packet_lengths(params),
    };
    station.add_connection(Connection {
        target: ap,
        ac,
        traffic: Traffic::new(traffic_params, Timestamp::ZERO),
        link_adapt: build_link_adapt(ap, params),
    });
}

/// Downlink traffic from the AP back to a freshly added station, scaled by
/// `DownlinkFactor` against the station's own uplink rate.
fn attach_downlink(sim: &mut Simulation, ap: ids::TerminalId, station: ids::TerminalId, ac: Ac, params: &ScenarioParams) {
    let Some(ap_terminal) = sim.terminals.iter_mut().find(|t| t.id == ap) else { return };
    let traffic_params = TrafficParams {
        data_rate_bps: params.data_rate_mbps * 1e6 * params.downlink_factor,
        arrival_process: params.arrival_process,
        packet_lengths: packet_lengths(params),
    };
    ap_terminal.add_connection(Connection {
        target: station,
        ac,
        traffic: Traffic::new(traffic_params, Timestamp::ZERO),
        link_adapt: build_link_adapt(station, params),
    });
}

/// Primes the scheduler with each connection's first arrival. `Simulation`
/// has no notion of "connections that exist but haven't fired yet" on its
/// own; the driver is responsible for the very first `NewPacket` wakeup of
/// each one.
fn seed_traffic_wakeups(sim: &mut Simulation) {
    for term in &sim.terminals {
        for (i, conn) in term.connections.iter().enumerate() {
            sim.scheduler
                .schedule(conn.traffic.next_arrival_time(), Wakeup::NewPacket { terminal: term.id, connection: i });
        }
    }
}
