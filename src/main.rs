use std::fs;
use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use toml::Table;

use clusternet::sim::config::{Config, SimConfig};
use clusternet::ui::{make_sim, ClusternetArgs};

pub fn main() -> Result<()> {
    let argv = ClusternetArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;
    let config_table: Table = toml::from_str(&config).context("cannot parse config toml")?;

    let log_level = argv
        .log
        .unwrap_or_else(|| SimConfig::from_section(config_table.get("sim")).log_level);
    let level = match log_level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut sim = make_sim(&config, Some(&argv))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if argv.dump {
        sim.fabric.display(&mut out)?;
        sim.fabric.dump_node_map(&mut out)?;
        sim.fabric.dump_channel_map(&mut out)?;
    }

    let summary = sim.simulate()?;
    if sim.config.json {
        writeln!(out, "{}", serde_json::to_string_pretty(&summary)?)?;
    } else {
        writeln!(
            out,
            "{} cycles: {} delivered ({} under reservation), avg latency {:.2}, throughput {:.4}",
            summary.cycles,
            summary.traffic.delivered,
            summary.traffic.reserved_delivered,
            summary.avg_latency,
            summary.throughput
        )?;
        writeln!(
            out,
            "reservations: {} requests, {} grants, {} denies, {} demoted",
            summary.fabric.requests, summary.fabric.grants, summary.fabric.denies, summary.fabric.demoted
        )?;
    }
    Ok(())
}
