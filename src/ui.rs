use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use toml::Table;

use crate::fabric::FabricConfig;
use crate::sim::config::{Config, SimConfig};
use crate::sim::top::Sim;
use crate::subnet::SubnetConfig;
use crate::traffic::TrafficConfig;

#[derive(Parser)]
#[command(version, about)]
pub struct ClusternetArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: PathBuf,
    #[arg(long, help = "Override number of cycles to simulate")]
    pub cycles: Option<u64>,
    #[arg(long, help = "Override number of clusters")]
    pub clusters: Option<usize>,
    #[arg(long, help = "Override total number of nodes")]
    pub nodes: Option<usize>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    pub log: Option<u64>,
    #[arg(long, help = "Print the run summary as JSON")]
    pub json: Option<bool>,
    #[arg(long, help = "Dump the node and channel maps before running")]
    pub dump: bool,
}

/// Make a Sim object from the TOML configuration.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_sim(toml_string: &str, cli_args: Option<&ClusternetArgs>) -> Result<Sim> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let mut sim_config = SimConfig::from_section(config_table.get("sim"));
    let mut fabric_config = FabricConfig::from_section(config_table.get("fabric"));
    let subnet_config = SubnetConfig::from_section(config_table.get("subnet"));
    let traffic_config = TrafficConfig::from_section(config_table.get("traffic"));

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        sim_config.cycles = args.cycles.unwrap_or(sim_config.cycles);
        sim_config.log_level = args.log.unwrap_or(sim_config.log_level);
        sim_config.json = args.json.unwrap_or(sim_config.json);
        fabric_config.network_clusters = args.clusters.unwrap_or(fabric_config.network_clusters);
        fabric_config.nodes = args.nodes.unwrap_or(fabric_config.nodes);
    }

    Sim::new(sim_config, fabric_config, subnet_config, traffic_config)
}
