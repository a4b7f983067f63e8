use anyhow::Result;
use log::{info, warn};
use serde::Serialize;

use crate::base::module::TimedModule;
use crate::fabric::reservation::ReservationStats;
use crate::fabric::{FabricConfig, FabricStats, SuperNetwork};
use crate::sim::config::SimConfig;
use crate::subnet::SubnetConfig;
use crate::timeq::Cycle;
use crate::traffic::{DriverStats, TrafficConfig, TrafficDriver};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub cycles: Cycle,
    pub clusters: usize,
    pub nodes: usize,
    pub faults: usize,
    pub capacity: f64,
    pub avg_latency: f64,
    pub avg_reserved_latency: f64,
    /// Delivered packets per node per cycle.
    pub throughput: f64,
    pub backlog: usize,
    pub fabric: FabricStats,
    pub reservation: ReservationStats,
    pub traffic: DriverStats,
}

pub struct Sim {
    pub config: SimConfig,
    pub fabric: SuperNetwork,
    pub driver: TrafficDriver,
    faults: usize,
}

impl Sim {
    pub fn new(
        sim_config: SimConfig,
        fabric_config: FabricConfig,
        subnet_config: SubnetConfig,
        traffic_config: TrafficConfig,
    ) -> Result<Sim> {
        let mut fabric = SuperNetwork::new(fabric_config, &subnet_config)?;
        let faults = if sim_config.faults {
            fabric.insert_random_faults()
        } else {
            0
        };
        let driver = TrafficDriver::new(traffic_config, &fabric);
        Ok(Sim {
            config: sim_config,
            fabric,
            driver,
            faults,
        })
    }

    pub fn tick_one(&mut self) {
        self.fabric.read_inputs();
        self.driver.tick(&mut self.fabric, true);
        self.fabric.evaluate();
        self.fabric.write_outputs();
    }

    pub fn simulate(&mut self) -> Result<RunSummary> {
        let cycles = self.config.cycles;
        let milestone = (cycles / 10).max(1);
        for cycle in 0..cycles {
            self.tick_one();
            if (cycle + 1) % milestone == 0 {
                info!(
                    "cycle {}: {} delivered, {} queued at sources",
                    cycle + 1,
                    self.driver.stats().delivered,
                    self.driver.backlog()
                );
            }
        }
        let summary = self.summary();
        if summary.backlog > summary.nodes * 64 {
            warn!(
                "{} packets still waiting at sources, offered load likely exceeds capacity {:.3}",
                summary.backlog, summary.capacity
            );
        }
        Ok(summary)
    }

    pub fn summary(&self) -> RunSummary {
        let traffic = self.driver.stats();
        let cycles = self.fabric.cycle();
        let nodes = self.fabric.num_nodes();
        let throughput = if cycles == 0 {
            0.0
        } else {
            traffic.delivered as f64 / (cycles as f64 * nodes as f64)
        };
        RunSummary {
            cycles,
            clusters: self.fabric.num_clusters(),
            nodes,
            faults: self.faults,
            capacity: self.fabric.capacity(),
            avg_latency: traffic.latency.mean(),
            avg_reserved_latency: traffic.reserved_latency.mean(),
            throughput,
            backlog: self.driver.backlog(),
            fabric: self.fabric.stats(),
            reservation: self.fabric.reservation_stats(),
            traffic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_reports_cycles_and_traffic() {
        let sim_config = SimConfig {
            cycles: 300,
            ..SimConfig::default()
        };
        let mut sim = Sim::new(
            sim_config,
            FabricConfig::default(),
            SubnetConfig::default(),
            TrafficConfig::default(),
        )
        .unwrap();
        let summary = sim.simulate().unwrap();
        assert_eq!(300, summary.cycles);
        assert!(summary.traffic.delivered > 0);
        assert!(summary.throughput > 0.0);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"reservation\""));
    }

    #[test]
    fn faults_are_placed_when_enabled() {
        let sim_config = SimConfig {
            cycles: 0,
            faults: true,
            ..SimConfig::default()
        };
        let fabric_config = FabricConfig {
            link_failures: 2,
            ..FabricConfig::default()
        };
        let subnet_config = SubnetConfig {
            topology: crate::subnet::SubnetKind::Ring,
            ..SubnetConfig::default()
        };
        let sim = Sim::new(sim_config, fabric_config, subnet_config, TrafficConfig::default()).unwrap();
        assert!(sim.summary().faults >= 1);
    }
}
