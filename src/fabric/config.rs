use anyhow::{bail, Result};
use log::warn;
use serde::Deserialize;

use crate::fabric::bridge::Adjacency;
use crate::fabric::reservation::ReservationParams;
use crate::sim::config::Config;
use crate::timeq::Cycle;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FabricConfig {
    pub network_clusters: usize,
    /// Endpoint nodes across all clusters.
    pub nodes: usize,
    pub bottleneck_channels: usize,
    /// 0 derives the count from `bottleneck_channels` and the topology.
    pub transition_channels_per_cluster: usize,
    pub transition_channel_latency: Cycle,
    pub transition_topology: Adjacency,
    pub transition_buffer_depth: usize,
    pub bit_vector_length: usize,
    pub cycles_per_element: Cycle,
    /// 0 means the whole window, `bit_vector_length * cycles_per_element`.
    pub cycles_into_the_future: Cycle,
    #[serde(alias = "enable_multi_SRP")]
    pub enable_multi_srp: bool,
    pub how_many_time_slots_to_reserve: usize,
    pub counter_max: u32,
    pub link_failures: usize,
    pub fail_seed: u64,
}

impl Config for FabricConfig {}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            network_clusters: 2,
            nodes: 8,
            bottleneck_channels: 1,
            transition_channels_per_cluster: 0,
            transition_channel_latency: 4,
            transition_topology: Adjacency::Ring,
            transition_buffer_depth: 4,
            bit_vector_length: 16,
            cycles_per_element: 10,
            cycles_into_the_future: 0,
            enable_multi_srp: false,
            how_many_time_slots_to_reserve: 1,
            counter_max: 1,
            link_failures: 0,
            fail_seed: 0,
        }
    }
}

impl FabricConfig {
    pub fn nodes_per_cluster(&self) -> usize {
        self.nodes / self.network_clusters.max(1)
    }

    /// Transition channels each cluster owns, after deriving the default.
    pub fn channels_per_cluster(&self) -> usize {
        if self.transition_channels_per_cluster > 0 {
            return self.transition_channels_per_cluster;
        }
        if self.network_clusters <= 1 {
            return 0;
        }
        let needed = match self.transition_topology {
            Adjacency::Ring => 1,
            Adjacency::Full => self.network_clusters - 1,
        };
        needed.max(self.bottleneck_channels)
    }

    pub fn lookahead(&self) -> Cycle {
        match self.cycles_into_the_future {
            0 => self.bit_vector_length as Cycle * self.cycles_per_element,
            cycles => cycles,
        }
    }

    pub fn reservation_params(&self) -> ReservationParams {
        ReservationParams {
            bit_vector_length: self.bit_vector_length,
            cycles_per_element: self.cycles_per_element,
            cycles_into_the_future: self.lookahead(),
            counter_max: self.counter_max,
            enable_multi_srp: self.enable_multi_srp,
            slots_per_request: self.how_many_time_slots_to_reserve,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let clusters = self.network_clusters;
        if clusters == 0 {
            bail!("network_clusters must be at least 1");
        }
        if self.nodes == 0 {
            bail!("nodes must be at least 1");
        }
        if self.nodes % clusters != 0 {
            bail!(
                "nodes ({}) is not divisible by network_clusters ({})",
                self.nodes,
                clusters
            );
        }
        if self.bit_vector_length == 0 {
            bail!("bit_vector_length must be at least 1");
        }
        if self.cycles_per_element == 0 {
            bail!("cycles_per_element must be at least 1");
        }
        if self.counter_max == 0 {
            bail!("counter_max must be at least 1");
        }
        if self.transition_channel_latency == 0 {
            bail!("transition_channel_latency must be at least 1");
        }
        if self.transition_buffer_depth == 0 {
            bail!("transition_buffer_depth must be at least 1");
        }
        if !(1..=self.bit_vector_length).contains(&self.how_many_time_slots_to_reserve) {
            bail!(
                "how_many_time_slots_to_reserve ({}) must be in [1, bit_vector_length = {}]",
                self.how_many_time_slots_to_reserve,
                self.bit_vector_length
            );
        }

        let channels = self.channels_per_cluster();
        if clusters > 1 && channels < self.bottleneck_channels {
            bail!(
                "{} transition channels per cluster cannot hold {} bottleneck channels",
                channels,
                self.bottleneck_channels
            );
        }
        if clusters > 1 && channels == 0 {
            bail!("{} clusters need at least one transition channel each", clusters);
        }
        if self.transition_topology == Adjacency::Full && clusters > 1 && channels < clusters - 1 {
            bail!(
                "full transition topology over {} clusters needs at least {} channels per cluster, got {}",
                clusters,
                clusters - 1,
                channels
            );
        }
        if clusters == 1 && self.bottleneck_channels > 0 {
            warn!("single cluster fabric: bottleneck channels have no traffic to reserve");
        }
        if self.lookahead() < self.cycles_per_element {
            warn!(
                "cycles_into_the_future ({}) is shorter than one slot; only the active slot is searchable",
                self.lookahead()
            );
        }
        Ok(())
    }
}
