//! The cluster fabric: several sub-networks composed into one logical network.
//!
//! Global node `g` lives in cluster `g / nodes_per_cluster` as local terminal
//! `g % nodes_per_cluster`. Every cluster carries extra port terminals after its
//! nodes, one per transition channel; flits for another cluster are routed to a
//! port, carried over a transition link, and re-routed in the next cluster.
//!
//! Ports on bottleneck channels run the reservation protocol. Each cycle a port
//! handles, in order:
//! 1. reserved flits whose flow holds the active slot,
//! 2. reservation requests, in arrival order,
//! 3. ordinary flits.
//!
//! At most one flit leaves over a transition link per cycle. The reservation
//! epoch advances at the start of `evaluate`, so every request is answered
//! against the window of the cycle it is handled in.

pub mod bridge;
pub mod config;
pub mod diag;
pub mod reservation;

#[cfg(test)]
mod unit_tests;

use std::collections::VecDeque;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::Serialize;

use crate::base::module::{ModuleBase, TimedModule};
use crate::flit::{Credit, Flit, FlitClass};
use crate::subnet::{new_subnet, Subnet, SubnetConfig};
use crate::timeq::Cycle;

use bridge::{Adjacency, TransitionBridge};
use reservation::{Deferral, ReservationEngine, ReservationStats, SlotPosition};

pub use config::FabricConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local { terminal: usize },
    Transition { channel: usize, next_cluster: usize },
}

#[derive(Debug)]
struct Pending {
    flit: Flit,
    /// Holds an ingress credit of the link it arrived on.
    from_link: bool,
}

#[derive(Debug, Default)]
struct PortState {
    reserved: VecDeque<Flit>,
    requests: VecDeque<Flit>,
    /// Requests injected straight at the port; they hold no ejection credit.
    special: VecDeque<Flit>,
    ordinary: VecDeque<Flit>,
    inject: VecDeque<Pending>,
    inject_credits: usize,
}

impl PortState {
    fn queued(&self) -> usize {
        self.reserved.len()
            + self.requests.len()
            + self.special.len()
            + self.ordinary.len()
            + self.inject.len()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FabricStats {
    pub injected: u64,
    pub special_injected: u64,
    pub delivered: u64,
    pub transitions: u64,
    pub requests: u64,
    pub grants: u64,
    pub unreserved_grants: u64,
    pub denies: u64,
    pub beyond_window: u64,
    pub reserved_sent: u64,
    pub demoted: u64,
}

pub struct SuperNetwork {
    base: ModuleBase,
    config: FabricConfig,
    nodes_per_cluster: usize,
    routers_per_cluster: usize,
    clusters: Vec<Box<dyn Subnet>>,
    bridge: TransitionBridge,
    engine: ReservationEngine,
    ports: Vec<Vec<PortState>>,
    stats: FabricStats,
}

impl SuperNetwork {
    pub fn new(config: FabricConfig, subnet_config: &SubnetConfig) -> Result<Self> {
        config.validate().context("invalid [fabric] configuration")?;
        let n = config.network_clusters;
        let npc = config.nodes_per_cluster();
        let channels = config.channels_per_cluster();

        let clusters: Vec<Box<dyn Subnet>> = (0..n)
            .map(|c| new_subnet(subnet_config, format!("c{c}"), npc + channels))
            .collect();
        let routers_per_cluster = clusters[0].num_routers();
        let bridge = TransitionBridge::new(
            config.transition_topology,
            n,
            channels,
            config.transition_channel_latency,
            config.transition_buffer_depth,
            npc,
        );
        let engine = ReservationEngine::new(
            config.reservation_params(),
            n,
            config.bottleneck_channels.min(channels),
        );
        let ports = (0..n)
            .map(|c| {
                (0..channels)
                    .map(|_| PortState {
                        inject_credits: clusters[c].buffer_depth(),
                        ..PortState::default()
                    })
                    .collect()
            })
            .collect();

        info!(
            "fabric: {} clusters x {} nodes, {} transition channels per cluster ({} bottleneck), {} subnets",
            n, npc, channels, config.bottleneck_channels, subnet_config.topology
        );
        Ok(Self {
            base: ModuleBase::new("fabric"),
            config,
            nodes_per_cluster: npc,
            routers_per_cluster,
            clusters,
            bridge,
            engine,
            ports,
            stats: FabricStats::default(),
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn cycle(&self) -> Cycle {
        self.base.cycle
    }

    pub fn stats(&self) -> FabricStats {
        self.stats
    }

    /// Epoch the current cycle belongs to. The engine catches up with it in
    /// `evaluate`, so stamp new requests with this rather than the engine's epoch.
    pub fn current_epoch(&self) -> u64 {
        self.base.cycle / self.config.cycles_per_element
    }

    pub fn engine(&self) -> &ReservationEngine {
        &self.engine
    }

    pub fn reservation_stats(&self) -> ReservationStats {
        self.engine.stats()
    }

    pub fn bridge(&self) -> &TransitionBridge {
        &self.bridge
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.config.nodes
    }

    pub fn nodes_per_cluster(&self) -> usize {
        self.nodes_per_cluster
    }

    pub fn num_routers(&self) -> usize {
        self.routers_per_cluster * self.clusters.len()
    }

    pub fn channels_per_cluster(&self) -> usize {
        self.bridge.channels()
    }

    pub fn map_node(&self, global: usize) -> (usize, usize) {
        assert!(
            global < self.config.nodes,
            "node {} out of range [0, {})",
            global,
            self.config.nodes
        );
        (global % self.nodes_per_cluster, global / self.nodes_per_cluster)
    }

    pub fn global_node(&self, local: usize, cluster: usize) -> usize {
        assert!(
            local < self.nodes_per_cluster && cluster < self.clusters.len(),
            "local node {} in cluster {} out of range",
            local,
            cluster
        );
        cluster * self.nodes_per_cluster + local
    }

    pub fn map_router(&self, global: usize) -> (usize, usize) {
        assert!(
            global < self.num_routers(),
            "router {} out of range [0, {})",
            global,
            self.num_routers()
        );
        (global % self.routers_per_cluster, global / self.routers_per_cluster)
    }

    pub fn global_router(&self, local: usize, cluster: usize) -> usize {
        assert!(
            local < self.routers_per_cluster && cluster < self.clusters.len(),
            "local router {} in cluster {} out of range",
            local,
            cluster
        );
        cluster * self.routers_per_cluster + local
    }

    pub fn get_cluster(&self, index: usize) -> &dyn Subnet {
        assert!(index < self.clusters.len(), "cluster {} out of range", index);
        self.clusters[index].as_ref()
    }

    /// Transition channels of `cluster` that lead towards `dest_cluster`.
    fn candidate_channels(&self, cluster: usize, dest_cluster: usize) -> Vec<usize> {
        let n = self.clusters.len();
        let all = 0..self.bridge.channels();
        let toward: Vec<usize> = match self.bridge.adjacency() {
            Adjacency::Ring => all.collect(),
            Adjacency::Full => {
                let offset = (dest_cluster + n - cluster - 1) % n;
                all.filter(|k| k % (n - 1) == offset).collect()
            }
        };
        let healthy: Vec<usize> = toward
            .iter()
            .copied()
            .filter(|&k| !self.bridge.link(cluster, k).link.is_faulty())
            .collect();
        if healthy.is_empty() {
            toward
        } else {
            healthy
        }
    }

    /// Pick the next hop of `flit` inside `cluster` and point its local
    /// destination there.
    pub fn route_flit(&mut self, flit: &mut Flit, cluster: usize, is_injection: bool) -> Route {
        let (local, dest_cluster) = self.map_node(flit.dest);
        if is_injection && flit.class == FlitClass::Reserved {
            if let Some(ts) = flit.res_timestamp {
                if self.engine.belongs_in_that_time_slot(ts, true) == SlotPosition::Missed {
                    debug!("{}: reserved timestamp {} already missed, demoting", flit, ts);
                    self.demote(flit);
                }
            }
        }
        if dest_cluster == cluster {
            flit.local_dest = local;
            return Route::Local { terminal: local };
        }
        let candidates = self.candidate_channels(cluster, dest_cluster);
        assert!(
            !candidates.is_empty(),
            "cluster {} has no transition channel towards cluster {}",
            cluster,
            dest_cluster
        );
        let channel = candidates[flit.flow_id % candidates.len()];
        flit.local_dest = self.bridge.port_terminal(channel);
        Route::Transition {
            channel,
            next_cluster: self.bridge.next_cluster(cluster, channel),
        }
    }

    fn demote(&mut self, flit: &mut Flit) {
        flit.class = FlitClass::Ordinary;
        flit.res_timestamp = None;
        self.stats.demoted += 1;
    }

    pub fn write_flit(&mut self, mut flit: Flit, source: usize) {
        let (local, cluster) = self.map_node(source);
        self.route_flit(&mut flit, cluster, true);
        self.stats.injected += 1;
        self.clusters[cluster].write_flit(flit, local);
    }

    pub fn read_flit(&mut self, dest: usize) -> Option<Flit> {
        let (local, cluster) = self.map_node(dest);
        let flit = self.clusters[cluster].read_flit(local)?;
        self.stats.delivered += 1;
        Some(flit)
    }

    pub fn write_credit(&mut self, credit: Credit, dest: usize) {
        let (local, cluster) = self.map_node(dest);
        self.clusters[cluster].write_credit(credit, local);
    }

    pub fn read_credit(&mut self, source: usize) -> Option<Credit> {
        let (local, cluster) = self.map_node(source);
        self.clusters[cluster].read_credit(local)
    }

    /// Inject a flit that may need the reservation engine. A `Request` leaving
    /// the source cluster over a bottleneck channel skips the sub-network: it is
    /// queued at the port and answered in this cycle's `evaluate`. Returns true
    /// in that case. Anything else goes through `write_flit` and takes an
    /// injection credit.
    pub fn write_special_flit(&mut self, mut flit: Flit, source: usize) -> bool {
        if flit.class != FlitClass::Request {
            self.write_flit(flit, source);
            return false;
        }
        let (_, cluster) = self.map_node(source);
        match self.route_flit(&mut flit, cluster, true) {
            Route::Transition { channel, .. } if self.engine.is_bottleneck(cluster, channel) => {
                self.stats.special_injected += 1;
                self.ports[cluster][channel].special.push_back(flit);
                true
            }
            _ => {
                self.write_flit(flit, source);
                false
            }
        }
    }

    /// Answer one reservation request at port `channel` of `cluster`. The reply
    /// re-enters the cluster through the same port.
    fn handle_res_grant_flits(&mut self, mut request: Flit, cluster: usize, channel: usize) {
        let now = self.base.cycle;
        self.stats.requests += 1;
        let class = if self.engine.is_bottleneck(cluster, channel) {
            let earliest = now + request.cluster_hops as Cycle * self.bridge.latency();
            match self.engine.reserve_bit_vector(&mut request, cluster, channel, earliest, now) {
                Ok(grant) => {
                    debug!(
                        "cycle {}: {} granted slot {} (t={}) on c{}.{}",
                        now, request, grant.slot, grant.timestamp, cluster, channel
                    );
                    self.stats.grants += 1;
                    FlitClass::Grant
                }
                Err(deferral) => {
                    debug!("cycle {}: {} deferred on c{}.{}: {:?}", now, request, cluster, channel, deferral);
                    if let Deferral::BeyondWindow { .. } = deferral {
                        self.stats.beyond_window += 1;
                    }
                    request.res_timestamp = None;
                    self.stats.denies += 1;
                    FlitClass::Deny
                }
            }
        } else {
            // nothing to reserve on this path
            request.res_timestamp = None;
            self.stats.grants += 1;
            self.stats.unreserved_grants += 1;
            FlitClass::Grant
        };

        let mut reply = request.reply(request.id, class, now);
        self.route_flit(&mut reply, cluster, false);
        self.ports[cluster][channel].inject.push_back(Pending {
            flit: reply,
            from_link: false,
        });
    }

    /// Send the oldest reserved flit whose flow holds the active slot, wherever it
    /// sits in the queue. Flits whose flow has no grant left are demoted; flits
    /// waiting for a later slot keep their place. Returns true when the link was
    /// used.
    fn handle_grant_flits(&mut self, cluster: usize, channel: usize) -> bool {
        let queued = std::mem::take(&mut self.ports[cluster][channel].reserved);
        let mut waiting = VecDeque::with_capacity(queued.len());
        let mut sent = false;
        for mut flit in queued {
            match self.engine.grant_position(cluster, channel, flit.flow_id) {
                SlotPosition::Current if !sent && self.bridge.can_send(cluster, channel) => {
                    let consumed = self.engine.consume_grant(cluster, channel, flit.flow_id);
                    debug_assert!(consumed);
                    // travels as plain data past the reserved channel
                    flit.res_timestamp = None;
                    self.stats.reserved_sent += 1;
                    self.send_over(flit, cluster, channel);
                    sent = true;
                }
                SlotPosition::Current | SlotPosition::Upcoming => waiting.push_back(flit),
                SlotPosition::Missed | SlotPosition::Unreserved => {
                    debug!("{}: no grant left on c{}.{}, demoting", flit, cluster, channel);
                    self.demote(&mut flit);
                    self.ports[cluster][channel].ordinary.push_back(flit);
                }
            }
        }
        self.ports[cluster][channel].reserved = waiting;
        sent
    }

    fn handle_non_res_flits(&mut self, cluster: usize, channel: usize) -> bool {
        if self.ports[cluster][channel].ordinary.is_empty() || !self.bridge.can_send(cluster, channel) {
            return false;
        }
        let Some(flit) = self.ports[cluster][channel].ordinary.pop_front() else {
            return false;
        };
        self.send_over(flit, cluster, channel);
        true
    }

    fn send_over(&mut self, flit: Flit, cluster: usize, channel: usize) {
        self.stats.transitions += 1;
        self.bridge
            .send(flit, Credit::new(), cluster, channel, self.clusters[cluster].as_mut());
    }

    /// Pull everything the cluster ejected at a port into the port's class queues.
    fn drain_port(&mut self, cluster: usize, channel: usize) {
        let terminal = self.bridge.port_terminal(channel);
        let bottleneck = self.engine.is_bottleneck(cluster, channel);
        while let Some(flit) = self.clusters[cluster].read_flit(terminal) {
            let port = &mut self.ports[cluster][channel];
            match flit.class {
                FlitClass::Request => port.requests.push_back(flit),
                FlitClass::Reserved if bottleneck && flit.has_reservation() => port.reserved.push_back(flit),
                _ => port.ordinary.push_back(flit),
            }
        }
    }

    fn process_port(&mut self, cluster: usize, channel: usize) {
        self.drain_port(cluster, channel);
        let terminal = self.bridge.port_terminal(channel);

        let link_busy = self.handle_grant_flits(cluster, channel);
        while let Some(request) = self.ports[cluster][channel].requests.pop_front() {
            self.handle_res_grant_flits(request, cluster, channel);
            self.clusters[cluster].write_credit(Credit::new(), terminal);
        }
        while let Some(request) = self.ports[cluster][channel].special.pop_front() {
            self.handle_res_grant_flits(request, cluster, channel);
        }
        if !link_busy {
            self.handle_non_res_flits(cluster, channel);
        }

        let port = &mut self.ports[cluster][channel];
        while port.inject_credits > 0 {
            let Some(pending) = port.inject.pop_front() else {
                break;
            };
            port.inject_credits -= 1;
            self.clusters[cluster].write_flit(pending.flit, terminal);
            if pending.from_link {
                self.bridge.return_credit(cluster, channel);
            }
        }
    }

    pub fn queued_at_ports(&self) -> usize {
        self.ports.iter().flatten().map(PortState::queued).sum()
    }

    pub fn is_idle(&self) -> bool {
        self.queued_at_ports() == 0
            && self.bridge.in_flight() == 0
            && self.clusters.iter().all(|c| c.is_idle())
    }
}

impl TimedModule for SuperNetwork {
    fn read_inputs(&mut self) {
        for cluster in self.clusters.iter_mut() {
            cluster.read_inputs();
        }
        self.bridge.read_inputs();

        for c in 0..self.clusters.len() {
            for k in 0..self.bridge.channels() {
                while let Some(mut flit) = self.bridge.receive(c, k) {
                    self.route_flit(&mut flit, c, false);
                    self.ports[c][k].inject.push_back(Pending { flit, from_link: true });
                }
                let terminal = self.bridge.port_terminal(k);
                while self.clusters[c].read_credit(terminal).is_some() {
                    self.ports[c][k].inject_credits += 1;
                }
            }
        }
    }

    fn evaluate(&mut self) {
        let epoch = self.current_epoch();
        if epoch != self.engine.current_epoch() {
            self.engine.increment_epoch(epoch);
            if epoch % 1000 == 0 {
                info!("cycle {}: reservation epoch {}", self.base.cycle, epoch);
            }
        }

        for cluster in self.clusters.iter_mut() {
            cluster.evaluate();
        }
        for c in 0..self.clusters.len() {
            for k in 0..self.bridge.channels() {
                self.process_port(c, k);
            }
        }
    }

    fn write_outputs(&mut self) {
        for cluster in self.clusters.iter_mut() {
            cluster.write_outputs();
        }
        self.bridge.write_outputs();
        self.base.advance();
    }
}
