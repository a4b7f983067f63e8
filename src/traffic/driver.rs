use std::collections::VecDeque;

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::fabric::reservation::ReservationEngine;
use crate::fabric::SuperNetwork;
use crate::flit::{Credit, Flit, FlitClass, FlowId};
use crate::timeq::Cycle;
use crate::traffic::config::TrafficConfig;
use crate::traffic::logging::TrafficLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReservationState {
    Ready,
    Waiting,
    Backoff { until: Cycle },
}

#[derive(Debug)]
struct Reservation {
    flow: FlowId,
    dest: usize,
    ctime: Cycle,
    attempts: u32,
    state: ReservationState,
}

#[derive(Debug)]
struct NodeState {
    credits: usize,
    reserving: bool,
    queue: VecDeque<Flit>,
    /// Only the front entry talks to the fabric.
    reservations: VecDeque<Reservation>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub sum: u64,
    pub min: Option<Cycle>,
    pub max: Cycle,
}

impl LatencyStats {
    pub fn record(&mut self, latency: Cycle) {
        self.count += 1;
        self.sum += latency;
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = self.max.max(latency);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DriverStats {
    pub generated: u64,
    pub injected: u64,
    pub delivered: u64,
    pub reserved_delivered: u64,
    pub requests: u64,
    pub grants: u64,
    pub denies: u64,
    pub retries: u64,
    pub cluster_hops: u64,
    pub latency: LatencyStats,
    pub reserved_latency: LatencyStats,
}

/// Synthetic source/sink for every fabric node. Call `tick` once per cycle
/// between the fabric's `read_inputs` and `evaluate`.
pub struct TrafficDriver {
    config: TrafficConfig,
    rng: StdRng,
    nodes: Vec<NodeState>,
    next_flit_id: u64,
    next_flow: FlowId,
    stats: DriverStats,
}

impl TrafficDriver {
    pub fn new(config: TrafficConfig, fabric: &SuperNetwork) -> Self {
        assert!(
            (0.0..=1.0).contains(&config.injection_rate),
            "injection_rate must be in [0, 1]"
        );
        let mut rng = StdRng::seed_from_u64(config.seed);
        let credits = fabric.get_cluster(0).buffer_depth();
        let nodes: Vec<NodeState> = (0..fabric.num_nodes())
            .map(|_| NodeState {
                credits,
                reserving: rng.gen_bool(config.reserving_fraction.clamp(0.0, 1.0)),
                queue: VecDeque::new(),
                reservations: VecDeque::new(),
            })
            .collect();
        info!(
            "traffic: {} nodes, rate {}, {} reserving, {:?} pattern",
            nodes.len(),
            config.injection_rate,
            nodes.iter().filter(|n| n.reserving).count(),
            config.pattern
        );
        Self {
            config,
            rng,
            nodes,
            next_flit_id: 0,
            next_flow: 0,
            stats: DriverStats::default(),
        }
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn is_reserving(&self, node: usize) -> bool {
        self.nodes[node].reserving
    }

    /// Packets generated but not yet handed to the fabric.
    pub fn backlog(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.queue.len() + n.reservations.len())
            .sum()
    }

    fn alloc_flit_id(&mut self) -> u64 {
        let id = self.next_flit_id;
        self.next_flit_id += 1;
        id
    }

    fn alloc_flow(&mut self) -> FlowId {
        let flow = self.next_flow;
        self.next_flow += 1;
        flow
    }

    pub fn tick(&mut self, fabric: &mut SuperNetwork, inject: bool) {
        let now = fabric.cycle();
        for node in 0..self.nodes.len() {
            while fabric.read_credit(node).is_some() {
                self.nodes[node].credits += 1;
            }
            while let Some(flit) = fabric.read_flit(node) {
                fabric.write_credit(Credit::new(), node);
                self.receive(node, flit, now);
            }
        }
        for node in 0..self.nodes.len() {
            if inject && self.rng.gen_bool(self.config.injection_rate) {
                self.generate(node, now, fabric);
            }
            self.issue(node, now, fabric);
        }
    }

    fn receive(&mut self, node: usize, flit: Flit, now: Cycle) {
        if self.config.logging.print_traffic_lines {
            if flit.class.is_reply() {
                TrafficLogger::log_reply(node, &flit, now);
            } else {
                TrafficLogger::log_delivery(node, &flit, now);
            }
        }
        match flit.class {
            FlitClass::Grant | FlitClass::Deny => self.handle_reply(node, flit, now),
            class => {
                let latency = now.saturating_sub(flit.ctime);
                self.stats.delivered += 1;
                self.stats.cluster_hops += flit.cluster_hops as u64;
                self.stats.latency.record(latency);
                if class == FlitClass::Reserved {
                    self.stats.reserved_delivered += 1;
                    self.stats.reserved_latency.record(latency);
                }
            }
        }
    }

    fn handle_reply(&mut self, node: usize, reply: Flit, now: Cycle) {
        let backoff = self.config.retry_backoff;
        let state = &mut self.nodes[node];
        let Some(front) = state.reservations.front_mut() else {
            debug!("node {}: stray {:?} for flow {}", node, reply.class, reply.flow_id);
            return;
        };
        if front.flow != reply.flow_id || front.state != ReservationState::Waiting {
            debug!("node {}: stray {:?} for flow {}", node, reply.class, reply.flow_id);
            return;
        }
        if reply.class == FlitClass::Deny {
            self.stats.denies += 1;
            front.state = ReservationState::Backoff { until: now + backoff };
            return;
        }
        self.stats.grants += 1;
        let Some(granted) = state.reservations.pop_front() else {
            return;
        };
        let id = self.alloc_flit_id();
        let mut data = Flit::new(id, granted.flow, FlitClass::Reserved, node, granted.dest, granted.ctime);
        data.res_timestamp = reply.res_timestamp;
        self.nodes[node].queue.push_back(data);
    }

    fn generate(&mut self, node: usize, now: Cycle, fabric: &SuperNetwork) {
        let nodes = self.nodes.len();
        let dest = self.config.pattern.dest(node, nodes, &mut self.rng);
        if dest == node {
            return;
        }
        self.stats.generated += 1;
        let flow = self.alloc_flow();
        let crosses = fabric.map_node(dest).1 != fabric.map_node(node).1;
        if self.nodes[node].reserving && crosses {
            self.nodes[node].reservations.push_back(Reservation {
                flow,
                dest,
                ctime: now,
                attempts: 0,
                state: ReservationState::Ready,
            });
        } else {
            let id = self.alloc_flit_id();
            self.nodes[node]
                .queue
                .push_back(Flit::new(id, flow, FlitClass::Ordinary, node, dest, now));
        }
    }

    /// Hand at most one flit of `node` to the fabric: a pending request first,
    /// then the oldest queued packet.
    fn issue(&mut self, node: usize, now: Cycle, fabric: &mut SuperNetwork) {
        if let Some(front) = self.nodes[node].reservations.front_mut() {
            if let ReservationState::Backoff { until } = front.state {
                if now >= until {
                    front.state = ReservationState::Ready;
                }
            }
        }
        let ready = self.nodes[node]
            .reservations
            .front()
            .filter(|r| r.state == ReservationState::Ready)
            .map(|r| (r.flow, r.dest, r.attempts));
        if let Some((flow, dest, attempts)) = ready {
            if self.nodes[node].credits == 0 {
                return;
            }
            let id = self.alloc_flit_id();
            let mut request = Flit::new(id, flow, FlitClass::Request, node, dest, now);
            ReservationEngine::initialize_bit_vector(
                &mut request,
                fabric.config().bit_vector_length,
                fabric.current_epoch(),
            );
            if !fabric.write_special_flit(request, node) {
                self.nodes[node].credits -= 1;
            }
            self.stats.requests += 1;
            if attempts > 0 {
                self.stats.retries += 1;
            }
            if let Some(front) = self.nodes[node].reservations.front_mut() {
                front.attempts += 1;
                front.state = ReservationState::Waiting;
            }
            return;
        }

        let state = &mut self.nodes[node];
        if state.credits == 0 {
            return;
        }
        if let Some(flit) = state.queue.pop_front() {
            state.credits -= 1;
            self.stats.injected += 1;
            fabric.write_flit(flit, node);
        }
    }
}
