/*
Time-queue for the fabric.

Every channel in the simulator, whether it is a router-to-router link inside a cluster or a
transition link between clusters, is a `DelayLine`: a fixed-latency, order-preserving pipe that
follows the three-phase cycle protocol.

    - `send` during evaluate stages a payload,
    - `write_outputs` stamps staged payloads with `now + latency` and advances the clock,
    - `read_inputs` exposes every payload whose time has come, and `receive` pops them.

A payload sent in cycle `t` is therefore visible to a reader in cycle `t + latency`, never in the
same cycle it was written.
*/

use std::collections::VecDeque;

pub type Cycle = u64;

#[derive(Debug)]
struct Inflight<T> {
    ready_at: Cycle,
    payload: T,
}

#[derive(Debug)]
pub struct DelayLine<T> {
    name: String,
    latency: Cycle,
    now: Cycle,
    staged: VecDeque<T>,
    inflight: VecDeque<Inflight<T>>,
    arrived: VecDeque<T>,
    fault: bool,
    sent: u64,
}

impl<T> DelayLine<T> {
    pub fn new(name: impl Into<String>, latency: Cycle) -> Self {
        assert!(latency > 0, "delay line latency must be > 0");
        Self {
            name: name.into(),
            latency,
            now: 0,
            staged: VecDeque::new(),
            inflight: VecDeque::new(),
            arrived: VecDeque::new(),
            fault: false,
            sent: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn latency(&self) -> Cycle {
        self.latency
    }

    // Cycle the line is currently in.
    pub fn now(&self) -> Cycle {
        self.now
    }

    pub fn send(&mut self, payload: T) {
        self.staged.push_back(payload);
    }

    // Pop the oldest payload that has completed its flight.
    pub fn receive(&mut self) -> Option<T> {
        self.arrived.pop_front()
    }

    pub fn read_inputs(&mut self) {
        while let Some(front) = self.inflight.front() {
            if front.ready_at > self.now {
                break;
            }
            let inflight = self.inflight.pop_front().expect("front just checked");
            self.arrived.push_back(inflight.payload);
        }
    }

    pub fn write_outputs(&mut self) {
        let ready_at = self.now.saturating_add(self.latency);
        while let Some(payload) = self.staged.pop_front() {
            self.inflight.push_back(Inflight { ready_at, payload });
            self.sent = self.sent.saturating_add(1);
        }
        self.now += 1;
    }

    // Payloads anywhere in the line: staged, flying or waiting to be received.
    pub fn occupancy(&self) -> usize {
        self.staged.len() + self.inflight.len() + self.arrived.len()
    }

    pub fn is_idle(&self) -> bool {
        self.occupancy() == 0
    }

    pub fn set_fault(&mut self, fault: bool) {
        self.fault = fault;
    }

    pub fn is_faulty(&self) -> bool {
        self.fault
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}
