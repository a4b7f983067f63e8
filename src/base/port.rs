//! `Link` models a flit channel together with the credit channel that runs the
//! opposite way. Pairing them in one record keeps a credit from ever being
//! returned on the wrong channel.
use crate::flit::{Credit, Flit};
use crate::timeq::{Cycle, DelayLine};

#[derive(Debug)]
pub struct Link {
    name: String,
    pub flit: DelayLine<Flit>,
    pub credit: DelayLine<Credit>,
    latency: Cycle,
}

impl Link {
    pub fn new(name: impl Into<String>, latency: Cycle) -> Self {
        let name = name.into();
        Self {
            flit: DelayLine::new(format!("{name}.flit"), latency),
            credit: DelayLine::new(format!("{name}.credit"), latency),
            name,
            latency,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn latency(&self) -> Cycle {
        self.latency
    }

    pub fn read_inputs(&mut self) {
        self.flit.read_inputs();
        self.credit.read_inputs();
    }

    pub fn write_outputs(&mut self) {
        self.flit.write_outputs();
        self.credit.write_outputs();
    }

    pub fn set_fault(&mut self, fault: bool) {
        self.flit.set_fault(fault);
    }

    pub fn is_faulty(&self) -> bool {
        self.flit.is_faulty()
    }
}

/// Link a vector of `count` channels named `{prefix}{i}`.
pub fn link_vec(prefix: &str, count: usize, latency: Cycle) -> Vec<Link> {
    (0..count)
        .map(|i| Link::new(format!("{prefix}{i}"), latency))
        .collect()
}
