//! Sub-networks ("clusters") as seen by the fabric.
//!
//! The fabric only relies on the [`Subnet`] capability interface. Concrete
//! clusters are chosen from a closed set by the `[subnet] topology` key.

pub mod config;
pub mod network;
pub mod router;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use phf::phf_map;
use rand::rngs::StdRng;
use serde::Deserialize;

use crate::base::module::TimedModule;
use crate::flit::{Credit, Flit};
use crate::timeq::Cycle;

pub use config::SubnetConfig;
pub use network::RouterNetwork;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(try_from = "String")]
pub enum SubnetKind {
    #[default]
    Crossbar,
    Ring,
}

static SUBNET_KINDS: phf::Map<&'static str, SubnetKind> = phf_map! {
    "crossbar" => SubnetKind::Crossbar,
    "xbar" => SubnetKind::Crossbar,
    "ring" => SubnetKind::Ring,
};

impl FromStr for SubnetKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SUBNET_KINDS
            .get(value.to_ascii_lowercase().as_str())
            .copied()
            .ok_or_else(|| {
                format!(
                    "unsupported subnet topology '{}', expected one of: crossbar, xbar, ring",
                    value
                )
            })
    }
}

impl TryFrom<String> for SubnetKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for SubnetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SubnetKind::Crossbar => write!(f, "crossbar"),
            SubnetKind::Ring => write!(f, "ring"),
        }
    }
}

/// One end of a channel, in the id space of whoever reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Router(usize),
    Node(usize),
    Port { cluster: usize, port: usize },
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Router(r) => write!(f, "router {}", r),
            Endpoint::Node(n) => write!(f, "node {}", n),
            Endpoint::Port { cluster, port } => write!(f, "cluster {} port {}", cluster, port),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub id: usize,
    pub name: String,
    pub src: Endpoint,
    pub dst: Endpoint,
    pub latency: Cycle,
    pub faulty: bool,
    pub sent: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouterInfo {
    pub id: usize,
    pub name: String,
    pub inputs: usize,
    pub outputs: usize,
    pub forwarded: u64,
}

/// Capability interface of a cluster. Terminal ids are local to the cluster.
pub trait Subnet: TimedModule {
    fn name(&self) -> &str;

    fn kind(&self) -> SubnetKind;

    fn num_nodes(&self) -> usize;

    fn num_routers(&self) -> usize;

    fn num_channels(&self) -> usize;

    /// Injection credits a terminal starts with.
    fn buffer_depth(&self) -> usize;

    fn write_flit(&mut self, flit: Flit, node: usize);

    fn read_flit(&mut self, node: usize) -> Option<Flit>;

    fn write_credit(&mut self, credit: Credit, node: usize);

    fn read_credit(&mut self, node: usize) -> Option<Credit>;

    fn out_channel_fault(&mut self, router: usize, chan: usize, fault: bool);

    fn insert_random_faults(&mut self, count: usize, rng: &mut StdRng) -> usize;

    fn channels(&self) -> Vec<ChannelInfo>;

    fn routers(&self) -> Vec<RouterInfo>;

    /// Sustainable injection rate per node under uniform traffic, in flits/cycle.
    fn capacity(&self) -> f64;

    fn is_idle(&self) -> bool;
}

pub fn new_subnet(config: &SubnetConfig, name: impl Into<String>, terminals: usize) -> Box<dyn Subnet> {
    match config.topology {
        SubnetKind::Crossbar => Box::new(RouterNetwork::crossbar(name, config, terminals)),
        SubnetKind::Ring => Box::new(RouterNetwork::ring(name, config, terminals)),
    }
}
