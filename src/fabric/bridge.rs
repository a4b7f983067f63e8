use std::fmt::{Display, Formatter};

use log::{debug, info};
use serde::Deserialize;

use crate::base::port::Link;
use crate::flit::{Credit, Flit};
use crate::subnet::Subnet;
use crate::timeq::Cycle;

/// Which clusters a cluster's transition channels lead to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Adjacency {
    /// `c -> c + 1 mod n`
    #[default]
    Ring,
    /// Channel `k` of `c` leads to `c + 1 + k mod (n - 1)`.
    Full,
}

impl Display for Adjacency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Adjacency::Ring => write!(f, "ring"),
            Adjacency::Full => write!(f, "full"),
        }
    }
}

#[derive(Debug)]
pub struct TransitionLink {
    pub link: Link,
    /// Cluster the link lands in; it enters through the port with the same index.
    pub dst: usize,
    /// Free slots in the ingress queue at `dst`.
    pub credits: usize,
    pub forwarded: u64,
}

/// Inter-cluster links, two-level `[cluster][channel]`.
///
/// Port `k` of a cluster is the terminal right after its endpoint nodes. It is the
/// egress point of that cluster's link `k` and the ingress point of the single
/// link that lands on `(cluster, k)`.
pub struct TransitionBridge {
    adjacency: Adjacency,
    clusters: usize,
    channels: usize,
    latency: Cycle,
    depth: usize,
    /// Local terminal id of port 0.
    port_base: usize,
    links: Vec<Vec<TransitionLink>>,
    sources: Vec<Vec<Option<usize>>>,
}

impl TransitionBridge {
    pub fn new(
        adjacency: Adjacency,
        clusters: usize,
        channels: usize,
        latency: Cycle,
        depth: usize,
        port_base: usize,
    ) -> Self {
        let mut bridge = Self {
            adjacency,
            clusters,
            channels,
            latency,
            depth,
            port_base,
            links: Vec::new(),
            sources: Vec::new(),
        };
        bridge.connect();
        bridge
    }

    /// Wire `channels` links out of every cluster.
    pub fn connect(&mut self) {
        let (n, m) = (self.clusters, self.channels);
        self.sources = vec![vec![None; m]; n];
        self.links = Vec::with_capacity(n);
        if n <= 1 {
            self.links = (0..n).map(|_| Vec::new()).collect();
            return;
        }
        for c in 0..n {
            let mut out = Vec::with_capacity(m);
            for k in 0..m {
                let dst = self.next_cluster(c, k);
                let ingress = &mut self.sources[dst][k];
                assert!(
                    ingress.is_none(),
                    "cluster {} port {} already has an inbound link from cluster {:?}",
                    dst,
                    k,
                    ingress
                );
                *ingress = Some(c);
                out.push(TransitionLink {
                    link: Link::new(format!("tc{c}.{k}"), self.latency),
                    dst,
                    credits: self.depth,
                    forwarded: 0,
                });
            }
            self.links.push(out);
        }
        info!(
            "bridge: {} topology, {} clusters x {} channels, latency {}",
            self.adjacency, n, m, self.latency
        );
    }

    pub fn adjacency(&self) -> Adjacency {
        self.adjacency
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn latency(&self) -> Cycle {
        self.latency
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn port_terminal(&self, channel: usize) -> usize {
        self.port_base + channel
    }

    pub fn next_cluster(&self, cluster: usize, channel: usize) -> usize {
        let n = self.clusters;
        assert!(cluster < n, "cluster {} out of range [0, {})", cluster, n);
        assert!(
            channel < self.channels && n > 1,
            "cluster {} has no transition channel {}",
            cluster,
            channel
        );
        match self.adjacency {
            Adjacency::Ring => (cluster + 1) % n,
            Adjacency::Full => (cluster + 1 + channel % (n - 1)) % n,
        }
    }

    /// Cluster whose link `channel` lands on port `channel` of `cluster`.
    pub fn source_cluster(&self, cluster: usize, channel: usize) -> Option<usize> {
        self.sources
            .get(cluster)
            .and_then(|ports| ports.get(channel))
            .copied()
            .flatten()
    }

    pub fn link(&self, cluster: usize, channel: usize) -> &TransitionLink {
        self.links
            .get(cluster)
            .and_then(|out| out.get(channel))
            .unwrap_or_else(|| panic!("no transition link wired at cluster {} channel {}", cluster, channel))
    }

    fn link_mut(&mut self, cluster: usize, channel: usize) -> &mut TransitionLink {
        self.links
            .get_mut(cluster)
            .and_then(|out| out.get_mut(channel))
            .unwrap_or_else(|| panic!("no transition link wired at cluster {} channel {}", cluster, channel))
    }

    pub fn links(&self) -> impl Iterator<Item = ((usize, usize), &TransitionLink)> {
        self.links
            .iter()
            .enumerate()
            .flat_map(|(c, out)| out.iter().enumerate().map(move |(k, l)| ((c, k), l)))
    }

    /// A send on `(cluster, channel)` would be accepted this cycle.
    pub fn can_send(&self, cluster: usize, channel: usize) -> bool {
        let tl = self.link(cluster, channel);
        tl.credits > 0 && !tl.link.is_faulty()
    }

    pub fn set_fault(&mut self, cluster: usize, channel: usize, fault: bool) {
        self.link_mut(cluster, channel).link.set_fault(fault);
    }

    /// Put `flit` on link `(cluster, channel)` and hand `credit` back to the port
    /// terminal the flit was ejected from.
    pub fn send(&mut self, mut flit: Flit, credit: Credit, cluster: usize, channel: usize, subnet: &mut dyn Subnet) {
        let port = self.port_terminal(channel);
        let tl = self.link_mut(cluster, channel);
        assert!(
            tl.credits > 0,
            "{}: send without a link credit",
            tl.link.name()
        );
        tl.credits -= 1;
        tl.forwarded += 1;
        flit.cluster_hops += 1;
        flit.link_entered = tl.link.flit.now();
        debug!("{}: {} -> cluster {}", tl.link.name(), flit, tl.dst);
        tl.link.flit.send(flit);
        subnet.write_credit(credit, port);
    }

    /// Next flit that arrived at port `channel` of `cluster`.
    pub fn receive(&mut self, cluster: usize, channel: usize) -> Option<Flit> {
        let src = self.source_cluster(cluster, channel)?;
        let line = &mut self.link_mut(src, channel).link.flit;
        let mut flit = line.receive()?;
        flit.transition_cycles += line.now() - flit.link_entered;
        Some(flit)
    }

    /// Free an ingress slot at port `channel` of `cluster`.
    pub fn return_credit(&mut self, cluster: usize, channel: usize) {
        let src = self
            .source_cluster(cluster, channel)
            .unwrap_or_else(|| panic!("cluster {} port {} has no inbound link", cluster, channel));
        self.link_mut(src, channel).link.credit.send(Credit::new());
    }

    pub fn read_inputs(&mut self) {
        let depth = self.depth;
        for tl in self.links.iter_mut().flatten() {
            tl.link.read_inputs();
            while tl.link.credit.receive().is_some() {
                tl.credits += 1;
                debug_assert!(tl.credits <= depth);
            }
        }
    }

    pub fn write_outputs(&mut self) {
        for tl in self.links.iter_mut().flatten() {
            tl.link.write_outputs();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.links
            .iter()
            .flatten()
            .map(|tl| tl.link.flit.occupancy())
            .sum()
    }
}
