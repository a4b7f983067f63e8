use log::{info, warn};
use rand::rngs::StdRng;
use rand::Rng;

use crate::base::module::TimedModule;
use crate::base::port::{link_vec, Link};
use crate::flit::{Credit, Flit};
use crate::subnet::router::{PortEnd, Router};
use crate::subnet::{ChannelInfo, Endpoint, RouterInfo, Subnet, SubnetConfig, SubnetKind};

#[derive(Debug, Clone, Copy)]
struct LinkEnds {
    src: (usize, usize),
    dst: (usize, usize),
}

/// Router-based cluster. Terminals attach to routers through an injection link
/// (flit in, credit out) and an ejection link (flit out, credit in).
pub struct RouterNetwork {
    name: String,
    kind: SubnetKind,
    buffer_depth: usize,
    routers: Vec<Router>,
    injection: Vec<Link>,
    ejection: Vec<Link>,
    links: Vec<Link>,
    injection_ports: Vec<(usize, usize)>,
    ejection_ports: Vec<(usize, usize)>,
    link_ends: Vec<LinkEnds>,
}

impl RouterNetwork {
    pub fn crossbar(name: impl Into<String>, config: &SubnetConfig, terminals: usize) -> Self {
        Self::build(name.into(), SubnetKind::Crossbar, config, terminals, 1, |_| 0)
    }

    pub fn ring(name: impl Into<String>, config: &SubnetConfig, terminals: usize) -> Self {
        Self::build(name.into(), SubnetKind::Ring, config, terminals, terminals, |t| t)
    }

    fn build(
        name: String,
        kind: SubnetKind,
        config: &SubnetConfig,
        terminals: usize,
        num_routers: usize,
        router_of: impl Fn(usize) -> usize,
    ) -> Self {
        assert!(terminals > 0, "{}: a cluster needs at least one terminal", name);
        let depth = config.buffer_depth;
        let latency = config.channel_latency;
        let bubble = kind == SubnetKind::Ring;
        let mut routers: Vec<Router> = (0..num_routers)
            .map(|r| Router::new(r, depth, bubble))
            .collect();

        let mut injection_ports = Vec::with_capacity(terminals);
        let mut ejection_ports = Vec::with_capacity(terminals);
        for t in 0..terminals {
            let r = router_of(t);
            injection_ports.push((r, routers[r].add_input(PortEnd::Terminal(t))));
            ejection_ports.push((r, routers[r].add_output(PortEnd::Terminal(t))));
        }

        let num_links = match kind {
            SubnetKind::Ring if num_routers > 1 => num_routers,
            _ => 0,
        };
        let mut link_ends = Vec::with_capacity(num_links);
        let mut ring_output = vec![None; num_routers];
        for l in 0..num_links {
            let src = l;
            let dst = (l + 1) % num_routers;
            let out = routers[src].add_output(PortEnd::Link(l));
            let inp = routers[dst].add_input(PortEnd::Link(l));
            ring_output[src] = Some(out);
            link_ends.push(LinkEnds {
                src: (src, out),
                dst: (dst, inp),
            });
        }

        for (r, router) in routers.iter_mut().enumerate() {
            let route = (0..terminals)
                .map(|t| {
                    if router_of(t) == r {
                        ejection_ports[t].1
                    } else {
                        ring_output[r].expect("multi-router cluster without ring links")
                    }
                })
                .collect();
            router.set_route(route);
        }

        info!(
            "{}: built {} cluster with {} terminals, {} routers",
            name, kind, terminals, num_routers
        );
        Self {
            injection: link_vec(&format!("{name}.inj"), terminals, latency),
            ejection: link_vec(&format!("{name}.ej"), terminals, latency),
            links: link_vec(&format!("{name}.link"), num_links, latency),
            name,
            kind,
            buffer_depth: depth,
            routers,
            injection_ports,
            ejection_ports,
            link_ends,
        }
    }

    fn check_node(&self, node: usize) {
        assert!(
            node < self.injection.len(),
            "{}: node {} out of range [0, {})",
            self.name,
            node,
            self.injection.len()
        );
    }

    fn sink_link_mut(&mut self, sink: PortEnd) -> &mut Link {
        match sink {
            PortEnd::Terminal(t) => &mut self.ejection[t],
            PortEnd::Link(l) => &mut self.links[l],
        }
    }
}

impl TimedModule for RouterNetwork {
    fn read_inputs(&mut self) {
        self.injection
            .iter_mut()
            .chain(self.ejection.iter_mut())
            .chain(self.links.iter_mut())
            .for_each(Link::read_inputs);

        for t in 0..self.injection.len() {
            let (r, input) = self.injection_ports[t];
            while let Some(flit) = self.injection[t].flit.receive() {
                self.routers[r].accept(input, flit);
            }
            let (r, output) = self.ejection_ports[t];
            while self.ejection[t].credit.receive().is_some() {
                self.routers[r].return_credit(output);
            }
        }
        for l in 0..self.links.len() {
            let ends = self.link_ends[l];
            while let Some(flit) = self.links[l].flit.receive() {
                self.routers[ends.dst.0].accept(ends.dst.1, flit);
            }
            while self.links[l].credit.receive().is_some() {
                self.routers[ends.src.0].return_credit(ends.src.1);
            }
        }
    }

    fn evaluate(&mut self) {
        for r in 0..self.routers.len() {
            for transfer in self.routers[r].arbitrate() {
                let sink = self.routers[r].output(transfer.output).sink;
                let source = self.routers[r].input(transfer.input).source;
                self.sink_link_mut(sink).flit.send(transfer.flit);
                match source {
                    PortEnd::Terminal(t) => self.injection[t].credit.send(Credit::new()),
                    PortEnd::Link(l) => self.links[l].credit.send(Credit::new()),
                }
            }
        }
    }

    fn write_outputs(&mut self) {
        self.injection
            .iter_mut()
            .chain(self.ejection.iter_mut())
            .chain(self.links.iter_mut())
            .for_each(Link::write_outputs);
    }
}

impl Subnet for RouterNetwork {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SubnetKind {
        self.kind
    }

    fn num_nodes(&self) -> usize {
        self.injection.len()
    }

    fn num_routers(&self) -> usize {
        self.routers.len()
    }

    fn num_channels(&self) -> usize {
        self.links.len() + self.injection.len() + self.ejection.len()
    }

    fn buffer_depth(&self) -> usize {
        self.buffer_depth
    }

    fn write_flit(&mut self, flit: Flit, node: usize) {
        self.check_node(node);
        self.injection[node].flit.send(flit);
    }

    fn read_flit(&mut self, node: usize) -> Option<Flit> {
        self.check_node(node);
        self.ejection[node].flit.receive()
    }

    fn write_credit(&mut self, credit: Credit, node: usize) {
        self.check_node(node);
        self.ejection[node].credit.send(credit);
    }

    fn read_credit(&mut self, node: usize) -> Option<Credit> {
        self.check_node(node);
        self.injection[node].credit.receive()
    }

    fn out_channel_fault(&mut self, router: usize, chan: usize, fault: bool) {
        assert!(
            router < self.routers.len(),
            "{}: router {} out of range",
            self.name,
            router
        );
        self.routers[router].set_output_fault(chan, fault);
        let sink = self.routers[router].output(chan).sink;
        self.sink_link_mut(sink).set_fault(fault);
    }

    fn insert_random_faults(&mut self, count: usize, rng: &mut StdRng) -> usize {
        if self.links.is_empty() {
            warn!("{}: no router-to-router channels to fail", self.name);
            return 0;
        }
        let mut placed = 0;
        for _ in 0..count {
            let l = rng.gen_range(0..self.links.len());
            let (router, output) = self.link_ends[l].src;
            if !self.links[l].is_faulty() {
                placed += 1;
            }
            self.out_channel_fault(router, output, true);
        }
        placed
    }

    fn channels(&self) -> Vec<ChannelInfo> {
        let mut channels = Vec::with_capacity(self.num_channels());
        for (l, link) in self.links.iter().enumerate() {
            channels.push(ChannelInfo {
                id: channels.len(),
                name: link.name().to_string(),
                src: Endpoint::Router(self.link_ends[l].src.0),
                dst: Endpoint::Router(self.link_ends[l].dst.0),
                latency: link.latency(),
                faulty: link.is_faulty(),
                sent: link.flit.sent(),
            });
        }
        for (t, link) in self.injection.iter().enumerate() {
            channels.push(ChannelInfo {
                id: channels.len(),
                name: link.name().to_string(),
                src: Endpoint::Node(t),
                dst: Endpoint::Router(self.injection_ports[t].0),
                latency: link.latency(),
                faulty: link.is_faulty(),
                sent: link.flit.sent(),
            });
        }
        for (t, link) in self.ejection.iter().enumerate() {
            channels.push(ChannelInfo {
                id: channels.len(),
                name: link.name().to_string(),
                src: Endpoint::Router(self.ejection_ports[t].0),
                dst: Endpoint::Node(t),
                latency: link.latency(),
                faulty: link.is_faulty(),
                sent: link.flit.sent(),
            });
        }
        channels
    }

    fn routers(&self) -> Vec<RouterInfo> {
        self.routers
            .iter()
            .map(|r| RouterInfo {
                id: r.id(),
                name: format!("{}.r{}", self.name, r.id()),
                inputs: r.num_inputs(),
                outputs: r.num_outputs(),
                forwarded: r.forwarded(),
            })
            .collect()
    }

    fn capacity(&self) -> f64 {
        match self.kind {
            SubnetKind::Crossbar => 1.0,
            SubnetKind::Ring => {
                let n = self.routers.len();
                if n <= 1 {
                    1.0
                } else {
                    (2.0 / (n - 1) as f64).min(1.0)
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.routers.iter().all(|r| r.buffered() == 0)
            && self
                .injection
                .iter()
                .chain(self.ejection.iter())
                .chain(self.links.iter())
                .all(|l| l.flit.is_idle())
    }
}
