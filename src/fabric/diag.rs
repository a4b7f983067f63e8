use std::io::{self, Write};

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::fabric::SuperNetwork;
use crate::subnet::{ChannelInfo, Endpoint, RouterInfo};

impl SuperNetwork {
    /// Rewrite a cluster-local endpoint into fabric-wide ids.
    fn globalize(&self, endpoint: Endpoint, cluster: usize) -> Endpoint {
        match endpoint {
            Endpoint::Router(r) => Endpoint::Router(self.global_router(r, cluster)),
            Endpoint::Node(t) if t < self.nodes_per_cluster => Endpoint::Node(self.global_node(t, cluster)),
            Endpoint::Node(t) => Endpoint::Port {
                cluster,
                port: t - self.nodes_per_cluster,
            },
            port @ Endpoint::Port { .. } => port,
        }
    }

    /// Every channel of the fabric: cluster channels first, then transition links.
    pub fn get_channels(&self) -> Vec<ChannelInfo> {
        let mut channels = Vec::new();
        for (c, cluster) in self.clusters.iter().enumerate() {
            for info in cluster.channels() {
                channels.push(ChannelInfo {
                    id: channels.len(),
                    src: self.globalize(info.src, c),
                    dst: self.globalize(info.dst, c),
                    ..info
                });
            }
        }
        for ((c, k), tl) in self.bridge.links() {
            channels.push(ChannelInfo {
                id: channels.len(),
                name: tl.link.name().to_string(),
                src: Endpoint::Port { cluster: c, port: k },
                dst: Endpoint::Port {
                    cluster: tl.dst,
                    port: k,
                },
                latency: tl.link.latency(),
                faulty: tl.link.is_faulty(),
                sent: tl.link.flit.sent(),
            });
        }
        channels
    }

    pub fn get_routers(&self) -> Vec<RouterInfo> {
        self.clusters
            .iter()
            .enumerate()
            .flat_map(|(c, cluster)| {
                cluster.routers().into_iter().map(move |r| RouterInfo {
                    id: c * self.routers_per_cluster + r.id,
                    ..r
                })
            })
            .collect()
    }

    /// Fail `[fabric] link_failures` router channels, placed by `fail_seed`.
    /// Returns how many distinct channels ended up faulty.
    pub fn insert_random_faults(&mut self) -> usize {
        let count = self.config.link_failures;
        if count == 0 {
            return 0;
        }
        let mut rng = StdRng::seed_from_u64(self.config.fail_seed);
        let mut placed = 0;
        for _ in 0..count {
            let c = rng.gen_range(0..self.clusters.len());
            placed += self.clusters[c].insert_random_faults(1, &mut rng);
        }
        if placed < count {
            warn!("fabric: placed {} of {} requested link failures", placed, count);
        } else {
            info!("fabric: placed {} link failures (seed {})", placed, self.config.fail_seed);
        }
        placed
    }

    pub fn out_channel_fault(&mut self, router: usize, chan: usize, fault: bool) {
        let (local, cluster) = self.map_router(router);
        self.clusters[cluster].out_channel_fault(local, chan, fault);
    }

    pub fn transition_fault(&mut self, cluster: usize, channel: usize, fault: bool) {
        self.bridge.set_fault(cluster, channel, fault);
    }

    /// Uniform-traffic capacity of the slowest cluster.
    pub fn capacity(&self) -> f64 {
        self.clusters
            .iter()
            .map(|c| c.capacity())
            .fold(f64::INFINITY, f64::min)
    }

    pub fn display(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(
            out,
            "fabric: {} clusters, {} nodes, {} routers, cycle {}",
            self.clusters.len(),
            self.config.nodes,
            self.num_routers(),
            self.base.cycle
        )?;
        for (c, cluster) in self.clusters.iter().enumerate() {
            writeln!(
                out,
                "  cluster {} ({}): {} kind, {} terminals, {} routers, {} channels",
                c,
                cluster.name(),
                cluster.kind(),
                cluster.num_nodes(),
                cluster.num_routers(),
                cluster.num_channels()
            )?;
        }
        writeln!(
            out,
            "  transition: {} topology, {} channels per cluster, latency {}, {} bottleneck",
            self.bridge.adjacency(),
            self.bridge.channels(),
            self.bridge.latency(),
            self.engine.bottleneck_channels()
        )?;
        writeln!(
            out,
            "  reservation: epoch {}, covers up to cycle {}",
            self.engine.current_epoch(),
            self.engine.max_timestamp_covered()
        )
    }

    pub fn dump_channel_map(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "# id name src dst latency faulty sent")?;
        for ch in self.get_channels() {
            writeln!(
                out,
                "{} {} [{}] [{}] {} {} {}",
                ch.id, ch.name, ch.src, ch.dst, ch.latency, ch.faulty as u8, ch.sent
            )?;
        }
        Ok(())
    }

    pub fn dump_node_map(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "# global cluster local")?;
        for g in 0..self.config.nodes {
            let (local, cluster) = self.map_node(g);
            writeln!(out, "{} {} {}", g, cluster, local)?;
        }
        Ok(())
    }
}
