use serde::Deserialize;

use crate::sim::config::Config;
use crate::subnet::SubnetKind;
use crate::timeq::Cycle;

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SubnetConfig {
    pub topology: SubnetKind,
    pub buffer_depth: usize,
    pub channel_latency: Cycle,
}

impl Config for SubnetConfig {}

impl Default for SubnetConfig {
    fn default() -> Self {
        Self {
            topology: SubnetKind::Crossbar,
            buffer_depth: 4,
            channel_latency: 1,
        }
    }
}
