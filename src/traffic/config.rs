use serde::Deserialize;

use crate::sim::config::Config;
use crate::traffic::patterns::DestPattern;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    /// Packets offered per node per cycle.
    pub injection_rate: f64,
    /// Share of nodes that reserve a slot before sending across clusters.
    pub reserving_fraction: f64,
    /// Cycles a denied node waits before asking again.
    pub retry_backoff: u64,
    pub pattern: DestPattern,
    pub seed: u64,
    pub logging: TrafficLoggingConfig,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            injection_rate: 0.05,
            reserving_fraction: 0.0,
            retry_backoff: 16,
            pattern: DestPattern::Uniform,
            seed: 1,
            logging: TrafficLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TrafficLoggingConfig {
    pub print_traffic_lines: bool,
}
