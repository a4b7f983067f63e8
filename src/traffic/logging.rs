use crate::flit::Flit;
use crate::timeq::Cycle;

pub struct TrafficLogger;

impl TrafficLogger {
    pub fn log_delivery(node: usize, flit: &Flit, cycle: Cycle) {
        println!(
            "[TRAFFIC] node {} got {} at time {:>10} (latency {})",
            node,
            flit,
            cycle,
            cycle.saturating_sub(flit.ctime)
        );
    }

    pub fn log_reply(node: usize, flit: &Flit, cycle: Cycle) {
        println!(
            "[TRAFFIC] node {} flow {} {:?} at time {:>10}, slot at {:?}",
            node, flit.flow_id, flit.class, cycle, flit.res_timestamp
        );
    }
}
