use crate::base::module::TimedModule;
use crate::fabric::bridge::Adjacency;
use crate::fabric::reservation::ReservationEngine;
use crate::fabric::{FabricConfig, Route, SuperNetwork};
use crate::flit::{Credit, Flit, FlitClass};
use crate::subnet::{Endpoint, SubnetConfig, SubnetKind};

fn fabric(config: FabricConfig) -> SuperNetwork {
    SuperNetwork::new(config, &SubnetConfig::default()).expect("valid config")
}

/// One cycle with every node draining its ejection queue and returning credits.
fn step(fab: &mut SuperNetwork, inbox: &mut Vec<(usize, Flit)>) {
    fab.read_inputs();
    for node in 0..fab.num_nodes() {
        while let Some(flit) = fab.read_flit(node) {
            fab.write_credit(Credit::new(), node);
            inbox.push((node, flit));
        }
    }
    fab.evaluate();
    fab.write_outputs();
}

fn request(id: u64, flow: usize, src: usize, dest: usize, len: usize) -> Flit {
    let mut flit = Flit::new(id, flow, FlitClass::Request, src, dest, 0);
    ReservationEngine::initialize_bit_vector(&mut flit, len, 0);
    flit
}

/// Give `flow` the first open slot at or after `earliest` on cluster 0 channel 0.
fn hold_slot(fab: &mut SuperNetwork, flow: usize, earliest: u64) {
    let len = fab.config().bit_vector_length;
    let mut holder = request(0, flow, 0, 4, len);
    fab.engine
        .reserve_bit_vector(&mut holder, 0, 0, earliest, 0)
        .expect("slot should be free");
}

#[test]
fn cross_cluster_flit_takes_one_transition_hop() {
    let mut fab = fabric(FabricConfig::default());
    fab.write_flit(Flit::new(1, 0, FlitClass::Ordinary, 0, 5, 0), 0);
    let mut inbox = Vec::new();
    for _ in 0..40 {
        step(&mut fab, &mut inbox);
    }
    assert_eq!(1, inbox.len());
    let (node, flit) = &inbox[0];
    assert_eq!(5, *node);
    assert_eq!(1, flit.cluster_hops);
    assert_eq!(4, flit.transition_cycles);
    assert_eq!(2, flit.hops);
    assert_eq!(1, fab.stats().transitions);
    assert!(fab.is_idle());
}

#[test]
fn local_flit_never_leaves_its_cluster() {
    let mut fab = fabric(FabricConfig::default());
    fab.write_flit(Flit::new(1, 0, FlitClass::Ordinary, 4, 7, 0), 4);
    let mut inbox = Vec::new();
    for _ in 0..10 {
        step(&mut fab, &mut inbox);
    }
    assert_eq!(1, inbox.len());
    assert_eq!(7, inbox[0].0);
    assert_eq!(0, inbox[0].1.cluster_hops);
    assert_eq!(0, fab.stats().transitions);
}

#[test]
fn sequential_requests_fill_slots_then_deny() {
    let mut fab = fabric(FabricConfig {
        bit_vector_length: 4,
        ..FabricConfig::default()
    });
    for (flow, src) in [0, 1, 2, 3, 0].into_iter().enumerate() {
        let id = 100 + flow as u64;
        assert!(fab.write_special_flit(request(id, flow, src, 4, 4), src));
    }
    let mut inbox = Vec::new();
    for _ in 0..20 {
        step(&mut fab, &mut inbox);
    }
    assert_eq!(5, inbox.len());
    inbox.sort_by_key(|(_, flit)| flit.id);
    for (flow, (node, reply)) in inbox.iter().enumerate().take(4) {
        assert_eq!(FlitClass::Grant, reply.class);
        assert_eq!(Some(flow as u64 * 10), reply.res_timestamp);
        assert_eq!(*node, reply.dest);
    }
    assert_eq!(FlitClass::Deny, inbox[4].1.class);
    assert_eq!(None, inbox[4].1.res_timestamp);
    assert_eq!(0, inbox[4].0);
    assert_eq!(4, fab.stats().grants);
    assert_eq!(1, fab.stats().denies);
}

#[test]
fn granted_flow_crosses_in_its_slot() {
    let mut fab = fabric(FabricConfig::default());
    assert!(fab.write_special_flit(request(1, 7, 1, 6, 16), 1));
    let mut inbox = Vec::new();
    let mut sent = false;
    for _ in 0..30 {
        fab.read_inputs();
        for node in 0..fab.num_nodes() {
            while let Some(flit) = fab.read_flit(node) {
                fab.write_credit(Credit::new(), node);
                inbox.push((node, flit));
            }
        }
        let grant = inbox
            .iter()
            .find(|(_, f)| f.class == FlitClass::Grant)
            .map(|(_, f)| f.res_timestamp);
        if let (Some(ts), false) = (grant, sent) {
            let mut data = Flit::new(2, 7, FlitClass::Reserved, 1, 6, fab.cycle());
            data.res_timestamp = ts;
            fab.write_flit(data, 1);
            sent = true;
        }
        fab.evaluate();
        fab.write_outputs();
    }
    let data = inbox
        .iter()
        .find(|(_, f)| f.id == 2)
        .expect("reserved flit should arrive");
    assert_eq!(6, data.0);
    assert_eq!(FlitClass::Reserved, data.1.class);
    assert_eq!(1, fab.stats().reserved_sent);
    assert_eq!(0, fab.stats().demoted);
    assert_eq!(1, fab.reservation_stats().consumed);
}

#[test]
fn port_serves_reserved_then_requests_then_ordinary() {
    let mut fab = fabric(FabricConfig::default());
    hold_slot(&mut fab, 7, 0);
    let mut reserved = Flit::new(1, 7, FlitClass::Reserved, 1, 5, 0);
    reserved.res_timestamp = Some(0);
    let port = &mut fab.ports[0][0];
    port.ordinary.push_back(Flit::new(2, 3, FlitClass::Ordinary, 2, 6, 0));
    port.requests.push_back(request(3, 8, 3, 7, 16));
    port.reserved.push_back(reserved);

    fab.process_port(0, 0);
    let stats = fab.stats();
    assert_eq!(1, stats.reserved_sent);
    assert_eq!(1, stats.transitions);
    assert_eq!(1, stats.grants);
    // the request was answered behind the reserved flow's slot
    assert!(fab.engine.table(0, 0)[1].holds(8));
    assert_eq!(1, fab.ports[0][0].ordinary.len());
    assert!(fab.ports[0][0].requests.is_empty());
    assert!(fab.ports[0][0].inject.is_empty());

    fab.process_port(0, 0);
    assert_eq!(2, fab.stats().transitions);
    assert!(fab.ports[0][0].ordinary.is_empty());
    assert_eq!(2, fab.bridge().link(0, 0).forwarded);
}

#[test]
fn denied_request_does_not_stall_ordinary_traffic() {
    let mut fab = fabric(FabricConfig {
        bit_vector_length: 1,
        ..FabricConfig::default()
    });
    hold_slot(&mut fab, 7, 0);
    let port = &mut fab.ports[0][0];
    port.requests.push_back(request(1, 8, 1, 5, 1));
    port.ordinary.push_back(Flit::new(2, 3, FlitClass::Ordinary, 2, 6, 0));

    fab.process_port(0, 0);
    assert_eq!(1, fab.stats().denies);
    assert_eq!(1, fab.stats().transitions);
    assert!(fab.ports[0][0].ordinary.is_empty());
}

#[test]
fn reserved_flit_waits_for_a_later_slot() {
    let mut fab = fabric(FabricConfig::default());
    hold_slot(&mut fab, 7, 10);
    let mut reserved = Flit::new(1, 7, FlitClass::Reserved, 1, 5, 0);
    reserved.res_timestamp = Some(10);
    let port = &mut fab.ports[0][0];
    port.reserved.push_back(reserved);
    port.ordinary.push_back(Flit::new(2, 3, FlitClass::Ordinary, 2, 6, 0));

    fab.process_port(0, 0);
    assert_eq!(1, fab.ports[0][0].reserved.len());
    assert_eq!(0, fab.stats().reserved_sent);
    assert_eq!(1, fab.stats().transitions);
}

#[test]
fn each_flow_crosses_in_its_own_slot_regardless_of_queue_order() {
    let mut fab = fabric(FabricConfig::default());
    hold_slot(&mut fab, 8, 0);
    hold_slot(&mut fab, 7, 10);
    let mut later = Flit::new(1, 7, FlitClass::Reserved, 1, 5, 0);
    later.res_timestamp = Some(10);
    let mut stale = Flit::new(2, 9, FlitClass::Reserved, 2, 5, 0);
    stale.res_timestamp = Some(0);
    let mut active = Flit::new(3, 8, FlitClass::Reserved, 3, 5, 0);
    active.res_timestamp = Some(0);
    let port = &mut fab.ports[0][0];
    port.reserved.push_back(later);
    port.reserved.push_back(stale);
    port.reserved.push_back(active);

    fab.process_port(0, 0);
    assert_eq!(1, fab.stats().reserved_sent);
    assert_eq!(1, fab.stats().demoted);
    assert_eq!(1, fab.ports[0][0].reserved.len());
    assert_eq!(7, fab.ports[0][0].reserved[0].flow_id);
    assert_eq!(1, fab.ports[0][0].ordinary.len());

    fab.engine.increment_epoch(1);
    fab.process_port(0, 0);
    assert_eq!(2, fab.stats().reserved_sent);
    assert_eq!(1, fab.stats().demoted);
    assert!(fab.ports[0][0].reserved.is_empty());
    assert_eq!(2, fab.reservation_stats().consumed);
}

#[test]
fn reserved_flit_without_a_grant_is_demoted() {
    let mut fab = fabric(FabricConfig::default());
    let mut reserved = Flit::new(1, 9, FlitClass::Reserved, 1, 5, 0);
    reserved.res_timestamp = Some(0);
    fab.ports[0][0].reserved.push_back(reserved);

    fab.process_port(0, 0);
    assert_eq!(1, fab.stats().demoted);
    assert_eq!(1, fab.stats().transitions);
    assert_eq!(0, fab.stats().reserved_sent);
}

#[test]
fn missed_timestamp_is_demoted_at_injection() {
    let mut fab = fabric(FabricConfig::default());
    fab.engine.increment_epoch(2);
    let mut flit = Flit::new(1, 0, FlitClass::Reserved, 1, 5, 0);
    flit.res_timestamp = Some(5);
    let route = fab.route_flit(&mut flit, 0, true);
    assert_eq!(
        Route::Transition {
            channel: 0,
            next_cluster: 1
        },
        route
    );
    assert_eq!(FlitClass::Ordinary, flit.class);
    assert_eq!(None, flit.res_timestamp);
    assert_eq!(4, flit.local_dest);
    assert_eq!(1, fab.stats().demoted);
}

#[test]
fn full_topology_picks_the_channel_toward_the_destination() {
    let mut fab = fabric(FabricConfig {
        network_clusters: 3,
        nodes: 6,
        transition_topology: Adjacency::Full,
        ..FabricConfig::default()
    });
    assert_eq!(2, fab.channels_per_cluster());
    let mut flit = Flit::new(1, 0, FlitClass::Ordinary, 0, 5, 0);
    assert_eq!(
        Route::Transition {
            channel: 1,
            next_cluster: 2
        },
        fab.route_flit(&mut flit, 0, false)
    );
    let mut local = Flit::new(2, 0, FlitClass::Ordinary, 0, 1, 0);
    assert_eq!(Route::Local { terminal: 1 }, fab.route_flit(&mut local, 0, false));
}

#[test]
fn flows_spread_over_channels_deterministically() {
    let mut fab = fabric(FabricConfig {
        transition_channels_per_cluster: 3,
        ..FabricConfig::default()
    });
    for flow in 0..6 {
        let mut flit = Flit::new(1, flow, FlitClass::Ordinary, 0, 5, 0);
        match fab.route_flit(&mut flit, 0, false) {
            Route::Transition { channel, .. } => assert_eq!(flow % 3, channel),
            Route::Local { .. } => panic!("flit should leave cluster 0"),
        }
    }
}

#[test]
fn request_off_the_bottleneck_is_granted_without_a_slot() {
    let mut fab = fabric(FabricConfig {
        transition_channels_per_cluster: 2,
        ..FabricConfig::default()
    });
    // flow 1 leaves over channel 1, which is not a bottleneck
    assert!(!fab.write_special_flit(request(1, 1, 2, 6, 16), 2));
    let mut inbox = Vec::new();
    for _ in 0..10 {
        step(&mut fab, &mut inbox);
    }
    assert_eq!(1, inbox.len());
    assert_eq!(2, inbox[0].0);
    assert_eq!(FlitClass::Grant, inbox[0].1.class);
    assert_eq!(None, inbox[0].1.res_timestamp);
    assert_eq!(1, fab.stats().unreserved_grants);
}

#[test]
fn special_write_falls_back_for_plain_flits() {
    let mut fab = fabric(FabricConfig::default());
    assert!(!fab.write_special_flit(Flit::new(1, 0, FlitClass::Ordinary, 0, 5, 0), 0));
    assert!(!fab.write_special_flit(request(2, 0, 0, 3, 16), 0));
    assert_eq!(2, fab.stats().injected);
    assert_eq!(0, fab.stats().special_injected);
}

#[test]
fn epoch_follows_the_cycle_count() {
    let mut fab = fabric(FabricConfig::default());
    let mut inbox = Vec::new();
    for _ in 0..25 {
        step(&mut fab, &mut inbox);
    }
    assert_eq!(2, fab.engine().current_epoch());
    assert_eq!(179, fab.engine().max_timestamp_covered());
}

#[test]
fn request_on_an_epoch_boundary_sees_the_new_window() {
    let mut fab = fabric(FabricConfig {
        bit_vector_length: 4,
        ..FabricConfig::default()
    });
    for flow in 0..4 {
        assert!(fab.write_special_flit(request(flow as u64, flow, flow, 4, 4), flow));
    }
    let mut inbox = Vec::new();
    while fab.cycle() < 10 {
        step(&mut fab, &mut inbox);
    }
    assert_eq!(4, fab.stats().grants);
    assert_eq!(0, fab.engine().current_epoch());

    fab.read_inputs();
    assert_eq!(1, fab.current_epoch());
    let mut late = Flit::new(10, 4, FlitClass::Request, 0, 4, fab.cycle());
    ReservationEngine::initialize_bit_vector(&mut late, 4, fab.current_epoch());
    assert!(fab.write_special_flit(late, 0));
    fab.evaluate();
    fab.write_outputs();
    assert_eq!(1, fab.engine().current_epoch());
    assert_eq!(49, fab.engine().max_timestamp_covered());
    assert_eq!(5, fab.stats().grants);
    assert_eq!(0, fab.stats().denies);
    assert!(fab.engine().table(0, 0)[3].holds(4));

    for _ in 0..10 {
        step(&mut fab, &mut inbox);
    }
    let reply = inbox
        .iter()
        .find(|(_, f)| f.id == 10)
        .map(|(_, f)| f)
        .expect("grant should come back");
    assert_eq!(FlitClass::Grant, reply.class);
    assert_eq!(Some(40), reply.res_timestamp);
}

fn rejects(config: FabricConfig, needle: &str) {
    let err = SuperNetwork::new(config, &SubnetConfig::default())
        .err()
        .expect("config should be rejected");
    let msg = format!("{:#}", err);
    assert!(msg.contains(needle), "unexpected error: {}", msg);
}

#[test]
fn inconsistent_configs_are_rejected() {
    rejects(
        FabricConfig {
            nodes: 7,
            ..FabricConfig::default()
        },
        "not divisible",
    );
    rejects(
        FabricConfig {
            network_clusters: 4,
            transition_topology: Adjacency::Full,
            transition_channels_per_cluster: 2,
            ..FabricConfig::default()
        },
        "needs at least 3",
    );
    rejects(
        FabricConfig {
            bottleneck_channels: 3,
            transition_channels_per_cluster: 2,
            ..FabricConfig::default()
        },
        "cannot hold 3 bottleneck",
    );
    rejects(
        FabricConfig {
            bit_vector_length: 0,
            ..FabricConfig::default()
        },
        "bit_vector_length",
    );
    rejects(
        FabricConfig {
            bit_vector_length: 4,
            how_many_time_slots_to_reserve: 5,
            ..FabricConfig::default()
        },
        "how_many_time_slots_to_reserve",
    );
}

#[test]
fn channel_map_uses_fabric_wide_ids() {
    let fab = fabric(FabricConfig::default());
    let channels = fab.get_channels();
    // per crossbar cluster: 5 injection + 5 ejection channels
    assert_eq!(22, channels.len());
    assert!(channels.iter().enumerate().all(|(i, ch)| ch.id == i));
    assert!(channels
        .iter()
        .any(|ch| ch.name == "c1.inj0" && ch.src == Endpoint::Node(4)));
    assert!(channels
        .iter()
        .any(|ch| ch.name == "c0.ej4" && ch.dst == Endpoint::Port { cluster: 0, port: 0 }));
    let last = &channels[21];
    assert_eq!(Endpoint::Port { cluster: 1, port: 0 }, last.src);
    assert_eq!(Endpoint::Port { cluster: 0, port: 0 }, last.dst);
    assert_eq!(4, last.latency);

    let routers = fab.get_routers();
    assert_eq!(vec![0, 1], routers.iter().map(|r| r.id).collect::<Vec<_>>());
    assert_eq!(1.0, fab.capacity());
}

#[test]
fn faults_land_where_they_are_reported() {
    let config = FabricConfig {
        link_failures: 3,
        fail_seed: 7,
        ..FabricConfig::default()
    };
    let subnet = SubnetConfig {
        topology: SubnetKind::Ring,
        ..SubnetConfig::default()
    };
    let mut fab = SuperNetwork::new(config, &subnet).expect("valid config");
    let placed = fab.insert_random_faults();
    assert!((1..=3).contains(&placed));
    assert_eq!(placed, fab.get_channels().iter().filter(|ch| ch.faulty).count());

    let mut xbar = fabric(FabricConfig::default());
    xbar.out_channel_fault(1, 0, true);
    let faulty: Vec<_> = xbar
        .get_channels()
        .into_iter()
        .filter(|ch| ch.faulty)
        .map(|ch| ch.name)
        .collect();
    assert_eq!(vec!["c1.ej0".to_string()], faulty);
}

#[test]
fn dumps_describe_the_fabric() {
    let fab = fabric(FabricConfig::default());
    let mut out = Vec::new();
    fab.dump_node_map(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(9, text.lines().count());
    assert!(text.lines().any(|l| l == "5 1 1"));

    let mut out = Vec::new();
    fab.dump_channel_map(&mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().contains("tc0.0"));

    let mut out = Vec::new();
    fab.display(&mut out).unwrap();
    assert!(String::from_utf8(out).unwrap().starts_with("fabric: 2 clusters"));
}

#[test]
fn single_cluster_runs_without_transition_channels() {
    let mut fab = fabric(FabricConfig {
        network_clusters: 1,
        nodes: 4,
        ..FabricConfig::default()
    });
    assert_eq!(0, fab.channels_per_cluster());
    fab.write_flit(Flit::new(1, 0, FlitClass::Ordinary, 0, 3, 0), 0);
    let mut inbox = Vec::new();
    for _ in 0..6 {
        step(&mut fab, &mut inbox);
    }
    assert_eq!(1, inbox.len());
    assert!(fab.get_channels().iter().all(|ch| !ch.name.starts_with("tc")));
}
