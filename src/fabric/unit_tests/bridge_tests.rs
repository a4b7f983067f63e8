use crate::fabric::bridge::{Adjacency, TransitionBridge};
use crate::flit::{Credit, Flit};
use crate::subnet::{new_subnet, SubnetConfig};

#[test]
fn ring_adjacency_wraps_around() {
    let bridge = TransitionBridge::new(Adjacency::Ring, 3, 2, 1, 1, 4);
    assert_eq!(1, bridge.next_cluster(0, 0));
    assert_eq!(1, bridge.next_cluster(0, 1));
    assert_eq!(0, bridge.next_cluster(2, 1));
    assert_eq!(Some(2), bridge.source_cluster(0, 1));
}

#[test]
fn full_adjacency_reaches_every_other_cluster() {
    let bridge = TransitionBridge::new(Adjacency::Full, 4, 3, 1, 1, 2);
    for c in 0..4 {
        let mut next: Vec<usize> = (0..3).map(|k| bridge.next_cluster(c, k)).collect();
        next.sort();
        let expected: Vec<usize> = (0..4).filter(|&d| d != c).collect();
        assert_eq!(expected, next);
        for k in 0..3 {
            let d = bridge.next_cluster(c, k);
            assert_eq!(Some(c), bridge.source_cluster(d, k));
        }
    }
    assert_eq!(12, bridge.links().count());
}

#[test]
#[should_panic(expected = "no transition channel")]
fn unwired_channel_is_fatal() {
    let bridge = TransitionBridge::new(Adjacency::Ring, 2, 1, 1, 1, 4);
    bridge.next_cluster(0, 1);
}

#[test]
fn send_takes_exactly_the_link_latency() {
    let mut bridge = TransitionBridge::new(Adjacency::Ring, 2, 1, 3, 2, 4);
    let mut subnet = new_subnet(&SubnetConfig::default(), "c0", 5);
    let mut flit = Flit::default();
    flit.id = 9;

    bridge.send(flit, Credit::new(), 0, 0, subnet.as_mut());
    bridge.write_outputs();
    for _ in 1..3 {
        bridge.read_inputs();
        assert!(bridge.receive(1, 0).is_none());
        bridge.write_outputs();
    }
    bridge.read_inputs();
    let flit = bridge.receive(1, 0).expect("flit should have landed");
    assert_eq!(9, flit.id);
    assert_eq!(1, flit.cluster_hops);
    assert_eq!(3, flit.transition_cycles);
    assert_eq!(1, bridge.link(0, 0).forwarded);
}

#[test]
fn transition_time_runs_until_pickup() {
    let mut bridge = TransitionBridge::new(Adjacency::Ring, 2, 1, 3, 2, 4);
    let mut subnet = new_subnet(&SubnetConfig::default(), "c0", 5);
    bridge.send(Flit::default(), Credit::new(), 0, 0, subnet.as_mut());
    for _ in 0..5 {
        bridge.write_outputs();
        bridge.read_inputs();
    }
    let flit = bridge.receive(1, 0).expect("flit should have landed");
    assert_eq!(5, flit.transition_cycles);
}

#[test]
fn link_credits_gate_sends_until_returned() {
    let mut bridge = TransitionBridge::new(Adjacency::Ring, 2, 1, 2, 2, 4);
    let mut subnet = new_subnet(&SubnetConfig::default(), "c0", 5);
    bridge.send(Flit::default(), Credit::new(), 0, 0, subnet.as_mut());
    bridge.send(Flit::default(), Credit::new(), 0, 0, subnet.as_mut());
    assert!(!bridge.can_send(0, 0));

    bridge.return_credit(1, 0);
    bridge.write_outputs();
    bridge.read_inputs();
    assert!(!bridge.can_send(0, 0));
    bridge.write_outputs();
    bridge.read_inputs();
    assert!(bridge.can_send(0, 0));
    assert_eq!(1, bridge.link(0, 0).credits);
}

#[test]
fn faulty_link_refuses_sends() {
    let mut bridge = TransitionBridge::new(Adjacency::Ring, 2, 1, 1, 4, 4);
    bridge.set_fault(1, 0, true);
    assert!(!bridge.can_send(1, 0));
    assert!(bridge.can_send(0, 0));
}
