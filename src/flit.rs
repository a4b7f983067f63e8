use std::fmt::{Display, Formatter};

use crate::timeq::Cycle;

pub type FlowId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum FlitClass {
    /// Plain traffic; only credit flow control applies.
    #[default]
    Ordinary,
    /// Reservation-seeking control flit.
    Request,
    /// Positive reply to a `Request`.
    Grant,
    /// Negative reply: nothing reservable inside the lookahead window.
    Deny,
    /// Data that travels under a previously granted reservation.
    Reserved,
}

impl FlitClass {
    pub fn is_reply(&self) -> bool {
        matches!(self, FlitClass::Grant | FlitClass::Deny)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Flit {
    pub id: u64,
    pub flow_id: FlowId,
    pub class: FlitClass,
    pub src: usize,
    pub dest: usize,
    /// Terminal inside the cluster the flit currently travels in.
    pub local_dest: usize,
    pub ctime: Cycle,
    pub hops: u32,
    pub cluster_hops: u32,
    pub transition_cycles: Cycle,
    /// Cycle the flit was put on its current transition link.
    pub link_entered: Cycle,
    pub bit_vector: Vec<bool>,
    pub vector_epoch: u64,
    pub res_timestamp: Option<Cycle>,
}

impl Flit {
    pub fn new(id: u64, flow_id: FlowId, class: FlitClass, src: usize, dest: usize, ctime: Cycle) -> Self {
        Self {
            id,
            flow_id,
            class,
            src,
            dest,
            ctime,
            ..Flit::default()
        }
    }

    /// Build the reply to this flit, travelling back to its source and carrying
    /// the (possibly updated) reservation snapshot.
    pub fn reply(&self, id: u64, class: FlitClass, now: Cycle) -> Flit {
        debug_assert!(class.is_reply());
        Flit {
            id,
            flow_id: self.flow_id,
            class,
            src: self.dest,
            dest: self.src,
            local_dest: 0,
            ctime: now,
            hops: 0,
            cluster_hops: 0,
            transition_cycles: 0,
            link_entered: 0,
            bit_vector: self.bit_vector.clone(),
            vector_epoch: self.vector_epoch,
            res_timestamp: self.res_timestamp,
        }
    }

    pub fn has_reservation(&self) -> bool {
        self.res_timestamp.is_some()
    }
}

impl Display for Flit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "flit {} [flow: {}, class: {:?}, {} -> {}, hops: {}, cluster_hops: {}]",
            self.id, self.flow_id, self.class, self.src, self.dest, self.hops, self.cluster_hops
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Credit {
    pub vc: usize,
}

impl Credit {
    pub fn new() -> Self {
        Self::default()
    }
}
