//! Slotted-time reservation tables for bottleneck channels.
//!
//! Every bottleneck channel owns a window of `bit_vector_length` slots anchored at
//! the current epoch. Slot `i` covers the cycles
//! `[(epoch + i) * cycles_per_element, (epoch + i + 1) * cycles_per_element)`.
//! A slot starts with `counter_max` units of capacity; each grant takes one unit
//! and records the flow it was given to. Advancing the epoch drops slot 0 and
//! appends a fresh slot, which is the only way capacity ever comes back.

use std::collections::VecDeque;

use log::debug;
use serde::Serialize;
use smallvec::SmallVec;

use crate::flit::{Flit, FlowId};
use crate::timeq::Cycle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotState {
    remaining: u32,
    granted: SmallVec<[(FlowId, u32); 4]>,
}

impl SlotState {
    pub fn fresh(counter_max: u32) -> Self {
        Self {
            remaining: counter_max,
            granted: SmallVec::new(),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn granted(&self) -> &[(FlowId, u32)] {
        &self.granted
    }

    /// Grant units still recorded in this slot.
    pub fn granted_total(&self) -> u32 {
        self.granted.iter().map(|(_, count)| count).sum()
    }

    pub fn holds(&self, flow: FlowId) -> bool {
        self.granted.iter().any(|&(f, count)| f == flow && count > 0)
    }

    /// One more grant fits. Without multi-SRP a slot belongs to at most one
    /// flow: `None` asks for a slot nobody holds, `Some(flow)` also accepts a
    /// slot held only by `flow`.
    fn is_open_for(&self, flow: Option<FlowId>, multi_srp: bool) -> bool {
        self.remaining > 0 && (multi_srp || self.granted.iter().all(|&(f, _)| Some(f) == flow))
    }

    fn grant(&mut self, flow: FlowId) {
        assert!(self.remaining > 0, "granting a slot with no remaining capacity");
        self.remaining -= 1;
        match self.granted.iter_mut().find(|(f, _)| *f == flow) {
            Some((_, count)) => *count += 1,
            None => self.granted.push((flow, 1)),
        }
    }

    fn consume(&mut self, flow: FlowId) -> bool {
        let Some(pos) = self.granted.iter().position(|&(f, c)| f == flow && c > 0) else {
            return false;
        };
        self.granted[pos].1 -= 1;
        true
    }
}

pub fn initialize_slot_vector(bit_vector_length: usize, counter_max: u32) -> VecDeque<SlotState> {
    (0..bit_vector_length)
        .map(|_| SlotState::fresh(counter_max))
        .collect()
}

/// Drop slot 0 and append a full-capacity slot.
pub fn shift_slot_vector(vec: &mut VecDeque<SlotState>, bit_vector_length: usize, counter_max: u32) {
    debug_assert_eq!(bit_vector_length, vec.len());
    vec.pop_front();
    vec.push_back(SlotState::fresh(counter_max));
}

pub fn initialize_occupancy_vector(bit_vector_length: usize) -> Vec<bool> {
    vec![true; bit_vector_length]
}

/// Drop slot 0 of a flit-side occupancy vector. The appended slot was never
/// part of the snapshot, so it is not marked.
pub fn shift_occupancy_vector(vec: &mut Vec<bool>, bit_vector_length: usize) {
    debug_assert_eq!(bit_vector_length, vec.len());
    if !vec.is_empty() {
        vec.remove(0);
    }
    vec.push(false);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationParams {
    pub bit_vector_length: usize,
    pub cycles_per_element: Cycle,
    pub cycles_into_the_future: Cycle,
    pub counter_max: u32,
    pub enable_multi_srp: bool,
    pub slots_per_request: usize,
}

impl Default for ReservationParams {
    fn default() -> Self {
        Self {
            bit_vector_length: 16,
            cycles_per_element: 10,
            cycles_into_the_future: 160,
            counter_max: 1,
            enable_multi_srp: false,
            slots_per_request: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grant {
    /// First granted slot, relative to `epoch`.
    pub slot: usize,
    pub slots: usize,
    pub epoch: u64,
    /// First cycle of the first granted slot.
    pub timestamp: Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    NoOpening,
    BeyondWindow { earliest: Cycle, covered: Cycle },
}

/// Where a reserved timestamp sits relative to the active slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPosition {
    Unreserved,
    Missed,
    Current,
    Upcoming,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReservationStats {
    pub grants: u64,
    pub deferrals: u64,
    pub beyond_window: u64,
    pub consumed: u64,
    pub epochs: u64,
}

pub struct ReservationEngine {
    params: ReservationParams,
    current_epoch: u64,
    // [cluster][bottleneck channel]
    tables: Vec<Vec<VecDeque<SlotState>>>,
    stats: ReservationStats,
}

impl ReservationEngine {
    pub fn new(params: ReservationParams, clusters: usize, bottleneck_channels: usize) -> Self {
        assert!(params.bit_vector_length > 0, "bit_vector_length must be > 0");
        assert!(params.cycles_per_element > 0, "cycles_per_element must be > 0");
        assert!(params.counter_max > 0, "counter_max must be > 0");
        assert!(
            (1..=params.bit_vector_length).contains(&params.slots_per_request),
            "slots_per_request must be in [1, bit_vector_length]"
        );
        let tables = (0..clusters)
            .map(|_| {
                (0..bottleneck_channels)
                    .map(|_| initialize_slot_vector(params.bit_vector_length, params.counter_max))
                    .collect()
            })
            .collect();
        Self {
            params,
            current_epoch: 0,
            tables,
            stats: ReservationStats::default(),
        }
    }

    pub fn params(&self) -> &ReservationParams {
        &self.params
    }

    pub fn stats(&self) -> ReservationStats {
        self.stats
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch
    }

    pub fn bottleneck_channels(&self) -> usize {
        self.tables.first().map_or(0, Vec::len)
    }

    pub fn is_bottleneck(&self, net: usize, chan: usize) -> bool {
        net < self.tables.len() && chan < self.tables[net].len()
    }

    pub fn table(&self, net: usize, chan: usize) -> &VecDeque<SlotState> {
        assert!(
            self.is_bottleneck(net, chan),
            "no reservation table for cluster {} channel {}",
            net,
            chan
        );
        &self.tables[net][chan]
    }

    pub fn epoch_start(&self) -> Cycle {
        self.current_epoch * self.params.cycles_per_element
    }

    pub fn max_timestamp_covered(&self) -> Cycle {
        (self.current_epoch + self.params.bit_vector_length as u64) * self.params.cycles_per_element - 1
    }

    pub fn slot_timestamp(&self, index: usize) -> Cycle {
        self.epoch_start() + index as Cycle * self.params.cycles_per_element
    }

    /// Reset a flit's occupancy snapshot: every slot of the current window is acceptable.
    pub fn initialize_bit_vector(flit: &mut Flit, bit_vector_length: usize, epoch: u64) {
        flit.bit_vector = initialize_occupancy_vector(bit_vector_length);
        flit.vector_epoch = epoch;
        flit.res_timestamp = None;
    }

    /// Re-anchor a flit's snapshot at the current epoch.
    fn align_bit_vector(&self, flit: &mut Flit) {
        let len = self.params.bit_vector_length;
        if flit.bit_vector.len() != len || flit.vector_epoch > self.current_epoch {
            Self::initialize_bit_vector(flit, len, self.current_epoch);
            return;
        }
        let shifts = (self.current_epoch - flit.vector_epoch).min(len as u64);
        for _ in 0..shifts {
            shift_occupancy_vector(&mut flit.bit_vector, len);
        }
        flit.vector_epoch = self.current_epoch;
    }

    /// True when `size` consecutive slots starting at `vector_index` can all take
    /// one more grant from a flow that holds none of them. Pure query; the
    /// search in `reserve_bit_vector` asks the same question for its own flow.
    pub fn has_an_opening(&self, net: usize, chan: usize, vector_index: usize, size: usize) -> bool {
        let table = self.table(net, chan);
        let Some(end) = vector_index.checked_add(size) else {
            return false;
        };
        if size == 0 || end > table.len() {
            return false;
        }
        table
            .range(vector_index..end)
            .all(|slot| slot.is_open_for(None, self.params.enable_multi_srp))
    }

    fn run_open_for(&self, net: usize, chan: usize, start: usize, size: usize, flow: FlowId, mask: &[bool]) -> bool {
        let table = &self.tables[net][chan];
        (start..start + size).all(|i| mask[i] && table[i].is_open_for(Some(flow), self.params.enable_multi_srp))
    }

    /// Search the channel's table for the earliest run of openings acceptable to
    /// `flit` and commit it. `earliest` is the first cycle the flow could use the
    /// channel; the search never looks past `now + cycles_into_the_future`.
    pub fn reserve_bit_vector(
        &mut self,
        flit: &mut Flit,
        net: usize,
        chan: usize,
        earliest: Cycle,
        now: Cycle,
    ) -> Result<Grant, Deferral> {
        assert!(
            self.is_bottleneck(net, chan),
            "cluster {} channel {} is not a bottleneck channel",
            net,
            chan
        );
        self.align_bit_vector(flit);

        let covered = self.max_timestamp_covered();
        if earliest > covered {
            self.stats.deferrals += 1;
            self.stats.beyond_window += 1;
            return Err(Deferral::BeyondWindow { earliest, covered });
        }

        let cpe = self.params.cycles_per_element;
        let epoch_start = self.epoch_start();
        let len = self.params.bit_vector_length;
        let size = self.params.slots_per_request;
        let start = ((earliest.max(epoch_start) - epoch_start) / cpe) as usize;
        let horizon = now.saturating_add(self.params.cycles_into_the_future);
        let limit = if horizon < epoch_start {
            0
        } else {
            (((horizon - epoch_start) / cpe) as usize + 1).min(len)
        };

        let mut index = start;
        while index + size <= limit {
            if self.run_open_for(net, chan, index, size, flit.flow_id, &flit.bit_vector) {
                let table = &mut self.tables[net][chan];
                for slot in table.range_mut(index..index + size) {
                    slot.grant(flit.flow_id);
                }
                let timestamp = self.slot_timestamp(index);
                flit.bit_vector = (0..len).map(|i| i >= index && i < index + size).collect();
                flit.res_timestamp = Some(timestamp);
                self.stats.grants += 1;
                debug!(
                    "epoch {}: flow {} granted slots {}..{} on cluster {} channel {} (t={})",
                    self.current_epoch,
                    flit.flow_id,
                    index,
                    index + size,
                    net,
                    chan,
                    timestamp
                );
                return Ok(Grant {
                    slot: index,
                    slots: size,
                    epoch: self.current_epoch,
                    timestamp,
                });
            }
            index += 1;
        }

        self.stats.deferrals += 1;
        debug!(
            "epoch {}: flow {} found no opening on cluster {} channel {} in slots {}..{}",
            self.current_epoch, flit.flow_id, net, chan, start, limit
        );
        Err(Deferral::NoOpening)
    }

    /// Where `flow`'s grants on this channel sit relative to the active slot.
    pub fn grant_position(&self, net: usize, chan: usize, flow: FlowId) -> SlotPosition {
        let table = self.table(net, chan);
        if table.front().is_some_and(|slot| slot.holds(flow)) {
            SlotPosition::Current
        } else if table.iter().skip(1).any(|slot| slot.holds(flow)) {
            SlotPosition::Upcoming
        } else {
            SlotPosition::Missed
        }
    }

    /// Use up one unit of `flow`'s grant in the active slot.
    pub fn consume_grant(&mut self, net: usize, chan: usize, flow: FlowId) -> bool {
        assert!(self.is_bottleneck(net, chan));
        let consumed = self.tables[net][chan]
            .front_mut()
            .is_some_and(|slot| slot.consume(flow));
        if consumed {
            self.stats.consumed += 1;
        }
        consumed
    }

    pub fn belongs_in_that_time_slot(&self, timestamp: Cycle, is_valid: bool) -> SlotPosition {
        if !is_valid {
            return SlotPosition::Unreserved;
        }
        let start = self.epoch_start();
        if timestamp < start {
            SlotPosition::Missed
        } else if timestamp < start + self.params.cycles_per_element {
            SlotPosition::Current
        } else {
            SlotPosition::Upcoming
        }
    }

    pub fn increment_epoch(&mut self, new_epoch: u64) {
        assert!(
            new_epoch >= self.current_epoch,
            "epoch moved backwards: {} -> {}",
            self.current_epoch,
            new_epoch
        );
        let len = self.params.bit_vector_length;
        let shifts = (new_epoch - self.current_epoch).min(len as u64);
        for _ in 0..shifts {
            for table in self.tables.iter_mut().flatten() {
                shift_slot_vector(table, len, self.params.counter_max);
            }
        }
        self.stats.epochs += new_epoch - self.current_epoch;
        self.current_epoch = new_epoch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_then_consume_keeps_capacity_spent() {
        let mut slot = SlotState::fresh(2);
        slot.grant(3);
        slot.grant(3);
        assert_eq!(0, slot.remaining());
        assert_eq!(&[(3, 2)], slot.granted());
        assert!(slot.consume(3));
        assert!(slot.consume(3));
        assert!(!slot.consume(3));
        assert_eq!(0, slot.remaining());
    }

    #[test]
    fn occupancy_shift_appends_unmarked_slot() {
        let mut vec = initialize_occupancy_vector(3);
        shift_occupancy_vector(&mut vec, 3);
        assert_eq!(vec![true, true, false], vec);
    }

    #[test]
    fn slot_shift_appends_full_slot() {
        let mut vec = initialize_slot_vector(2, 3);
        vec[0].grant(1);
        vec[1].grant(2);
        shift_slot_vector(&mut vec, 2, 3);
        assert_eq!(2, vec[0].remaining());
        assert!(vec[0].holds(2));
        assert_eq!(SlotState::fresh(3), vec[1]);
    }
}
