use std::collections::VecDeque;

use crate::flit::Flit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortEnd {
    Terminal(usize),
    Link(usize),
}

#[derive(Debug)]
pub struct InputBuffer {
    pub source: PortEnd,
    pub queue: VecDeque<Flit>,
}

#[derive(Debug)]
pub struct OutputState {
    pub sink: PortEnd,
    pub credits: usize,
    pub faulty: bool,
}

#[derive(Debug)]
pub struct Transfer {
    pub input: usize,
    pub output: usize,
    pub flit: Flit,
}

/// Single-VC input-queued router with round-robin output arbitration.
#[derive(Debug)]
pub struct Router {
    id: usize,
    depth: usize,
    /// Injected flits need two downstream slots on link outputs (bubble rule).
    bubble: bool,
    inputs: Vec<InputBuffer>,
    outputs: Vec<OutputState>,
    next_input: Vec<usize>,
    route: Vec<usize>,
    forwarded: u64,
}

impl Router {
    pub fn new(id: usize, depth: usize, bubble: bool) -> Self {
        assert!(depth > 0, "router buffer depth must be > 0");
        Self {
            id,
            depth,
            bubble,
            inputs: Vec::new(),
            outputs: Vec::new(),
            next_input: Vec::new(),
            route: Vec::new(),
            forwarded: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn add_input(&mut self, source: PortEnd) -> usize {
        self.inputs.push(InputBuffer {
            source,
            queue: VecDeque::with_capacity(self.depth),
        });
        self.inputs.len() - 1
    }

    pub fn add_output(&mut self, sink: PortEnd) -> usize {
        self.outputs.push(OutputState {
            sink,
            credits: self.depth,
            faulty: false,
        });
        self.next_input.push(0);
        self.outputs.len() - 1
    }

    /// `route[terminal]` is the output a flit for that terminal leaves through.
    pub fn set_route(&mut self, route: Vec<usize>) {
        assert!(
            route.iter().all(|&o| o < self.outputs.len()),
            "router {}: route names a missing output",
            self.id
        );
        self.route = route;
    }

    pub fn input(&self, input: usize) -> &InputBuffer {
        &self.inputs[input]
    }

    pub fn output(&self, output: usize) -> &OutputState {
        &self.outputs[output]
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn buffered(&self) -> usize {
        self.inputs.iter().map(|i| i.queue.len()).sum()
    }

    pub fn accept(&mut self, input: usize, flit: Flit) {
        let buffer = &mut self.inputs[input];
        assert!(
            buffer.queue.len() < self.depth,
            "router {}: input {} overflow, credit protocol violated",
            self.id,
            input
        );
        buffer.queue.push_back(flit);
    }

    pub fn return_credit(&mut self, output: usize) {
        let state = &mut self.outputs[output];
        state.credits += 1;
        debug_assert!(state.credits <= self.depth);
    }

    pub fn set_output_fault(&mut self, output: usize, fault: bool) {
        assert!(
            output < self.outputs.len(),
            "router {}: no output channel {}",
            self.id,
            output
        );
        self.outputs[output].faulty = fault;
    }

    pub fn arbitrate(&mut self) -> Vec<Transfer> {
        let n = self.inputs.len();
        let mut used = vec![false; n];
        let mut transfers = Vec::new();
        if n == 0 {
            return transfers;
        }
        for output in 0..self.outputs.len() {
            for offset in 0..n {
                let input = (self.next_input[output] + offset) % n;
                if used[input] {
                    continue;
                }
                let Some(head) = self.inputs[input].queue.front() else {
                    continue;
                };
                assert!(
                    head.local_dest < self.route.len(),
                    "router {}: no route to terminal {}",
                    self.id,
                    head.local_dest
                );
                if self.route[head.local_dest] != output {
                    continue;
                }
                let needed = match (self.inputs[input].source, self.outputs[output].sink) {
                    (PortEnd::Terminal(_), PortEnd::Link(_)) if self.bubble => 2,
                    _ => 1,
                };
                if self.outputs[output].credits < needed {
                    continue;
                }
                let mut flit = self.inputs[input]
                    .queue
                    .pop_front()
                    .expect("head just checked");
                flit.hops += 1;
                self.outputs[output].credits -= 1;
                self.next_input[output] = (input + 1) % n;
                used[input] = true;
                self.forwarded += 1;
                transfers.push(Transfer {
                    input,
                    output,
                    flit,
                });
                break;
            }
        }
        transfers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flit_to(id: u64, local_dest: usize) -> Flit {
        let mut flit = Flit::default();
        flit.id = id;
        flit.local_dest = local_dest;
        flit
    }

    fn two_by_two() -> Router {
        let mut router = Router::new(0, 2, false);
        router.add_input(PortEnd::Terminal(0));
        router.add_input(PortEnd::Terminal(1));
        router.add_output(PortEnd::Terminal(0));
        router.add_output(PortEnd::Terminal(1));
        router.set_route(vec![0, 1]);
        router
    }

    #[test]
    fn contending_inputs_alternate() {
        let mut router = two_by_two();
        router.accept(0, flit_to(1, 1));
        router.accept(1, flit_to(2, 1));
        router.accept(0, flit_to(3, 1));
        let first = router.arbitrate();
        assert_eq!(1, first.len());
        assert_eq!(1, first[0].flit.id);
        router.return_credit(1);
        let second = router.arbitrate();
        assert_eq!(2, second[0].flit.id);
        assert_eq!(1, second[0].flit.hops);
    }

    #[test]
    fn no_credit_no_transfer() {
        let mut router = two_by_two();
        router.accept(0, flit_to(1, 1));
        router.accept(0, flit_to(2, 1));
        assert_eq!(1, router.arbitrate().len());
        assert_eq!(1, router.arbitrate().len());
        router.accept(1, flit_to(3, 1));
        assert!(router.arbitrate().is_empty());
        router.return_credit(1);
        assert_eq!(1, router.arbitrate().len());
    }

    #[test]
    fn bubble_rule_holds_back_injection() {
        let mut router = Router::new(0, 2, true);
        router.add_input(PortEnd::Terminal(0));
        router.add_input(PortEnd::Link(0));
        router.add_output(PortEnd::Terminal(0));
        router.add_output(PortEnd::Link(1));
        router.set_route(vec![0, 1]);
        router.accept(0, flit_to(1, 1));
        assert_eq!(1, router.arbitrate().len());
        // one credit left: the injected flit must wait, the ring flit may go
        router.accept(0, flit_to(2, 1));
        router.accept(1, flit_to(3, 1));
        let transfers = router.arbitrate();
        assert_eq!(1, transfers.len());
        assert_eq!(3, transfers[0].flit.id);
    }

    #[test]
    #[should_panic(expected = "credit protocol violated")]
    fn overflow_is_fatal() {
        let mut router = two_by_two();
        router.accept(0, flit_to(1, 1));
        router.accept(0, flit_to(2, 1));
        router.accept(0, flit_to(3, 1));
    }
}
