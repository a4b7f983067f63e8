use crate::timeq::Cycle;

/// Three-phase per-cycle protocol shared by everything clocked in the fabric.
///
/// Within one cycle every component first reads what earlier cycles wrote, then
/// computes, then publishes. Nothing written in `write_outputs` is observable by a
/// `read_inputs` of the same cycle.
pub trait TimedModule {
    fn read_inputs(&mut self);

    fn evaluate(&mut self);

    fn write_outputs(&mut self);

    /// Run one full cycle with no external I/O between the phases.
    fn step(&mut self) {
        self.read_inputs();
        self.evaluate();
        self.write_outputs();
    }
}

#[derive(Debug, Default)]
pub struct ModuleBase {
    pub name: String,
    pub cycle: Cycle,
}

impl ModuleBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cycle: 0,
        }
    }

    pub fn advance(&mut self) {
        self.cycle += 1;
    }
}
