use crate::domain::compute::compute_substrate::SharedComputeSubstrate;
use crate::domain::output::simulation_output::SimulationOutput;
use crate::domain::simulator::simulator::SharedSimulator;
use crate::domain::storage::storage_service::SharedStorageService;

/// Handles to the shared substrates every executor of a job works against.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub simulator: SharedSimulator,
    pub compute: SharedComputeSubstrate,
    /// Scratch space of the compute resources, if they have any.
    pub scratch_space: Option<SharedStorageService>,
    pub output: SimulationOutput,
}

impl ExecutionContext {
    pub fn new(simulator: SharedSimulator, compute: SharedComputeSubstrate) -> Self {
        ExecutionContext { simulator, compute, scratch_space: None, output: SimulationOutput::new() }
    }

    pub fn with_scratch_space(mut self, scratch_space: SharedStorageService) -> Self {
        self.scratch_space = Some(scratch_space);
        self
    }

    pub fn with_output(mut self, output: SimulationOutput) -> Self {
        self.output = output;
        self
    }
}
