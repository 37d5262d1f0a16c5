#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::mpsc;

use workflow_sim_core::domain::compute::simulated_platform::SimulatedPlatform;
use workflow_sim_core::domain::execution::config::StandardJobExecutorConfig;
use workflow_sim_core::domain::execution::context::ExecutionContext;
use workflow_sim_core::domain::execution::messages::StandardJobExecutorMessage;
use workflow_sim_core::domain::execution::standard_job_executor::StandardJobExecutorHandle;
use workflow_sim_core::domain::job::job_manager::JobManager;
use workflow_sim_core::domain::job::standard_job::StandardJobSpec;
use workflow_sim_core::domain::output::simulation_output::SimulationOutput;
use workflow_sim_core::domain::simulator::simulator::{SharedSimulator, TokioSimulator};
use workflow_sim_core::domain::storage::simple_storage_service::SimpleStorageService;
use workflow_sim_core::domain::utils::id::HostName;
use workflow_sim_core::domain::workflow::workflow::Workflow;

pub const EPSILON: f64 = 1e-3;

pub fn assert_close(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < EPSILON, "expected {} but got {}", expected, actual);
}

/// One simulated platform with its clock, trace and workflow.
pub struct Bench {
    pub simulator: SharedSimulator,
    pub platform: Arc<SimulatedPlatform>,
    pub output: SimulationOutput,
    pub workflow: Workflow,
    pub manager: JobManager,
}

impl Bench {
    /// Hosts are `(name, cores, flop rate)` with plenty of memory.
    pub fn new(hosts: &[(&str, u32, f64)]) -> Self {
        Self::with_control_bandwidth(hosts, None)
    }

    pub fn with_control_bandwidth(hosts: &[(&str, u32, f64)], bandwidth: Option<f64>) -> Self {
        let simulator = TokioSimulator::shared();
        let mut platform = SimulatedPlatform::new(simulator.clone());
        for (name, cores, rate) in hosts {
            platform = platform.with_host(*name, *cores, *rate, 1 << 34).unwrap();
        }
        if let Some(bandwidth) = bandwidth {
            platform = platform.with_control_bandwidth(bandwidth).unwrap();
        }
        let workflow = Workflow::new("workflow");
        Bench {
            simulator,
            platform: platform.shared(),
            output: SimulationOutput::new(),
            manager: JobManager::new(workflow.clone()),
            workflow,
        }
    }

    /// A disk with 100 bytes/s of bandwidth.
    pub fn storage(&self, name: &str, mount_point: &str, capacity: u64) -> Arc<SimpleStorageService> {
        SimpleStorageService::new(name, mount_point, capacity, 100.0, self.simulator.clone()).unwrap().shared()
    }

    pub fn context(&self, scratch: Option<&Arc<SimpleStorageService>>) -> ExecutionContext {
        let ctx = ExecutionContext::new(self.simulator.clone(), self.platform.clone()).with_output(self.output.clone());
        match scratch {
            Some(scratch) => ctx.with_scratch_space(scratch.clone()),
            None => ctx,
        }
    }

    pub fn submit(
        &mut self,
        spec: StandardJobSpec,
        resources: &[(&str, u32)],
        ctx: ExecutionContext,
        config: StandardJobExecutorConfig,
    ) -> (StandardJobExecutorHandle, mpsc::UnboundedReceiver<StandardJobExecutorMessage>) {
        let job = self.manager.create_standard_job(spec).unwrap();
        let resources = resources.iter().map(|(h, c)| (HostName::new(*h), *c)).collect();
        self.manager.submit_standard_job(job, resources, ctx, config).unwrap()
    }

    /// Submits the job and waits for its single notification.
    pub async fn run(
        &mut self,
        spec: StandardJobSpec,
        resources: &[(&str, u32)],
        ctx: ExecutionContext,
        config: StandardJobExecutorConfig,
    ) -> StandardJobExecutorMessage {
        let (handle, mut notifications) = self.submit(spec, resources, ctx, config);
        let message = notifications.recv().await.expect("the job must report its outcome");
        handle.join().await.unwrap();
        assert!(notifications.recv().await.is_none(), "a job reports its outcome only once");
        message
    }
}
