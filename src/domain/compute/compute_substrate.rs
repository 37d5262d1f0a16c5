use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::utils::id::HostName;

/// Hosts on which work unit executors run their compute threads.
#[async_trait]
pub trait ComputeSubstrate: std::fmt::Debug + Send + Sync {
    fn host_num_cores(&self, host: &HostName) -> Option<u32>;

    /// RAM of the host in bytes.
    fn host_memory(&self, host: &HostName) -> Option<u64>;

    /// Flop/s of one core of the host.
    fn flop_rate(&self, host: &HostName) -> Option<f64>;

    /// Runs `flops` of work on one core of `host`.
    async fn compute(&self, host: &HostName, flops: f64) -> Result<(), FailureCause>;

    /// Simulated seconds needed to deliver a control message of `payload`
    /// bytes. Zero when the control network is not modelled.
    fn message_transfer_time(&self, _payload: f64) -> f64 {
        0.0
    }
}

pub type SharedComputeSubstrate = Arc<dyn ComputeSubstrate>;
