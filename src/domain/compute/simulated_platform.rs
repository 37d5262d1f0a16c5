use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::compute::compute_substrate::ComputeSubstrate;
use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::simulator::simulator::{SharedSimulator, simulated_duration};
use crate::domain::utils::id::HostName;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct HostSpec {
    pub num_cores: u32,
    /// Flop/s per core.
    pub flop_rate: f64,
    /// Bytes.
    pub memory: u64,
}

/// A set of homogeneous-core hosts driven by the simulated clock.
///
/// A host can be turned off; compute threads running on it or started on it
/// afterwards die.
#[derive(Debug)]
pub struct SimulatedPlatform {
    hosts: BTreeMap<HostName, HostSpec>,
    down_hosts: Mutex<BTreeSet<HostName>>,
    /// Bytes per second on the control network, if modelled.
    control_bandwidth: Option<f64>,
    simulator: SharedSimulator,
}

impl SimulatedPlatform {
    pub fn new(simulator: SharedSimulator) -> Self {
        SimulatedPlatform { hosts: BTreeMap::new(), down_hosts: Mutex::new(BTreeSet::new()), control_bandwidth: None, simulator }
    }

    pub fn add_host(&mut self, name: impl Into<String>, spec: HostSpec) -> Result<()> {
        let name = HostName::new(name);

        if spec.num_cores == 0 {
            return Err(Error::invalid_argument(format!("host {} must have at least one core", name)));
        }
        if !(spec.flop_rate.is_finite() && spec.flop_rate > 0.0) {
            return Err(Error::invalid_argument(format!("host {}: flop rate must be positive", name)));
        }
        if self.hosts.contains_key(&name) {
            return Err(Error::invalid_argument(format!("host {} already exists", name)));
        }
        self.hosts.insert(name, spec);
        Ok(())
    }

    pub fn with_host(mut self, name: impl Into<String>, num_cores: u32, flop_rate: f64, memory: u64) -> Result<Self> {
        self.add_host(name, HostSpec { num_cores, flop_rate, memory })?;
        Ok(self)
    }

    pub fn with_control_bandwidth(mut self, bandwidth: f64) -> Result<Self> {
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(Error::invalid_argument("control bandwidth must be positive"));
        }
        self.control_bandwidth = Some(bandwidth);
        Ok(self)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&HostName, &HostSpec)> {
        self.hosts.iter()
    }

    fn down_hosts(&self) -> MutexGuard<'_, BTreeSet<HostName>> {
        self.down_hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_host_down(&self, host: &HostName) {
        self.down_hosts().insert(host.clone());
    }

    pub fn set_host_up(&self, host: &HostName) {
        self.down_hosts().remove(host);
    }

    pub fn is_host_up(&self, host: &HostName) -> bool {
        !self.down_hosts().contains(host)
    }
}

#[async_trait]
impl ComputeSubstrate for SimulatedPlatform {
    fn host_num_cores(&self, host: &HostName) -> Option<u32> {
        self.hosts.get(host).map(|h| h.num_cores)
    }

    fn host_memory(&self, host: &HostName) -> Option<u64> {
        self.hosts.get(host).map(|h| h.memory)
    }

    fn flop_rate(&self, host: &HostName) -> Option<f64> {
        self.hosts.get(host).map(|h| h.flop_rate)
    }

    async fn compute(&self, host: &HostName, flops: f64) -> std::result::Result<(), FailureCause> {
        let rate = self.flop_rate(host).ok_or_else(|| FailureCause::FatalFailure(format!("unknown host {}", host)))?;
        if !self.is_host_up(host) {
            return Err(FailureCause::ComputeThreadHasDied(host.clone()));
        }

        let seconds = flops / rate;
        if simulated_duration(seconds).is_none() {
            return Err(FailureCause::FatalFailure(format!(
                "computing {} flops on {} takes longer than can be simulated",
                flops, host
            )));
        }

        debug!("Computing {} flops on {}", flops, host);
        self.simulator.sleep(seconds).await;

        if !self.is_host_up(host) {
            return Err(FailureCause::ComputeThreadHasDied(host.clone()));
        }
        Ok(())
    }

    fn message_transfer_time(&self, payload: f64) -> f64 {
        match self.control_bandwidth {
            Some(bandwidth) if payload > 0.0 => payload / bandwidth,
            _ => 0.0,
        }
    }
}
