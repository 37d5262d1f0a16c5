use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

pub const WORKUNIT_EXECUTOR_STARTUP_OVERHEAD: &str = "WORKUNIT_EXECUTOR_STARTUP_OVERHEAD";
pub const THREAD_STARTUP_OVERHEAD: &str = "THREAD_STARTUP_OVERHEAD";
pub const SIMULATE_COMPUTATION_AS_SLEEP: &str = "SIMULATE_COMPUTATION_AS_SLEEP";
pub const CORE_ALLOCATION_ALGORITHM: &str = "CORE_ALLOCATION_ALGORITHM";
pub const TASK_SELECTION_ALGORITHM: &str = "TASK_SELECTION_ALGORITHM";
pub const HOST_SELECTION_ALGORITHM: &str = "HOST_SELECTION_ALGORITHM";
pub const STANDARD_JOB_DONE_MESSAGE_PAYLOAD: &str = "STANDARD_JOB_DONE_MESSAGE_PAYLOAD";
pub const STANDARD_JOB_FAILED_MESSAGE_PAYLOAD: &str = "STANDARD_JOB_FAILED_MESSAGE_PAYLOAD";

/// How many cores a task gets once a host is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreAllocationAlgorithm {
    /// As many as the task can use, bounded by what the host has free.
    #[default]
    Maximum,
    /// The task's minimum.
    Minimum,
}

/// Order in which ready work units are considered for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSelectionAlgorithm {
    #[default]
    MaximumFlops,
    MaximumMinimumCores,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostSelectionAlgorithm {
    /// The host with the most free cores.
    #[default]
    MaxFit,
    /// The host that is left with the fewest free cores.
    BestFit,
}

impl FromStr for CoreAllocationAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "maximum" => Ok(CoreAllocationAlgorithm::Maximum),
            "minimum" => Ok(CoreAllocationAlgorithm::Minimum),
            _ => Err(Error::invalid_argument(format!("unknown core allocation algorithm '{}'", s))),
        }
    }
}

impl FromStr for TaskSelectionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "maximum_flops" => Ok(TaskSelectionAlgorithm::MaximumFlops),
            "maximum_minimum_cores" => Ok(TaskSelectionAlgorithm::MaximumMinimumCores),
            _ => Err(Error::invalid_argument(format!("unknown task selection algorithm '{}'", s))),
        }
    }
}

impl FromStr for HostSelectionAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "max_fit" => Ok(HostSelectionAlgorithm::MaxFit),
            "best_fit" => Ok(HostSelectionAlgorithm::BestFit),
            _ => Err(Error::invalid_argument(format!("unknown host selection algorithm '{}'", s))),
        }
    }
}

/// Tunables of a standard job executor and of the work unit executors it
/// spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandardJobExecutorConfig {
    /// Seconds a work unit executor spends starting up.
    pub workunit_executor_startup_overhead: f64,
    /// Seconds spent starting each compute thread and each pre-copy.
    pub thread_startup_overhead: f64,
    /// Replace compute threads by a single sleep of the longest thread.
    pub simulate_computation_as_sleep: bool,
    pub core_allocation_algorithm: CoreAllocationAlgorithm,
    pub task_selection_algorithm: TaskSelectionAlgorithm,
    pub host_selection_algorithm: HostSelectionAlgorithm,
    /// Bytes.
    pub standard_job_done_message_payload: f64,
    /// Bytes.
    pub standard_job_failed_message_payload: f64,
}

impl Default for StandardJobExecutorConfig {
    fn default() -> Self {
        StandardJobExecutorConfig {
            workunit_executor_startup_overhead: 0.0,
            thread_startup_overhead: 0.0,
            simulate_computation_as_sleep: false,
            core_allocation_algorithm: CoreAllocationAlgorithm::default(),
            task_selection_algorithm: TaskSelectionAlgorithm::default(),
            host_selection_algorithm: HostSelectionAlgorithm::default(),
            standard_job_done_message_payload: 1024.0,
            standard_job_failed_message_payload: 1024.0,
        }
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64> {
    let number = value
        .trim()
        .parse::<f64>()
        .map_err(|_| Error::invalid_argument(format!("property {}: '{}' is not a number", key, value)))?;
    if !(number.is_finite() && number >= 0.0) {
        return Err(Error::invalid_argument(format!("property {} must be a non-negative number", key)));
    }
    Ok(number)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::invalid_argument(format!("property {}: '{}' is not a boolean", key, value))),
    }
}

impl StandardJobExecutorConfig {
    /// Builds a configuration from string properties, starting from the
    /// defaults. Unknown property names are rejected.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        for (key, value) in properties {
            match key.as_str() {
                WORKUNIT_EXECUTOR_STARTUP_OVERHEAD => config.workunit_executor_startup_overhead = parse_number(key, value)?,
                THREAD_STARTUP_OVERHEAD => config.thread_startup_overhead = parse_number(key, value)?,
                SIMULATE_COMPUTATION_AS_SLEEP => config.simulate_computation_as_sleep = parse_bool(key, value)?,
                CORE_ALLOCATION_ALGORITHM => config.core_allocation_algorithm = value.parse()?,
                TASK_SELECTION_ALGORITHM => config.task_selection_algorithm = value.parse()?,
                HOST_SELECTION_ALGORITHM => config.host_selection_algorithm = value.parse()?,
                STANDARD_JOB_DONE_MESSAGE_PAYLOAD => config.standard_job_done_message_payload = parse_number(key, value)?,
                STANDARD_JOB_FAILED_MESSAGE_PAYLOAD => config.standard_job_failed_message_payload = parse_number(key, value)?,
                other => return Err(Error::invalid_argument(format!("unknown property {}", other))),
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let numbers = [
            (WORKUNIT_EXECUTOR_STARTUP_OVERHEAD, self.workunit_executor_startup_overhead),
            (THREAD_STARTUP_OVERHEAD, self.thread_startup_overhead),
            (STANDARD_JOB_DONE_MESSAGE_PAYLOAD, self.standard_job_done_message_payload),
            (STANDARD_JOB_FAILED_MESSAGE_PAYLOAD, self.standard_job_failed_message_payload),
        ];
        for (key, value) in numbers {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::invalid_argument(format!("{} must be a non-negative number", key)));
            }
        }
        Ok(())
    }
}
