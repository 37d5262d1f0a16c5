use serde::Serialize;

use crate::domain::utils::id::{HostName, TaskId};
use crate::domain::workflow::file::WorkflowFile;
use crate::domain::workflow::parallel_model::ParallelModel;
use crate::domain::workflow::workflow::TaskKey;
use crate::error::{Error, Result};

/// Task state as seen by whoever submits jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    NotReady,
    Ready,
    /// Part of a submitted job that has not finished yet.
    Pending,
    Completed,
}

/// Task state as tracked by the execution engine while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskInternalState {
    NotReady,
    Ready,
    Running,
    Completed,
    Failed,
}

/// Simulated dates (seconds) of the phases of the last execution attempt.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskTimestamps {
    pub start_date: Option<f64>,
    pub end_date: Option<f64>,
    pub read_input_start_date: Option<f64>,
    pub read_input_end_date: Option<f64>,
    pub computation_start_date: Option<f64>,
    pub computation_end_date: Option<f64>,
    pub write_output_start_date: Option<f64>,
    pub write_output_end_date: Option<f64>,
    pub failure_date: Option<f64>,
    pub termination_date: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub flops: f64,
    pub min_num_cores: u32,
    pub max_num_cores: u32,
    /// Bytes of RAM needed while the task runs.
    pub memory_requirement: u64,
    pub parallel_model: ParallelModel,

    pub input_files: Vec<WorkflowFile>,
    pub output_files: Vec<WorkflowFile>,

    pub(crate) state: TaskState,
    pub(crate) internal_state: TaskInternalState,

    #[serde(skip)]
    pub(crate) parents: Vec<TaskKey>,
    #[serde(skip)]
    pub(crate) children: Vec<TaskKey>,

    pub execution_host: Option<HostName>,
    pub num_cores_allocated: u32,
    pub failure_count: u32,
    pub timestamps: TaskTimestamps,
}

impl Task {
    /// Creates a task that is ready to run until dependencies are added.
    ///
    /// # Returns
    /// `Error::InvalidArgument` if the work amount is negative or the core
    /// bounds are not `1 <= min <= max`.
    pub fn new(id: impl Into<String>, flops: f64, min_num_cores: u32, max_num_cores: u32, memory_requirement: u64) -> Result<Self> {
        let id = TaskId::new(id);

        if !(flops.is_finite() && flops >= 0.0) {
            return Err(Error::invalid_argument(format!("task {}: flops must be a non-negative number", id)));
        }
        if min_num_cores == 0 || min_num_cores > max_num_cores {
            return Err(Error::invalid_argument(format!(
                "task {}: invalid core bounds (min = {}, max = {})",
                id, min_num_cores, max_num_cores
            )));
        }

        Ok(Task {
            id,
            flops,
            min_num_cores,
            max_num_cores,
            memory_requirement,
            parallel_model: ParallelModel::default(),
            input_files: Vec::new(),
            output_files: Vec::new(),
            state: TaskState::Ready,
            internal_state: TaskInternalState::Ready,
            parents: Vec::new(),
            children: Vec::new(),
            execution_host: None,
            num_cores_allocated: 0,
            failure_count: 0,
            timestamps: TaskTimestamps::default(),
        })
    }

    pub fn with_parallel_model(mut self, parallel_model: ParallelModel) -> Result<Self> {
        parallel_model.validate()?;
        self.parallel_model = parallel_model;
        Ok(self)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn internal_state(&self) -> TaskInternalState {
        self.internal_state
    }

    pub fn parents(&self) -> &[TaskKey] {
        &self.parents
    }

    pub fn children(&self) -> &[TaskKey] {
        &self.children
    }

    /// Every file this task reads or writes, inputs first.
    pub fn files(&self) -> impl Iterator<Item = &WorkflowFile> {
        self.input_files.iter().chain(self.output_files.iter())
    }
}
