use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::domain::execution::config::StandardJobExecutorConfig;
use crate::domain::execution::context::ExecutionContext;
use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::execution::messages::{ExecutorId, WorkUnitExecutorMessage};
use crate::domain::execution::work_unit::{WorkUnit, WorkUnitKey};
use crate::domain::output::simulation_output::{ANALYTICS_TARGET, TraceEvent};
use crate::domain::storage::file_location::FileLocation;
use crate::domain::storage::storage_service::{self, SharedStorageService};
use crate::domain::utils::id::{HostName, TaskId};
use crate::domain::workflow::file::WorkflowFile;
use crate::domain::workflow::parallel_model::ParallelModel;
use crate::domain::workflow::task::{TaskInternalState, TaskTimestamps};
use crate::domain::workflow::workflow::{TaskKey, Workflow};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Snapshot of what the executor needs from a task once it has started it.
struct RunningTask {
    key: TaskKey,
    id: TaskId,
    flops: f64,
    parallel_model: ParallelModel,
    input_files: Vec<WorkflowFile>,
    output_files: Vec<WorkflowFile>,
}

/// Executes one work unit on a fixed host with a fixed number of cores and
/// reports the outcome to its coordinator.
#[derive(Debug)]
pub struct WorkUnitExecutor {
    id: ExecutorId,
    host: HostName,
    num_cores: u32,
    ram_utilization: u64,

    unit_key: WorkUnitKey,
    work_unit: WorkUnit,
    workflow: Workflow,
    ctx: ExecutionContext,

    startup_overhead: f64,
    thread_startup_overhead: f64,
    simulate_computation_as_sleep: bool,

    callback: mpsc::UnboundedSender<WorkUnitExecutorMessage>,
    task_started: bool,
}

impl WorkUnitExecutor {
    /// # Returns
    /// `Error::InvalidArgument` for zero cores, negative overheads, or when
    /// the unit's task cannot run on `num_cores` cores.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ExecutorId,
        host: HostName,
        num_cores: u32,
        ram_utilization: u64,
        unit_key: WorkUnitKey,
        work_unit: WorkUnit,
        workflow: Workflow,
        ctx: ExecutionContext,
        config: &StandardJobExecutorConfig,
        callback: mpsc::UnboundedSender<WorkUnitExecutorMessage>,
    ) -> Result<Self> {
        config.validate()?;
        if num_cores == 0 {
            return Err(Error::invalid_argument("a work unit executor needs at least one core"));
        }
        if let Some(task) = work_unit.task() {
            let (min, max) = workflow
                .with_task(task, |t| (t.min_num_cores, t.max_num_cores))
                .ok_or_else(|| Error::invalid_argument("work unit references an unknown task"))?;
            if num_cores < min || num_cores > max {
                return Err(Error::invalid_argument(format!(
                    "{} cores is outside the [{}, {}] range the task can use",
                    num_cores, min, max
                )));
            }
        }

        Ok(WorkUnitExecutor {
            id,
            host,
            num_cores,
            ram_utilization,
            unit_key,
            work_unit,
            workflow,
            ctx,
            startup_overhead: config.workunit_executor_startup_overhead,
            thread_startup_overhead: config.thread_startup_overhead,
            simulate_computation_as_sleep: config.simulate_computation_as_sleep,
            callback,
            task_started: false,
        })
    }

    pub fn id(&self) -> ExecutorId {
        self.id
    }

    pub fn num_cores(&self) -> u32 {
        self.num_cores
    }

    pub fn ram_utilization(&self) -> u64 {
        self.ram_utilization
    }

    /// Runs the unit to completion and sends exactly one message to the
    /// coordinator. Aborting the future instead stops every compute thread
    /// and transfer it has in flight, and sends nothing.
    pub async fn run(mut self) {
        debug!("Work unit executor {} starting on {} with {} cores", self.id, self.host, self.num_cores);
        self.ctx.simulator.sleep(self.startup_overhead).await;

        let outcome = match self.check_file_locations().await {
            Ok(()) => self.perform_work().await,
            Err(cause) => Err(cause),
        };

        let message = match outcome {
            Ok(()) => WorkUnitExecutorMessage::Done { executor: self.id, unit: self.unit_key },
            Err(cause) => {
                info!("Work unit executor {} on {} failed: {}", self.id, self.host, cause);
                self.record_task_failure();
                WorkUnitExecutorMessage::Failed { executor: self.id, unit: self.unit_key, cause }
            }
        };

        if self.callback.send(message).is_err() {
            warn!("Work unit executor {} finished but its coordinator is gone", self.id);
        }
    }

    fn scratch(&self) -> Option<&SharedStorageService> {
        self.ctx.scratch_space.as_ref()
    }

    /// Rejects scratch locations when there is no scratch space, and narrows
    /// every multi-candidate list to the first location holding the file.
    async fn check_file_locations(&mut self) -> std::result::Result<(), FailureCause> {
        let uses_scratch = self.work_unit.file_locations().values().flatten().any(FileLocation::is_scratch)
            || self.work_unit.pre_file_copies().iter().any(|c| c.src.is_scratch() || c.dst.is_scratch())
            || self.work_unit.post_file_copies().iter().any(|c| c.src.is_scratch() || c.dst.is_scratch())
            || self.work_unit.cleanup_file_deletions().iter().any(|d| d.location.is_scratch());

        if uses_scratch && self.scratch().is_none() {
            return Err(FailureCause::NoScratchSpace(
                "cannot use scratch space when running on a compute resource that has none".to_string(),
            ));
        }

        let candidates: Vec<(WorkflowFile, Vec<FileLocation>)> = self
            .work_unit
            .file_locations()
            .iter()
            .filter(|(_, locations)| locations.len() > 1)
            .map(|(file, locations)| (file.clone(), locations.clone()))
            .collect();

        for (file, locations) in candidates {
            let mut found = None;
            for location in &locations {
                let location = location.resolve_scratch(self.scratch(), self.work_unit.job())?;
                if storage_service::lookup_file(&file, &location).await? {
                    found = Some(location);
                    break;
                }
            }

            match found {
                Some(location) => {
                    self.work_unit.file_locations_mut().insert(file, vec![location]);
                }
                None => {
                    let tried = locations.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(", ");
                    return Err(FailureCause::FileNotFound { file: file.id.clone(), location: tried });
                }
            }
        }
        Ok(())
    }

    async fn perform_work(&mut self) -> std::result::Result<(), FailureCause> {
        if self.work_unit.sleep_time() > 0.0 {
            self.ctx.simulator.sleep(self.work_unit.sleep_time()).await;
        }

        for copy in self.work_unit.pre_file_copies().to_vec() {
            self.ctx.simulator.sleep(self.thread_startup_overhead).await;
            let src = copy.src.resolve_scratch(self.scratch(), self.work_unit.job())?;
            let dst = copy.dst.resolve_scratch(self.scratch(), self.work_unit.job())?;
            self.copy_file(&copy.file, &src, &dst).await?;
        }

        if let Some(task) = self.work_unit.task() {
            self.execute_task(task).await?;
        }

        for copy in self.work_unit.post_file_copies().to_vec() {
            let src = copy.src.resolve_scratch(self.scratch(), self.work_unit.job())?;
            let dst = copy.dst.resolve_scratch(self.scratch(), self.work_unit.job())?;
            self.copy_file(&copy.file, &src, &dst).await?;
        }

        for deletion in self.work_unit.cleanup_file_deletions().to_vec() {
            let location = deletion.location.resolve_scratch(self.scratch(), self.work_unit.job())?;
            match storage_service::delete_file(&deletion.file, &location).await {
                Ok(()) => {}
                Err(FailureCause::FileNotFound { .. }) => debug!("File {} already gone from {}", deletion.file, location),
                Err(cause) => return Err(cause),
            }
        }
        Ok(())
    }

    async fn copy_file(&self, file: &WorkflowFile, src: &FileLocation, dst: &FileLocation) -> std::result::Result<(), FailureCause> {
        let (file_id, src_name, dst_name) = (file.id.clone(), src.to_string(), dst.to_string());
        let output = &self.ctx.output;
        let simulator = &self.ctx.simulator;

        output.add(simulator.now(), TraceEvent::FileCopyStart { file: file_id.clone(), src: src_name.clone(), dst: dst_name.clone() });
        match storage_service::copy_file(file, src, dst).await {
            Ok(()) => {
                output.add(simulator.now(), TraceEvent::FileCopyCompletion { file: file_id, src: src_name, dst: dst_name });
                Ok(())
            }
            Err(cause) => {
                output.add(simulator.now(), TraceEvent::FileCopyFailure { file: file_id, src: src_name, dst: dst_name });
                Err(cause)
            }
        }
    }

    /// Where the task reads or writes `file`: its single (narrowed) location
    /// if it has one, the job's scratch directory otherwise.
    fn location_for(&self, file: &WorkflowFile, access: Access) -> std::result::Result<FileLocation, FailureCause> {
        if let Some(locations) = self.work_unit.file_locations().get(file) {
            return match locations.as_slice() {
                [location] => location.resolve_scratch(self.scratch(), self.work_unit.job()),
                _ => Err(FailureCause::FatalFailure(format!("file {} has no unique location", file))),
            };
        }

        match (self.scratch(), access) {
            (Some(scratch), _) => Ok(FileLocation::job_scratch_dir(scratch, self.work_unit.job())),
            (None, Access::Read) => Err(FailureCause::FileNotFound { file: file.id.clone(), location: FileLocation::Scratch.to_string() }),
            (None, Access::Write) => Err(FailureCause::NoScratchSpace(format!(
                "no location given for output file {} and no scratch space available",
                file
            ))),
        }
    }

    fn update_timestamps(&self, task: TaskKey, f: impl FnOnce(&mut TaskTimestamps)) {
        self.workflow.update_task(task, |t| f(&mut t.timestamps));
    }

    async fn execute_task(&mut self, key: TaskKey) -> std::result::Result<(), FailureCause> {
        let now = self.ctx.simulator.now();
        let (host, num_cores) = (self.host.clone(), self.num_cores);
        let task = self
            .workflow
            .update_task(key, |t| {
                t.internal_state = TaskInternalState::Running;
                t.timestamps = TaskTimestamps { start_date: Some(now), ..Default::default() };
                t.execution_host = Some(host);
                t.num_cores_allocated = num_cores;
                RunningTask {
                    key,
                    id: t.id.clone(),
                    flops: t.flops,
                    parallel_model: t.parallel_model,
                    input_files: t.input_files.clone(),
                    output_files: t.output_files.clone(),
                }
            })
            .ok_or_else(|| FailureCause::FatalFailure("work unit references an unknown task".to_string()))?;

        self.task_started = true;
        self.ctx.output.add(now, TraceEvent::TaskStart { task: task.id.clone(), host: self.host.clone() });
        info!("Task {} started on {} with {} cores", task.id, self.host, self.num_cores);

        self.read_input_files(&task).await?;

        let now = self.ctx.simulator.now();
        self.update_timestamps(key, |ts| ts.computation_start_date = Some(now));
        self.run_computation(task.flops, task.parallel_model).await?;
        let now = self.ctx.simulator.now();
        self.update_timestamps(key, |ts| ts.computation_end_date = Some(now));

        self.write_output_files(&task).await?;

        let now = self.ctx.simulator.now();
        self.workflow.update_task(key, |t| {
            t.internal_state = TaskInternalState::Completed;
            t.timestamps.end_date = Some(now);
        });
        self.workflow.promote_ready_children(key);
        self.ctx.output.add(now, TraceEvent::TaskCompletion { task: task.id.clone() });
        info!("Task {} completed on {}", task.id, self.host);
        tracing::debug!(
            target: ANALYTICS_TARGET,
            Time = now,
            LogDescription = "Task completed",
            TaskId = %task.id,
            Host = %self.host,
            NumberOfCores = self.num_cores,
            Flops = task.flops,
        );
        Ok(())
    }

    async fn read_input_files(&self, task: &RunningTask) -> std::result::Result<(), FailureCause> {
        let now = self.ctx.simulator.now();
        self.update_timestamps(task.key, |ts| ts.read_input_start_date = Some(now));

        let reads = task
            .input_files
            .iter()
            .map(|f| self.location_for(f, Access::Read).map(|location| (f, location)))
            .collect::<std::result::Result<Vec<_>, FailureCause>>()?;

        for (file, location) in reads {
            let (file_id, location_name, task_id) = (file.id.clone(), location.to_string(), task.id.clone());
            self.ctx.output.add(
                self.ctx.simulator.now(),
                TraceEvent::FileReadStart { file: file_id.clone(), location: location_name.clone(), task: task_id.clone() },
            );
            if let Err(cause) = storage_service::read_file(file, &location).await {
                self.ctx
                    .output
                    .add(self.ctx.simulator.now(), TraceEvent::FileReadFailure { file: file_id, location: location_name, task: task_id });
                return Err(cause);
            }
            self.ctx
                .output
                .add(self.ctx.simulator.now(), TraceEvent::FileReadCompletion { file: file_id, location: location_name, task: task_id });
        }

        let now = self.ctx.simulator.now();
        self.update_timestamps(task.key, |ts| ts.read_input_end_date = Some(now));
        Ok(())
    }

    async fn write_output_files(&self, task: &RunningTask) -> std::result::Result<(), FailureCause> {
        let now = self.ctx.simulator.now();
        self.update_timestamps(task.key, |ts| ts.write_output_start_date = Some(now));

        let writes = task
            .output_files
            .iter()
            .map(|f| self.location_for(f, Access::Write).map(|location| (f, location)))
            .collect::<std::result::Result<Vec<_>, FailureCause>>()?;

        for (file, location) in writes {
            let (file_id, location_name, task_id) = (file.id.clone(), location.to_string(), task.id.clone());
            self.ctx.output.add(
                self.ctx.simulator.now(),
                TraceEvent::FileWriteStart { file: file_id.clone(), location: location_name.clone(), task: task_id.clone() },
            );
            if let Err(cause) = storage_service::write_file(file, &location).await {
                self.ctx
                    .output
                    .add(self.ctx.simulator.now(), TraceEvent::FileWriteFailure { file: file_id, location: location_name, task: task_id });
                return Err(cause);
            }
            self.ctx
                .output
                .add(self.ctx.simulator.now(), TraceEvent::FileWriteCompletion { file: file_id, location: location_name, task: task_id });
        }

        let now = self.ctx.simulator.now();
        self.update_timestamps(task.key, |ts| ts.write_output_end_date = Some(now));
        Ok(())
    }

    /// Splits `flops` over the allocated cores and runs one compute thread
    /// per core. Thread `i` starts after `i + 1` thread startup overheads.
    async fn run_computation(&self, flops: f64, parallel_model: ParallelModel) -> std::result::Result<(), FailureCause> {
        let work_per_thread = parallel_model.work_per_thread(flops, self.num_cores);

        if self.simulate_computation_as_sleep {
            let rate = self
                .ctx
                .compute
                .flop_rate(&self.host)
                .ok_or_else(|| FailureCause::FatalFailure(format!("unknown host {}", self.host)))?;
            let longest = work_per_thread.iter().copied().fold(0.0, f64::max);
            self.ctx.simulator.sleep(self.num_cores as f64 * self.thread_startup_overhead).await;
            self.ctx.simulator.sleep(longest / rate).await;
            return Ok(());
        }

        // Dropping the set aborts every thread still running in it.
        let mut threads = JoinSet::new();
        for work in work_per_thread {
            self.ctx.simulator.sleep(self.thread_startup_overhead).await;
            let (compute, host) = (self.ctx.compute.clone(), self.host.clone());
            threads.spawn(async move { compute.compute(&host, work).await });
        }

        while let Some(joined) = threads.join_next().await {
            let outcome = joined.unwrap_or_else(|_| Err(FailureCause::ComputeThreadHasDied(self.host.clone())));
            if let Err(cause) = outcome {
                threads.abort_all();
                return Err(cause);
            }
        }
        Ok(())
    }

    /// Marks a started task as failed, once, unless it already completed.
    fn record_task_failure(&self) {
        let Some(task) = self.work_unit.task() else { return };
        if !self.task_started {
            return;
        }

        let now = self.ctx.simulator.now();
        let failed = self.workflow.update_task(task, |t| {
            if t.internal_state == TaskInternalState::Completed {
                return None;
            }
            t.internal_state = TaskInternalState::Failed;
            t.failure_count += 1;
            t.timestamps.failure_date = Some(now);
            Some(t.id.clone())
        });

        if let Some(Some(id)) = failed {
            self.ctx.output.add(now, TraceEvent::TaskFailure { task: id });
        }
    }
}
