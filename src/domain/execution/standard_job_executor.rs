use futures::FutureExt;
use log::{debug, error, info, warn};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};

use crate::domain::execution::config::{CoreAllocationAlgorithm, HostSelectionAlgorithm, StandardJobExecutorConfig, TaskSelectionAlgorithm};
use crate::domain::execution::context::ExecutionContext;
use crate::domain::execution::decomposer;
use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::execution::messages::{ControlMessage, ExecutorId, StandardJobExecutorMessage, WorkUnitExecutorMessage};
use crate::domain::execution::work_unit::{WorkUnit, WorkUnitGraph, WorkUnitKey};
use crate::domain::execution::work_unit_executor::WorkUnitExecutor;
use crate::domain::job::standard_job::{StandardJob, StandardJobState};
use crate::domain::output::simulation_output::{ANALYTICS_TARGET, TraceEvent};
use crate::domain::utils::id::{HostName, JobName, TaskId};
use crate::domain::workflow::task::TaskInternalState;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HostResources {
    num_cores: u32,
    ram: u64,
}

#[derive(Debug)]
struct RunningUnit {
    executor: ExecutorId,
    host: HostName,
    num_cores: u32,
    ram: u64,
    abort: AbortHandle,
}

/// What a ready work unit asks for.
#[derive(Debug, Clone, Copy)]
struct Requirements {
    min_cores: u32,
    desired_cores: u32,
    ram: u64,
}

/// Sort key of a ready work unit. Units without a task carry `None`.
#[derive(Debug)]
struct Candidate {
    key: WorkUnitKey,
    task: Option<(TaskId, f64, u32)>,
}

#[derive(Debug)]
enum JobOutcome {
    Completed,
    Failed(FailureCause),
    Terminated(oneshot::Sender<StandardJob>),
}

/// Runs one standard job on a fixed set of `(host, cores)` resources.
///
/// The executor decomposes the job into work units, starts one
/// `WorkUnitExecutor` per ready unit whenever a host has room for it, and
/// reports the outcome of the whole job to the submitter exactly once.
/// The first failing unit fails the job and kills every other executor.
#[derive(Debug)]
pub struct StandardJobExecutor {
    job: StandardJob,
    ctx: ExecutionContext,
    config: StandardJobExecutorConfig,
    callback: mpsc::UnboundedSender<StandardJobExecutorMessage>,

    compute_resources: BTreeMap<HostName, HostResources>,
    core_availabilities: BTreeMap<HostName, u32>,
    ram_availabilities: BTreeMap<HostName, u64>,

    graph: WorkUnitGraph,
    non_ready_work_units: BTreeSet<WorkUnitKey>,
    ready_work_units: BTreeSet<WorkUnitKey>,
    running_work_units: BTreeMap<WorkUnitKey, RunningUnit>,
    completed_work_units: BTreeSet<WorkUnitKey>,

    /// Every executor resolves to its unit and whether it panicked.
    executors: JoinSet<(WorkUnitKey, bool)>,
    next_executor_id: ExecutorId,
    inbox_tx: mpsc::UnboundedSender<WorkUnitExecutorMessage>,
    inbox_rx: mpsc::UnboundedReceiver<WorkUnitExecutorMessage>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    control_rx: mpsc::UnboundedReceiver<ControlMessage>,
}

/// Submitter-side handle on a running standard job executor.
#[derive(Debug)]
pub struct StandardJobExecutorHandle {
    job_name: JobName,
    control: mpsc::UnboundedSender<ControlMessage>,
    task: JoinHandle<()>,
}

impl StandardJobExecutorHandle {
    pub fn job_name(&self) -> &JobName {
        &self.job_name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Kills every running work unit executor and hands the job back. No
    /// completion or failure message is sent for a terminated job.
    ///
    /// # Returns
    /// `Error::InvalidArgument` if the job had already completed or failed.
    pub async fn terminate(self) -> Result<StandardJob> {
        let (reply, response) = oneshot::channel();
        self.control
            .send(ControlMessage::Terminate { reply })
            .map_err(|_| Error::invalid_argument(format!("job {} has already finished", self.job_name)))?;

        response.await.map_err(|_| Error::invalid_argument(format!("job {} has already finished", self.job_name)))
    }

    /// Waits until the executor has shut down.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| Error::Internal(format!("standard job executor for {} crashed: {}", self.job_name, e)))
    }
}

impl StandardJobExecutor {
    /// Checks that the job can run on `compute_resources` at all.
    ///
    /// # Returns
    /// `Error::InvalidArgument` if the resources are empty, name unknown
    /// hosts, claim zero cores or more cores than a host has, or if some task
    /// has no single host offering both its minimum cores and its RAM.
    pub fn new(
        job: StandardJob,
        compute_resources: Vec<(HostName, u32)>,
        ctx: ExecutionContext,
        config: StandardJobExecutorConfig,
        callback: mpsc::UnboundedSender<StandardJobExecutorMessage>,
    ) -> Result<Self> {
        config.validate()?;

        if compute_resources.is_empty() {
            return Err(Error::invalid_argument("a standard job executor needs at least one compute resource"));
        }

        let mut resources = BTreeMap::new();
        for (host, num_cores) in compute_resources {
            let host_cores = ctx
                .compute
                .host_num_cores(&host)
                .ok_or_else(|| Error::invalid_argument(format!("unknown host {}", host)))?;
            if num_cores == 0 {
                return Err(Error::invalid_argument(format!("compute resource {} must have at least one core", host)));
            }
            if num_cores > host_cores {
                return Err(Error::invalid_argument(format!("host {} only has {} cores, {} requested", host, host_cores, num_cores)));
            }
            let ram = ctx.compute.host_memory(&host).unwrap_or(0);
            if resources.insert(host.clone(), HostResources { num_cores, ram }).is_some() {
                return Err(Error::invalid_argument(format!("compute resource {} given twice", host)));
            }
        }

        // Each task needs one host that has both its cores and its RAM.
        for &key in job.tasks() {
            let Some((id, min_cores, memory)) = job.workflow().with_task(key, |t| (t.id.clone(), t.min_num_cores, t.memory_requirement))
            else {
                continue;
            };
            if !resources.values().any(|r| r.num_cores >= min_cores) {
                return Err(Error::invalid_argument(format!(
                    "insufficient cores: task {} of job {} needs {} cores",
                    id,
                    job.name(),
                    min_cores
                )));
            }
            if !resources.values().any(|r| r.num_cores >= min_cores && r.ram >= memory) {
                return Err(Error::invalid_argument(format!(
                    "insufficient RAM: no host with {} cores has the {} bytes task {} of job {} needs",
                    min_cores,
                    memory,
                    id,
                    job.name()
                )));
            }
        }

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Ok(StandardJobExecutor {
            job,
            ctx,
            config,
            callback,
            core_availabilities: resources.iter().map(|(h, r)| (h.clone(), r.num_cores)).collect(),
            ram_availabilities: resources.iter().map(|(h, r)| (h.clone(), r.ram)).collect(),
            compute_resources: resources,
            graph: WorkUnitGraph::new(),
            non_ready_work_units: BTreeSet::new(),
            ready_work_units: BTreeSet::new(),
            running_work_units: BTreeMap::new(),
            completed_work_units: BTreeSet::new(),
            executors: JoinSet::new(),
            next_executor_id: 0,
            inbox_tx,
            inbox_rx,
            control_tx,
            control_rx,
        })
    }

    pub fn job(&self) -> &StandardJob {
        &self.job
    }

    /// Spawns the executor on the current tokio runtime.
    pub fn start(self) -> StandardJobExecutorHandle {
        let job_name = self.job.name().clone();
        let control = self.control_tx.clone();
        let task = tokio::spawn(self.run());
        StandardJobExecutorHandle { job_name, control, task }
    }

    async fn run(mut self) {
        self.job.set_state(StandardJobState::Running);

        let outcome = match self.create_work_units() {
            Ok(()) => {
                info!("Job {} started with {} work units on {} hosts", self.job.name(), self.graph.len(), self.compute_resources.len());
                self.main_loop().await
            }
            Err(e) => JobOutcome::Failed(FailureCause::FatalFailure(e.to_string())),
        };

        self.finish(outcome).await;
    }

    fn create_work_units(&mut self) -> Result<()> {
        self.graph = decomposer::create_work_units(&self.job, self.ctx.scratch_space.as_ref())?;
        let (ready, non_ready) = self.graph.partition_ready();
        self.ready_work_units = ready;
        self.non_ready_work_units = non_ready;
        Ok(())
    }

    async fn main_loop(&mut self) -> JobOutcome {
        loop {
            if self.non_ready_work_units.is_empty() && self.ready_work_units.is_empty() && self.running_work_units.is_empty() {
                return JobOutcome::Completed;
            }

            self.dispatch_ready_work_units();

            if self.running_work_units.is_empty() {
                return self.fail(FailureCause::FatalFailure(format!(
                    "none of the compute resources of job {} can run its remaining work units",
                    self.job.name()
                )));
            }

            tokio::select! {
                Some(control) = self.control_rx.recv() => match control {
                    ControlMessage::Terminate { reply } => {
                        info!("Terminating job {}", self.job.name());
                        self.kill_running_work_units();
                        return JobOutcome::Terminated(reply);
                    }
                },
                Some(message) = self.inbox_rx.recv() => {
                    if let Some(outcome) = self.process_message(message) {
                        return outcome;
                    }
                }
                Some(joined) = self.executors.join_next() => {
                    if let Some(outcome) = self.process_executor_exit(joined) {
                        return outcome;
                    }
                }
            }
        }
    }

    fn process_message(&mut self, message: WorkUnitExecutorMessage) -> Option<JobOutcome> {
        match message {
            WorkUnitExecutorMessage::Done { executor, unit } => match self.process_work_unit_completion(executor, unit) {
                Ok(()) => None,
                Err(e) => {
                    error!("Job {}: {}", self.job.name(), e);
                    Some(self.fail(FailureCause::FatalFailure(e.to_string())))
                }
            },
            WorkUnitExecutorMessage::Failed { executor, unit, cause } => {
                debug!("Work unit executor {} of job {} failed: {}", executor, self.job.name(), cause);
                self.release_work_unit(unit);
                Some(self.fail(cause))
            }
        }
    }

    fn process_work_unit_completion(&mut self, executor: ExecutorId, unit: WorkUnitKey) -> Result<()> {
        match self.running_work_units.get(&unit) {
            Some(run) if run.executor == executor => {}
            _ => return Err(Error::Internal(format!("completion from unknown work unit executor {}", executor))),
        }
        self.release_work_unit(unit);
        self.completed_work_units.insert(unit);

        let (task, children) = self
            .graph
            .get(unit)
            .map(|u| (u.task(), u.children().clone()))
            .ok_or_else(|| Error::Internal("completed work unit is not part of the job".to_string()))?;
        if task.is_some() {
            self.job.increment_num_completed_tasks();
        }

        for child in children {
            match self.graph.complete_parent_of(child) {
                Some(0) => {
                    if !self.non_ready_work_units.remove(&child) {
                        return Err(Error::Internal("a work unit became ready twice".to_string()));
                    }
                    self.ready_work_units.insert(child);
                }
                Some(_) => {}
                None => return Err(Error::Internal("work unit child is not part of the job".to_string())),
            }
        }
        Ok(())
    }

    fn process_executor_exit(&mut self, joined: std::result::Result<(WorkUnitKey, bool), JoinError>) -> Option<JobOutcome> {
        let (unit, crashed) = match joined {
            Ok(exit) => exit,
            // Cancelled by us.
            Err(_) => return None,
        };
        if !crashed || !self.running_work_units.contains_key(&unit) {
            return None;
        }

        error!("A work unit executor of job {} crashed", self.job.name());
        self.record_crashed_task(unit);
        self.release_work_unit(unit);
        Some(self.fail(FailureCause::FatalFailure("work unit executor crashed".to_string())))
    }

    /// Clears all pending work and kills what still runs.
    fn fail(&mut self, cause: FailureCause) -> JobOutcome {
        self.non_ready_work_units.clear();
        self.ready_work_units.clear();
        self.kill_running_work_units();
        JobOutcome::Failed(cause)
    }

    fn release_work_unit(&mut self, unit: WorkUnitKey) {
        if let Some(run) = self.running_work_units.remove(&unit) {
            self.release_resources(&run);
        }
    }

    fn release_resources(&mut self, run: &RunningUnit) {
        if let Some(cores) = self.core_availabilities.get_mut(&run.host) {
            *cores += run.num_cores;
        }
        if let Some(ram) = self.ram_availabilities.get_mut(&run.host) {
            *ram += run.ram;
        }
        debug_assert!(self.core_availabilities.iter().all(|(h, c)| self.compute_resources.get(h).is_some_and(|r| *c <= r.num_cores)));
    }

    fn kill_running_work_units(&mut self) {
        let running = std::mem::take(&mut self.running_work_units);
        let now = self.ctx.simulator.now();

        for (unit, run) in running {
            debug!("Killing work unit executor {} on {}", run.executor, run.host);
            run.abort.abort();
            self.release_resources(&run);

            let Some(task) = self.graph.get(unit).and_then(WorkUnit::task) else { continue };
            let terminated = self.job.workflow().update_task(task, |t| {
                if t.internal_state != TaskInternalState::Running {
                    return None;
                }
                t.timestamps.termination_date = Some(now);
                Some(t.id.clone())
            });
            if let Some(Some(id)) = terminated {
                self.ctx.output.add(now, TraceEvent::TaskTermination { task: id });
            }
        }
    }

    fn record_crashed_task(&self, unit: WorkUnitKey) {
        let Some(task) = self.graph.get(unit).and_then(WorkUnit::task) else { return };
        let now = self.ctx.simulator.now();
        let failed = self.job.workflow().update_task(task, |t| {
            if t.internal_state != TaskInternalState::Running {
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

    fn requirements(&self, unit: &WorkUnit) -> Requirements {
        let Some(task) = unit.task() else {
            return Requirements { min_cores: 1, desired_cores: 1, ram: 0 };
        };
        let allocation = self.config.core_allocation_algorithm;
        self.job
            .workflow()
            .with_task(task, |t| {
                let desired_cores = match allocation {
                    CoreAllocationAlgorithm::Maximum => t.max_num_cores,
                    CoreAllocationAlgorithm::Minimum => t.min_num_cores,
                };
                Requirements { min_cores: t.min_num_cores, desired_cores, ram: t.memory_requirement }
            })
            .unwrap_or(Requirements { min_cores: 1, desired_cores: 1, ram: 0 })
    }

    /// Ready units in dispatch order: units without a task first, then tasks
    /// by the configured criterion, ties broken by task id.
    fn sorted_ready_work_units(&self) -> Vec<WorkUnitKey> {
        let workflow = self.job.workflow();
        let mut candidates: Vec<Candidate> = self
            .ready_work_units
            .iter()
            .map(|&key| {
                let task = self
                    .graph
                    .get(key)
                    .and_then(WorkUnit::task)
                    .and_then(|task| workflow.with_task(task, |t| (t.id.clone(), t.flops, t.min_num_cores)));
                Candidate { key, task }
            })
            .collect();

        let selection = self.config.task_selection_algorithm;
        candidates.sort_by(|a, b| match (&a.task, &b.task) {
            (None, None) => a.key.cmp(&b.key),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some((id_a, flops_a, cores_a)), Some((id_b, flops_b, cores_b))) => {
                let primary = match selection {
                    TaskSelectionAlgorithm::MaximumFlops => flops_b.total_cmp(flops_a),
                    TaskSelectionAlgorithm::MaximumMinimumCores => cores_b.cmp(cores_a),
                };
                primary.then_with(|| id_a.cmp(id_b))
            }
        });

        candidates.into_iter().map(|c| c.key).collect()
    }

    /// Picks a host with at least `min_cores` free cores and enough free RAM.
    ///
    /// # Returns
    /// The host and the number of cores to allocate on it.
    fn select_host(&self, requirements: Requirements) -> Option<(HostName, u32)> {
        let allocation = |available: u32| available.min(requirements.desired_cores);
        let candidates = self.core_availabilities.iter().filter(|(host, cores)| {
            **cores >= requirements.min_cores && self.ram_availabilities.get(*host).is_some_and(|ram| *ram >= requirements.ram)
        });

        let chosen = match self.config.host_selection_algorithm {
            // Most free cores, first host on ties.
            HostSelectionAlgorithm::MaxFit => candidates.fold(None, |best: Option<(&HostName, &u32)>, current| match best {
                Some(best) if best.1 >= current.1 => Some(best),
                _ => Some(current),
            }),
            // Fewest cores left over, first host on ties.
            HostSelectionAlgorithm::BestFit => candidates.min_by_key(|(_, cores)| **cores - allocation(**cores)),
        };

        chosen.map(|(host, cores)| (host.clone(), allocation(*cores)))
    }

    fn dispatch_ready_work_units(&mut self) {
        for key in self.sorted_ready_work_units() {
            let Some(unit) = self.graph.get(key) else { continue };
            let requirements = self.requirements(unit);

            let Some((host, num_cores)) = self.select_host(requirements) else {
                debug!("No room for a work unit of job {} (needs {} cores)", self.job.name(), requirements.min_cores);
                continue;
            };

            if let Err(e) = self.start_work_unit_executor(key, host, num_cores, requirements.ram) {
                error!("Could not start a work unit executor for job {}: {}", self.job.name(), e);
            }
        }
    }

    fn start_work_unit_executor(&mut self, key: WorkUnitKey, host: HostName, num_cores: u32, ram: u64) -> Result<()> {
        let unit = self.graph.get(key).cloned().ok_or_else(|| Error::Internal("ready work unit is not part of the job".to_string()))?;
        let id = self.next_executor_id;

        let executor = WorkUnitExecutor::new(
            id,
            host.clone(),
            num_cores,
            ram,
            key,
            unit,
            self.job.workflow().clone(),
            self.ctx.clone(),
            &self.config,
            self.inbox_tx.clone(),
        )?;
        self.next_executor_id += 1;

        if let Some(cores) = self.core_availabilities.get_mut(&host) {
            *cores -= num_cores;
        }
        if let Some(available) = self.ram_availabilities.get_mut(&host) {
            *available -= ram;
        }
        self.ready_work_units.remove(&key);

        debug!("Starting work unit executor {} for job {} on {} with {} cores", id, self.job.name(), host, num_cores);
        let abort = self.executors.spawn(async move {
            let crashed = AssertUnwindSafe(executor.run()).catch_unwind().await.is_err();
            (key, crashed)
        });
        self.running_work_units.insert(key, RunningUnit { executor: id, host, num_cores, ram, abort });
        Ok(())
    }

    async fn finish(mut self, outcome: JobOutcome) {
        let now = self.ctx.simulator.now();
        let state = match outcome {
            JobOutcome::Completed => StandardJobState::Completed,
            JobOutcome::Failed(_) => StandardJobState::Failed,
            JobOutcome::Terminated(_) => StandardJobState::Terminated,
        };
        self.job.set_state(state);
        self.job.set_end_date(now);

        let tasks = self.job.tasks().to_vec();
        if state == StandardJobState::Completed {
            self.job.workflow().settle_completed_tasks(&tasks);
        } else {
            self.job.workflow().settle_unfinished_tasks(&tasks);
        }

        tracing::info!(
            target: ANALYTICS_TARGET,
            Time = now,
            LogDescription = "Standard job finished",
            JobName = %self.job.name(),
            JobState = ?state,
            NumberOfTasks = self.job.num_tasks(),
            CompletedTasks = self.job.num_completed_tasks(),
            CompletedWorkUnits = self.completed_work_units.len(),
            WorkUnits = self.graph.len(),
        );

        match outcome {
            JobOutcome::Completed => {
                info!("Job {} completed at {:.3}", self.job.name(), now);
                let delay = self.ctx.compute.message_transfer_time(self.config.standard_job_done_message_payload);
                self.ctx.simulator.sleep(delay).await;
                if self.callback.send(StandardJobExecutorMessage::Done { job: self.job }).is_err() {
                    warn!("Nobody is waiting for the completion of a standard job");
                }
            }
            JobOutcome::Failed(cause) => {
                warn!("Job {} failed at {:.3}: {}", self.job.name(), now, cause);
                let delay = self.ctx.compute.message_transfer_time(self.config.standard_job_failed_message_payload);
                self.ctx.simulator.sleep(delay).await;
                if self.callback.send(StandardJobExecutorMessage::Failed { job: self.job, cause }).is_err() {
                    warn!("Nobody is waiting for the failure of a standard job");
                }
            }
            JobOutcome::Terminated(reply) => {
                info!("Job {} terminated at {:.3}", self.job.name(), now);
                let _ = reply.send(self.job);
            }
        }
    }
}
