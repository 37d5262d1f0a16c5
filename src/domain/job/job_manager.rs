use log::info;
use std::collections::BTreeSet;
use tokio::sync::mpsc;

use crate::domain::execution::config::StandardJobExecutorConfig;
use crate::domain::execution::context::ExecutionContext;
use crate::domain::execution::messages::StandardJobExecutorMessage;
use crate::domain::execution::standard_job_executor::{StandardJobExecutor, StandardJobExecutorHandle};
use crate::domain::job::standard_job::{StandardJob, StandardJobSpec, StandardJobState};
use crate::domain::utils::id::{HostName, JobName};
use crate::domain::workflow::task::{TaskInternalState, TaskState};
use crate::domain::workflow::workflow::{TaskKey, Workflow};
use crate::error::{Error, Result};

/// Creates and submits the standard jobs of one workflow. Job names are
/// `standard_job_<n>` with `n` counting up from zero per manager.
#[derive(Debug)]
pub struct JobManager {
    workflow: Workflow,
    next_job_number: u64,
}

impl JobManager {
    pub fn new(workflow: Workflow) -> Self {
        JobManager { workflow, next_job_number: 0 }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// # Returns
    /// `Error::InvalidArgument` if the job would do nothing, lists a task
    /// twice, names an unknown task, or contains a task that is not ready
    /// once the other tasks of the job are taken into account.
    pub fn create_standard_job(&mut self, spec: StandardJobSpec) -> Result<StandardJob> {
        if spec.tasks.is_empty()
            && spec.pre_file_copies.is_empty()
            && spec.post_file_copies.is_empty()
            && spec.cleanup_file_deletions.is_empty()
            && spec.pre_overhead == 0.0
            && spec.post_overhead == 0.0
        {
            return Err(Error::invalid_argument("a standard job must contain at least one task or file operation"));
        }
        for overhead in [spec.pre_overhead, spec.post_overhead] {
            if !(overhead.is_finite() && overhead >= 0.0) {
                return Err(Error::invalid_argument("job overheads must be non-negative"));
            }
        }

        self.check_tasks_schedulable(&spec.tasks)?;

        let name = JobName::new(format!("standard_job_{}", self.next_job_number));
        self.next_job_number += 1;
        Ok(StandardJob::new(name, self.workflow.clone(), spec))
    }

    /// Starts a standard job executor for `job` on `compute_resources`.
    ///
    /// # Returns
    /// The handle to terminate the job, and the receiver on which exactly
    /// one `Done` or `Failed` message arrives unless the job is terminated.
    /// `Error::InvalidArgument` if the job was already submitted or one of
    /// its tasks is pending or completed in another job.
    pub fn submit_standard_job(
        &self,
        mut job: StandardJob,
        compute_resources: Vec<(HostName, u32)>,
        ctx: ExecutionContext,
        config: StandardJobExecutorConfig,
    ) -> Result<(StandardJobExecutorHandle, mpsc::UnboundedReceiver<StandardJobExecutorMessage>)> {
        if job.state() != StandardJobState::NotSubmitted {
            return Err(Error::invalid_argument(format!("job {} has already been submitted", job.name())));
        }

        // Another job may have claimed or finished these tasks since creation.
        let tasks = job.tasks().to_vec();
        self.check_tasks_schedulable(&tasks)?;

        job.set_state(StandardJobState::Pending);
        job.set_submit_date(ctx.simulator.now());

        let (callback, notifications) = mpsc::unbounded_channel();
        let executor = StandardJobExecutor::new(job, compute_resources, ctx, config, callback)?;

        for key in tasks {
            self.workflow.update_task(key, |t| t.state = TaskState::Pending);
        }

        info!("Submitting job {} with {} tasks", executor.job().name(), executor.job().num_tasks());
        Ok((executor.start(), notifications))
    }

    /// Every task must be known and listed once. It must be ready, or wait
    /// only on parents that are completed or part of the same job.
    fn check_tasks_schedulable(&self, tasks: &[TaskKey]) -> Result<()> {
        let in_job: BTreeSet<_> = tasks.iter().copied().collect();
        if in_job.len() != tasks.len() {
            return Err(Error::invalid_argument("a task appears twice in the same job"));
        }

        for &key in tasks {
            let task = self.workflow.task(key).ok_or_else(|| Error::invalid_argument("job contains a task that is not in the workflow"))?;
            match task.state() {
                TaskState::Ready => {}
                TaskState::NotReady => {
                    let parents_ok = task.parents().iter().all(|p| {
                        in_job.contains(p) || self.workflow.internal_state(*p) == Some(TaskInternalState::Completed)
                    });
                    if !parents_ok {
                        return Err(Error::invalid_argument(format!("task {} has parents that are neither completed nor in the job", task.id)));
                    }
                }
                state => return Err(Error::invalid_argument(format!("task {} cannot be part of a new job (state {:?})", task.id, state))),
            }
        }
        Ok(())
    }
}
