use tokio::sync::oneshot;

use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::execution::work_unit::WorkUnitKey;
use crate::domain::job::standard_job::StandardJob;

pub type ExecutorId = u64;

/// Sent by a work unit executor to its coordinator when it is done.
#[derive(Debug)]
pub enum WorkUnitExecutorMessage {
    Done { executor: ExecutorId, unit: WorkUnitKey },
    Failed { executor: ExecutorId, unit: WorkUnitKey, cause: FailureCause },
}

/// Sent by a standard job executor to whoever submitted the job.
#[derive(Debug)]
pub enum StandardJobExecutorMessage {
    Done { job: StandardJob },
    Failed { job: StandardJob, cause: FailureCause },
}

impl StandardJobExecutorMessage {
    pub fn job(&self) -> &StandardJob {
        match self {
            StandardJobExecutorMessage::Done { job } | StandardJobExecutorMessage::Failed { job, .. } => job,
        }
    }
}

#[derive(Debug)]
pub(crate) enum ControlMessage {
    Terminate { reply: oneshot::Sender<StandardJob> },
}
