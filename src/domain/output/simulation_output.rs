use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::utils::id::{FileId, HostName, TaskId};

/// Target of the structured per-job records emitted through `tracing`.
pub const ANALYTICS_TARGET: &str = "workflow_sim_core::analytics";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    TaskStart { task: TaskId, host: HostName },
    TaskCompletion { task: TaskId },
    TaskFailure { task: TaskId },
    TaskTermination { task: TaskId },
    FileReadStart { file: FileId, location: String, task: TaskId },
    FileReadCompletion { file: FileId, location: String, task: TaskId },
    FileReadFailure { file: FileId, location: String, task: TaskId },
    FileWriteStart { file: FileId, location: String, task: TaskId },
    FileWriteCompletion { file: FileId, location: String, task: TaskId },
    FileWriteFailure { file: FileId, location: String, task: TaskId },
    FileCopyStart { file: FileId, src: String, dst: String },
    FileCopyCompletion { file: FileId, src: String, dst: String },
    FileCopyFailure { file: FileId, src: String, dst: String },
}

impl TraceEvent {
    pub fn task(&self) -> Option<&TaskId> {
        match self {
            TraceEvent::TaskStart { task, .. }
            | TraceEvent::TaskCompletion { task }
            | TraceEvent::TaskFailure { task }
            | TraceEvent::TaskTermination { task }
            | TraceEvent::FileReadStart { task, .. }
            | TraceEvent::FileReadCompletion { task, .. }
            | TraceEvent::FileReadFailure { task, .. }
            | TraceEvent::FileWriteStart { task, .. }
            | TraceEvent::FileWriteCompletion { task, .. }
            | TraceEvent::FileWriteFailure { task, .. } => Some(task),
            TraceEvent::FileCopyStart { .. } | TraceEvent::FileCopyCompletion { .. } | TraceEvent::FileCopyFailure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timestamp {
    pub date: f64,
    pub event: TraceEvent,
}

/// Append-only trace of what happened during a simulation, shared by every
/// actor that records into it.
#[derive(Debug, Clone, Default)]
pub struct SimulationOutput {
    timestamps: Arc<Mutex<Vec<Timestamp>>>,
}

impl SimulationOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Timestamp>> {
        self.timestamps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add(&self, date: f64, event: TraceEvent) {
        self.lock().push(Timestamp { date, event });
    }

    pub fn timestamps(&self) -> Vec<Timestamp> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Timestamps that match `predicate`, in recording order.
    pub fn filter(&self, predicate: impl Fn(&TraceEvent) -> bool) -> Vec<Timestamp> {
        self.lock().iter().filter(|t| predicate(&t.event)).cloned().collect()
    }

    pub fn for_task(&self, task: &TaskId) -> Vec<Timestamp> {
        self.filter(|e| e.task() == Some(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_trace() {
        let output = SimulationOutput::new();
        let other = output.clone();
        let task = TaskId::new("t1");

        other.add(1.0, TraceEvent::TaskStart { task: task.clone(), host: HostName::new("h") });
        output.add(2.0, TraceEvent::TaskCompletion { task: task.clone() });
        output.add(2.0, TraceEvent::TaskCompletion { task: TaskId::new("t2") });

        assert_eq!(output.len(), 3);
        assert_eq!(other.for_task(&task).len(), 2);
        assert_eq!(output.filter(|e| matches!(e, TraceEvent::TaskCompletion { .. })).len(), 2);
    }
}
