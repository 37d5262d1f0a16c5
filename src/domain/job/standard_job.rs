use serde::Serialize;
use std::collections::BTreeMap;

use crate::domain::storage::file_location::FileLocation;
use crate::domain::utils::id::JobName;
use crate::domain::workflow::file::WorkflowFile;
use crate::domain::workflow::workflow::{TaskKey, Workflow};

/// Candidate locations per file. A list with several entries means "the
/// first of these that actually holds the file".
pub type FileLocationMap = BTreeMap<WorkflowFile, Vec<FileLocation>>;

#[derive(Debug, Clone, PartialEq)]
pub struct FileCopy {
    pub file: WorkflowFile,
    pub src: FileLocation,
    pub dst: FileLocation,
}

impl FileCopy {
    pub fn new(file: WorkflowFile, src: FileLocation, dst: FileLocation) -> Self {
        FileCopy { file, src, dst }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileDeletion {
    pub file: WorkflowFile,
    pub location: FileLocation,
}

impl FileDeletion {
    pub fn new(file: WorkflowFile, location: FileLocation) -> Self {
        FileDeletion { file, location }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StandardJobState {
    NotSubmitted,
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
}

/// What a standard job should do. Turned into a `StandardJob` by the
/// `JobManager`.
#[derive(Debug, Clone, Default)]
pub struct StandardJobSpec {
    pub tasks: Vec<TaskKey>,
    pub file_locations: FileLocationMap,
    pub pre_file_copies: Vec<FileCopy>,
    pub post_file_copies: Vec<FileCopy>,
    pub cleanup_file_deletions: Vec<FileDeletion>,
    /// Seconds spent before anything else starts.
    pub pre_overhead: f64,
    /// Seconds spent after everything else is done.
    pub post_overhead: f64,
}

/// A set of tasks of one workflow plus the file operations around them.
#[derive(Debug, Clone)]
pub struct StandardJob {
    name: JobName,
    workflow: Workflow,
    spec: StandardJobSpec,
    state: StandardJobState,
    num_completed_tasks: usize,
    submit_date: Option<f64>,
    end_date: Option<f64>,
}

impl StandardJob {
    pub(crate) fn new(name: JobName, workflow: Workflow, spec: StandardJobSpec) -> Self {
        StandardJob { name, workflow, spec, state: StandardJobState::NotSubmitted, num_completed_tasks: 0, submit_date: None, end_date: None }
    }

    pub fn name(&self) -> &JobName {
        &self.name
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn tasks(&self) -> &[TaskKey] {
        &self.spec.tasks
    }

    pub fn num_tasks(&self) -> usize {
        self.spec.tasks.len()
    }

    pub fn file_locations(&self) -> &FileLocationMap {
        &self.spec.file_locations
    }

    pub fn pre_file_copies(&self) -> &[FileCopy] {
        &self.spec.pre_file_copies
    }

    pub fn post_file_copies(&self) -> &[FileCopy] {
        &self.spec.post_file_copies
    }

    pub fn cleanup_file_deletions(&self) -> &[FileDeletion] {
        &self.spec.cleanup_file_deletions
    }

    pub fn pre_overhead(&self) -> f64 {
        self.spec.pre_overhead
    }

    pub fn post_overhead(&self) -> f64 {
        self.spec.post_overhead
    }

    pub fn state(&self) -> StandardJobState {
        self.state
    }

    pub fn num_completed_tasks(&self) -> usize {
        self.num_completed_tasks
    }

    pub fn submit_date(&self) -> Option<f64> {
        self.submit_date
    }

    pub fn end_date(&self) -> Option<f64> {
        self.end_date
    }

    pub(crate) fn set_state(&mut self, state: StandardJobState) {
        self.state = state;
    }

    pub(crate) fn set_submit_date(&mut self, date: f64) {
        self.submit_date = Some(date);
    }

    pub(crate) fn set_end_date(&mut self, date: f64) {
        self.end_date = Some(date);
    }

    pub(crate) fn increment_num_completed_tasks(&mut self) {
        self.num_completed_tasks += 1;
    }
}
