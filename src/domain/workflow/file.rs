use serde::Serialize;
use std::fmt;

use crate::domain::utils::id::FileId;

/// A data file of the workflow. Files compare and order by id only.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowFile {
    pub id: FileId,
    /// Size in bytes.
    pub size: u64,
}

impl WorkflowFile {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        WorkflowFile { id: FileId::new(id), size }
    }
}

impl PartialEq for WorkflowFile {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WorkflowFile {}

impl std::hash::Hash for WorkflowFile {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for WorkflowFile {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WorkflowFile {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for WorkflowFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
