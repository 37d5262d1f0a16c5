use serde::Serialize;
use thiserror::Error;

use crate::domain::utils::id::{FileId, HostName, StorageServiceName};

/// Why a work unit (and therefore its job) failed.
///
/// Causes travel as values inside executor and job messages; nothing in the
/// engine unwinds across actor boundaries.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum FailureCause {
    #[error("file {file} not found at {location}")]
    FileNotFound { file: FileId, location: String },

    #[error("no scratch space: {0}")]
    NoScratchSpace(String),

    #[error("storage service {service} does not have enough space to store file {file}")]
    StorageServiceNotEnoughSpace { file: FileId, service: StorageServiceName },

    #[error("network error while communicating with {0}")]
    NetworkError(String),

    #[error("a compute thread has died on host {0}")]
    ComputeThreadHasDied(HostName),

    #[error("fatal failure: {0}")]
    FatalFailure(String),
}

impl FailureCause {
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, FailureCause::FileNotFound { .. })
    }
}
