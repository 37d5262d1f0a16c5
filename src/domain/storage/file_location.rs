use std::fmt;

use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::storage::storage_service::SharedStorageService;
use crate::domain::utils::id::JobName;

/// Where a file lives or should be put.
#[derive(Debug, Clone)]
pub enum FileLocation {
    /// A directory on a concrete storage service.
    At { service: SharedStorageService, path: String },
    /// Whatever scratch space the executing compute resource provides.
    Scratch,
}

impl FileLocation {
    pub fn at(service: SharedStorageService, path: impl Into<String>) -> Self {
        FileLocation::At { service, path: path.into() }
    }

    /// The mount point of `service`.
    pub fn root(service: SharedStorageService) -> Self {
        let path = service.mount_point().to_string();
        FileLocation::At { service, path }
    }

    pub fn scratch() -> Self {
        FileLocation::Scratch
    }

    pub fn is_scratch(&self) -> bool {
        matches!(self, FileLocation::Scratch)
    }

    pub fn service(&self) -> Option<&SharedStorageService> {
        match self {
            FileLocation::At { service, .. } => Some(service),
            FileLocation::Scratch => None,
        }
    }

    pub fn path(&self) -> Option<&str> {
        match self {
            FileLocation::At { path, .. } => Some(path),
            FileLocation::Scratch => None,
        }
    }

    /// The per-job directory on a scratch service. Jobs sharing one
    /// scratch disk never see each other's files.
    pub fn job_scratch_dir(scratch: &SharedStorageService, job_name: &JobName) -> Self {
        let path = format!("{}/{}", scratch.mount_point().trim_end_matches('/'), job_name);
        FileLocation::At { service: scratch.clone(), path }
    }

    /// Replaces the scratch sentinel with the job's directory on `scratch`.
    /// Concrete locations are returned unchanged.
    pub fn resolve_scratch(&self, scratch: Option<&SharedStorageService>, job_name: &JobName) -> Result<FileLocation, FailureCause> {
        match (self, scratch) {
            (FileLocation::Scratch, Some(scratch)) => Ok(Self::job_scratch_dir(scratch, job_name)),
            (FileLocation::Scratch, None) => Err(FailureCause::NoScratchSpace("no scratch space on compute resource".to_string())),
            (FileLocation::At { .. }, _) => Ok(self.clone()),
        }
    }
}

impl PartialEq for FileLocation {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FileLocation::Scratch, FileLocation::Scratch) => true,
            (FileLocation::At { service: s1, path: p1 }, FileLocation::At { service: s2, path: p2 }) => s1.name() == s2.name() && p1 == p2,
            _ => false,
        }
    }
}

impl fmt::Display for FileLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileLocation::At { service, path } => write!(f, "{}:{}", service.name(), path),
            FileLocation::Scratch => write!(f, "SCRATCH"),
        }
    }
}
