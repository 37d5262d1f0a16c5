use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::storage::file_location::FileLocation;
use crate::domain::utils::id::StorageServiceName;
use crate::domain::workflow::file::WorkflowFile;

/// A storage service that work units read from, write to and copy between.
///
/// Every operation suspends the caller for the simulated transfer time and
/// reports failures as a `FailureCause`.
#[async_trait]
pub trait StorageService: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &StorageServiceName;

    fn mount_point(&self) -> &str;

    /// Bytes per second.
    fn bandwidth(&self) -> f64;

    async fn lookup_file(&self, file: &WorkflowFile, path: &str) -> Result<bool, FailureCause>;

    async fn read_file(&self, file: &WorkflowFile, path: &str) -> Result<(), FailureCause>;

    async fn write_file(&self, file: &WorkflowFile, path: &str) -> Result<(), FailureCause>;

    async fn delete_file(&self, file: &WorkflowFile, path: &str) -> Result<(), FailureCause>;
}

pub type SharedStorageService = Arc<dyn StorageService>;

fn concrete(location: &FileLocation) -> Result<(&SharedStorageService, &str), FailureCause> {
    match location {
        FileLocation::At { service, path } => Ok((service, path.as_str())),
        FileLocation::Scratch => Err(FailureCause::NoScratchSpace("scratch location was not resolved before use".to_string())),
    }
}

pub async fn lookup_file(file: &WorkflowFile, location: &FileLocation) -> Result<bool, FailureCause> {
    let (service, path) = concrete(location)?;
    service.lookup_file(file, path).await
}

pub async fn read_file(file: &WorkflowFile, location: &FileLocation) -> Result<(), FailureCause> {
    let (service, path) = concrete(location)?;
    service.read_file(file, path).await
}

pub async fn write_file(file: &WorkflowFile, location: &FileLocation) -> Result<(), FailureCause> {
    let (service, path) = concrete(location)?;
    service.write_file(file, path).await
}

pub async fn delete_file(file: &WorkflowFile, location: &FileLocation) -> Result<(), FailureCause> {
    let (service, path) = concrete(location)?;
    service.delete_file(file, path).await
}

/// Copies `file` from `src` to `dst`. The source read and the destination
/// write proceed concurrently, so the copy takes as long as the slower side.
pub async fn copy_file(file: &WorkflowFile, src: &FileLocation, dst: &FileLocation) -> Result<(), FailureCause> {
    if src == dst {
        return Err(FailureCause::FatalFailure(format!("cannot copy file {} onto itself at {}", file, src)));
    }
    let (src_service, src_path) = concrete(src)?;
    let (dst_service, dst_path) = concrete(dst)?;

    futures::try_join!(src_service.read_file(file, src_path), dst_service.write_file(file, dst_path))?;
    Ok(())
}
