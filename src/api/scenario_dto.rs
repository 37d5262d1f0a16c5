use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::workflow::parallel_model::ParallelModel;

/// Root of a scenario file: a platform, a workflow, and one standard job to
/// run on part of the platform.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioDto {
    pub name: String,
    pub platform: PlatformDto,
    #[serde(default)]
    pub storage_services: Vec<StorageServiceDto>,
    /// Name of the storage service acting as scratch space, if any.
    #[serde(default)]
    pub scratch_space: Option<String>,
    pub workflow: WorkflowDto,
    pub job: JobDto,
    pub compute_resources: Vec<ComputeResourceDto>,
    /// Executor properties, e.g. `THREAD_STARTUP_OVERHEAD`.
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlatformDto {
    pub hosts: Vec<HostDto>,
    #[serde(default)]
    pub control_bandwidth: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HostDto {
    pub name: String,
    pub cores: u32,
    pub flop_rate: f64,
    #[serde(default)]
    pub memory: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StorageServiceDto {
    pub name: String,
    pub mount_point: String,
    pub capacity: u64,
    pub bandwidth: f64,
    /// Files present before the simulation starts.
    #[serde(default)]
    pub files: Vec<StagedFileDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StagedFileDto {
    pub file: String,
    /// Defaults to the mount point.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDto {
    pub name: String,
    #[serde(default)]
    pub files: Vec<FileDto>,
    pub tasks: Vec<TaskDto>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileDto {
    pub id: String,
    pub size: u64,
}

fn one() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    pub id: String,
    pub flops: f64,
    #[serde(default = "one")]
    pub min_cores: u32,
    #[serde(default = "one")]
    pub max_cores: u32,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub parallel_model: Option<ParallelModel>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDto {
    pub parent: String,
    pub child: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JobDto {
    pub tasks: Vec<String>,
    pub file_locations: Vec<FileLocationsDto>,
    pub pre_file_copies: Vec<FileCopyDto>,
    pub post_file_copies: Vec<FileCopyDto>,
    pub cleanup_file_deletions: Vec<FileDeletionDto>,
    pub pre_overhead: f64,
    pub post_overhead: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileLocationsDto {
    pub file: String,
    pub locations: Vec<LocationDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocationDto {
    Scratch,
    Storage {
        service: String,
        /// Defaults to the mount point of the service.
        #[serde(default)]
        path: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileCopyDto {
    pub file: String,
    pub src: LocationDto,
    pub dst: LocationDto,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileDeletionDto {
    pub file: String,
    pub location: LocationDto,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComputeResourceDto {
    pub host: String,
    pub cores: u32,
}
