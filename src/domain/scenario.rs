use log::info;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::scenario_dto::{FileCopyDto, LocationDto, ScenarioDto};
use crate::domain::compute::compute_substrate::SharedComputeSubstrate;
use crate::domain::compute::simulated_platform::{HostSpec, SimulatedPlatform};
use crate::domain::execution::config::StandardJobExecutorConfig;
use crate::domain::execution::context::ExecutionContext;
use crate::domain::execution::messages::StandardJobExecutorMessage;
use crate::domain::job::job_manager::JobManager;
use crate::domain::job::standard_job::{FileCopy, FileDeletion, FileLocationMap, StandardJobSpec};
use crate::domain::output::simulation_output::{SimulationOutput, Timestamp};
use crate::domain::simulator::simulator::SharedSimulator;
use crate::domain::storage::file_location::FileLocation;
use crate::domain::storage::simple_storage_service::SimpleStorageService;
use crate::domain::storage::storage_service::{SharedStorageService, StorageService};
use crate::domain::utils::id::{FileId, HostName, StorageServiceName, TaskId};
use crate::domain::workflow::file::WorkflowFile;
use crate::domain::workflow::task::{Task, TaskState};
use crate::domain::workflow::workflow::{TaskKey, Workflow};
use crate::error::{Error, Result};

/// A fully built simulation: platform, storage, workflow and the standard
/// job to run.
#[derive(Debug)]
pub struct Scenario {
    pub name: String,
    pub simulator: SharedSimulator,
    pub platform: Arc<SimulatedPlatform>,
    pub storage_services: BTreeMap<StorageServiceName, Arc<SimpleStorageService>>,
    pub scratch_space: Option<Arc<SimpleStorageService>>,
    pub workflow: Workflow,
    pub job_spec: StandardJobSpec,
    pub compute_resources: Vec<(HostName, u32)>,
    pub config: StandardJobExecutorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobReport {
    Completed,
    Failed { cause: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub id: TaskId,
    pub state: TaskState,
    pub host: Option<HostName>,
    pub num_cores: u32,
    pub start_date: Option<f64>,
    pub end_date: Option<f64>,
    pub failure_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub job: String,
    pub outcome: JobReport,
    pub makespan: f64,
    pub tasks: Vec<TaskReport>,
    pub trace: Vec<Timestamp>,
}

fn lookup_file(workflow: &Workflow, id: &str) -> Result<WorkflowFile> {
    workflow
        .file(&FileId::new(id))
        .ok_or_else(|| Error::ModelConstructionError(format!("unknown file '{}'", id)))
}

fn lookup_task(workflow: &Workflow, id: &str) -> Result<TaskKey> {
    workflow
        .task_key(&TaskId::new(id))
        .ok_or_else(|| Error::ModelConstructionError(format!("unknown task '{}'", id)))
}

impl Scenario {
    pub fn from_dto(dto: ScenarioDto, simulator: SharedSimulator) -> Result<Self> {
        let mut platform = SimulatedPlatform::new(simulator.clone());
        for host in dto.platform.hosts {
            platform.add_host(host.name, HostSpec { num_cores: host.cores, flop_rate: host.flop_rate, memory: host.memory })?;
        }
        if let Some(bandwidth) = dto.platform.control_bandwidth {
            platform = platform.with_control_bandwidth(bandwidth)?;
        }

        let workflow = Workflow::new(dto.workflow.name);
        for file in &dto.workflow.files {
            workflow.add_file(file.id.clone(), file.size)?;
        }
        for task_dto in &dto.workflow.tasks {
            let mut task = Task::new(task_dto.id.clone(), task_dto.flops, task_dto.min_cores, task_dto.max_cores, task_dto.memory)?;
            if let Some(model) = task_dto.parallel_model {
                task = task.with_parallel_model(model)?;
            }
            let key = workflow.add_task(task)?;
            for input in &task_dto.inputs {
                workflow.add_input_file(key, &lookup_file(&workflow, input)?)?;
            }
            for output in &task_dto.outputs {
                workflow.add_output_file(key, &lookup_file(&workflow, output)?)?;
            }
        }
        for dependency in &dto.workflow.dependencies {
            workflow.add_control_dependency(lookup_task(&workflow, &dependency.parent)?, lookup_task(&workflow, &dependency.child)?)?;
        }

        let mut storage_services = BTreeMap::new();
        for ss in dto.storage_services {
            let service = SimpleStorageService::new(ss.name, ss.mount_point, ss.capacity, ss.bandwidth, simulator.clone())?.shared();
            for staged in &ss.files {
                let path = staged.path.clone().unwrap_or_else(|| service.mount_point().to_string());
                service.stage_file(&lookup_file(&workflow, &staged.file)?, &path)?;
            }
            if storage_services.insert(service.name().clone(), service.clone()).is_some() {
                return Err(Error::ModelConstructionError(format!("storage service '{}' defined twice", service.name())));
            }
        }

        let scratch_space = match &dto.scratch_space {
            Some(name) => Some(
                storage_services
                    .get(&StorageServiceName::new(name.clone()))
                    .cloned()
                    .ok_or_else(|| Error::ModelConstructionError(format!("unknown scratch storage service '{}'", name)))?,
            ),
            None => None,
        };

        let location = |spec: &LocationDto| -> Result<FileLocation> {
            match spec {
                LocationDto::Scratch => Ok(FileLocation::scratch()),
                LocationDto::Storage { service, path } => {
                    let service: SharedStorageService = storage_services
                        .get(&StorageServiceName::new(service.clone()))
                        .cloned()
                        .ok_or_else(|| Error::ModelConstructionError(format!("unknown storage service '{}'", service)))?;
                    Ok(match path {
                        Some(path) => FileLocation::at(service, path.clone()),
                        None => FileLocation::root(service),
                    })
                }
            }
        };

        let mut file_locations = FileLocationMap::new();
        for entry in &dto.job.file_locations {
            let locations = entry.locations.iter().map(&location).collect::<Result<Vec<_>>>()?;
            file_locations.insert(lookup_file(&workflow, &entry.file)?, locations);
        }

        let copies = |copies: &[FileCopyDto]| -> Result<Vec<FileCopy>> {
            copies
                .iter()
                .map(|c| -> Result<FileCopy> { Ok(FileCopy::new(lookup_file(&workflow, &c.file)?, location(&c.src)?, location(&c.dst)?)) })
                .collect()
        };

        let job_spec = StandardJobSpec {
            tasks: dto.job.tasks.iter().map(|id| lookup_task(&workflow, id)).collect::<Result<Vec<_>>>()?,
            file_locations,
            pre_file_copies: copies(&dto.job.pre_file_copies)?,
            post_file_copies: copies(&dto.job.post_file_copies)?,
            cleanup_file_deletions: dto
                .job
                .cleanup_file_deletions
                .iter()
                .map(|d| -> Result<FileDeletion> { Ok(FileDeletion::new(lookup_file(&workflow, &d.file)?, location(&d.location)?)) })
                .collect::<Result<Vec<_>>>()?,
            pre_overhead: dto.job.pre_overhead,
            post_overhead: dto.job.post_overhead,
        };

        let compute_resources = dto.compute_resources.into_iter().map(|r| (HostName::new(r.host), r.cores)).collect();
        let config = StandardJobExecutorConfig::from_properties(&dto.properties)?;

        Ok(Scenario {
            name: dto.name,
            simulator,
            platform: platform.shared(),
            storage_services,
            scratch_space,
            workflow,
            job_spec,
            compute_resources,
            config,
        })
    }

    /// Submits the job and waits, in simulated time, for its outcome.
    pub async fn run(self) -> Result<ScenarioReport> {
        let output = SimulationOutput::new();
        let compute: SharedComputeSubstrate = self.platform.clone();
        let mut ctx = ExecutionContext::new(self.simulator.clone(), compute).with_output(output.clone());
        if let Some(scratch) = &self.scratch_space {
            ctx = ctx.with_scratch_space(scratch.clone());
        }

        let mut manager = JobManager::new(self.workflow.clone());
        let job = manager.create_standard_job(self.job_spec)?;
        let job_name = job.name().to_string();
        let start = self.simulator.now();

        let (handle, mut notifications) = manager.submit_standard_job(job, self.compute_resources, ctx, self.config)?;
        let message = notifications
            .recv()
            .await
            .ok_or_else(|| Error::Internal(format!("job {} finished without reporting", job_name)))?;
        handle.join().await?;

        let outcome = match &message {
            StandardJobExecutorMessage::Done { .. } => JobReport::Completed,
            StandardJobExecutorMessage::Failed { cause, .. } => JobReport::Failed { cause: cause.to_string() },
        };
        let makespan = self.simulator.now() - start;
        info!("Scenario {} finished after {:.3}s: {:?}", self.name, makespan, outcome);

        let tasks = message
            .job()
            .tasks()
            .iter()
            .filter_map(|key| self.workflow.task(*key))
            .map(|t| TaskReport {
                state: t.state(),
                host: t.execution_host.clone(),
                num_cores: t.num_cores_allocated,
                start_date: t.timestamps.start_date,
                end_date: t.timestamps.end_date,
                failure_count: t.failure_count,
                id: t.id,
            })
            .collect();

        Ok(ScenarioReport { scenario: self.name, job: job_name, outcome, makespan, tasks, trace: output.timestamps() })
    }
}
