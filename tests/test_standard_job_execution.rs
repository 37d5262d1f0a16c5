mod common;

use async_trait::async_trait;
use std::sync::Arc;

use common::{Bench, assert_close};
use workflow_sim_core::domain::execution::config::StandardJobExecutorConfig;
use workflow_sim_core::domain::execution::failure_cause::FailureCause;
use workflow_sim_core::domain::execution::messages::StandardJobExecutorMessage;
use workflow_sim_core::domain::job::standard_job::{FileCopy, FileDeletion, FileLocationMap, StandardJobSpec, StandardJobState};
use workflow_sim_core::domain::output::simulation_output::TraceEvent;
use workflow_sim_core::domain::simulator::simulator::Simulator;
use workflow_sim_core::domain::storage::file_location::FileLocation;
use workflow_sim_core::domain::storage::storage_service::StorageService;
use workflow_sim_core::domain::utils::id::{HostName, StorageServiceName};
use workflow_sim_core::domain::workflow::file::WorkflowFile;
use workflow_sim_core::domain::workflow::task::{Task, TaskInternalState, TaskState};
use workflow_sim_core::error::Error;

fn failure_cause(message: &StandardJobExecutorMessage) -> &FailureCause {
    match message {
        StandardJobExecutorMessage::Failed { cause, .. } => cause,
        StandardJobExecutorMessage::Done { .. } => panic!("expected the job to fail"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_task_gets_all_cores() {
    let mut bench = Bench::new(&[("host1", 4, 100.0)]);
    let task = bench.workflow.add_task(Task::new("task", 400.0, 2, 4, 0).unwrap()).unwrap();
    let ctx = bench.context(None);

    let message = bench
        .run(StandardJobSpec { tasks: vec![task], ..Default::default() }, &[("host1", 4)], ctx, StandardJobExecutorConfig::default())
        .await;

    assert!(matches!(message, StandardJobExecutorMessage::Done { .. }));
    assert_eq!(message.job().state(), StandardJobState::Completed);
    assert_eq!(message.job().num_completed_tasks(), 1);
    assert_close(message.job().end_date().unwrap(), 1.0);

    let task = bench.workflow.task(task).unwrap();
    assert_eq!(task.state(), TaskState::Completed);
    assert_eq!(task.num_cores_allocated, 4);
    assert_eq!(task.execution_host, Some(HostName::new("host1")));
    assert_close(task.timestamps.start_date.unwrap(), 0.0);
    assert_close(task.timestamps.end_date.unwrap(), 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_task_claimed_by_another_job_is_rejected_on_submit() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let task = bench.workflow.add_task(Task::new("task", 100.0, 1, 1, 0).unwrap()).unwrap();
    let resources = vec![(HostName::new("host1"), 1)];

    let first = bench.manager.create_standard_job(StandardJobSpec { tasks: vec![task], ..Default::default() }).unwrap();
    let second = bench.manager.create_standard_job(StandardJobSpec { tasks: vec![task], ..Default::default() }).unwrap();
    let third = bench.manager.create_standard_job(StandardJobSpec { tasks: vec![task], ..Default::default() }).unwrap();

    let (handle, mut notifications) = bench
        .manager
        .submit_standard_job(first, resources.clone(), bench.context(None), StandardJobExecutorConfig::default())
        .unwrap();

    // The task is pending in the first job.
    let res = bench.manager.submit_standard_job(second, resources.clone(), bench.context(None), StandardJobExecutorConfig::default());
    assert!(matches!(res, Err(Error::InvalidArgument(_))));
    assert_eq!(bench.workflow.task_state(task), Some(TaskState::Pending));

    let message = notifications.recv().await.unwrap();
    handle.join().await.unwrap();
    assert!(matches!(message, StandardJobExecutorMessage::Done { .. }));

    // And completed afterwards.
    let res = bench.manager.submit_standard_job(third, resources, bench.context(None), StandardJobExecutorConfig::default());
    assert!(matches!(res, Err(Error::InvalidArgument(_))));
    assert_eq!(bench.workflow.task_state(task), Some(TaskState::Completed));

    let starts = bench.output.filter(|e| matches!(e, TraceEvent::TaskStart { .. }));
    assert_eq!(starts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tasks_that_do_not_fit_together_run_one_after_the_other() {
    let mut bench = Bench::new(&[("host1", 4, 100.0)]);
    let small = bench.workflow.add_task(Task::new("small", 400.0, 4, 4, 0).unwrap()).unwrap();
    let large = bench.workflow.add_task(Task::new("large", 800.0, 4, 4, 0).unwrap()).unwrap();
    let ctx = bench.context(None);

    let message = bench
        .run(StandardJobSpec { tasks: vec![small, large], ..Default::default() }, &[("host1", 4)], ctx, StandardJobExecutorConfig::default())
        .await;
    assert!(matches!(message, StandardJobExecutorMessage::Done { .. }));

    // The task with the most work is dispatched first.
    let large = bench.workflow.task(large).unwrap();
    let small = bench.workflow.task(small).unwrap();
    assert_close(large.timestamps.start_date.unwrap(), 0.0);
    assert_close(large.timestamps.end_date.unwrap(), 2.0);
    assert_close(small.timestamps.start_date.unwrap(), 2.0);
    assert_close(small.timestamps.end_date.unwrap(), 3.0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_input_fails_the_chain() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let storage = bench.storage("storage", "/data", 1 << 20);
    let missing = bench.workflow.add_file("missing", 100).unwrap();

    let t1 = bench.workflow.add_task(Task::new("t1", 100.0, 1, 1, 0).unwrap()).unwrap();
    let t2 = bench.workflow.add_task(Task::new("t2", 100.0, 1, 1, 0).unwrap()).unwrap();
    let t3 = bench.workflow.add_task(Task::new("t3", 100.0, 1, 1, 0).unwrap()).unwrap();
    bench.workflow.add_control_dependency(t1, t2).unwrap();
    bench.workflow.add_control_dependency(t2, t3).unwrap();
    bench.workflow.add_input_file(t2, &missing).unwrap();

    let mut file_locations = FileLocationMap::new();
    file_locations.insert(missing.clone(), vec![FileLocation::root(storage.clone())]);
    let spec = StandardJobSpec { tasks: vec![t1, t2, t3], file_locations, ..Default::default() };
    let ctx = bench.context(None);

    let message = bench.run(spec, &[("host1", 1)], ctx, StandardJobExecutorConfig::default()).await;

    assert!(failure_cause(&message).is_file_not_found());
    assert_eq!(message.job().state(), StandardJobState::Failed);
    assert_eq!(message.job().num_completed_tasks(), 1);
    assert_close(message.job().end_date().unwrap(), 1.0);

    let t1 = bench.workflow.task(t1).unwrap();
    let t2 = bench.workflow.task(t2).unwrap();
    let t3 = bench.workflow.task(t3).unwrap();
    assert_eq!(t1.state(), TaskState::Completed);
    assert_eq!(t2.state(), TaskState::Ready);
    assert_eq!(t2.internal_state(), TaskInternalState::Ready);
    assert_eq!(t2.failure_count, 1);
    assert_close(t2.timestamps.failure_date.unwrap(), 1.0);
    assert_eq!(t3.state(), TaskState::NotReady);
    assert!(t3.timestamps.start_date.is_none());

    assert_eq!(bench.output.filter(|e| matches!(e, TraceEvent::FileReadFailure { .. })).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scratch_location_without_scratch_space() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let input = bench.workflow.add_file("input", 100).unwrap();
    let task = bench.workflow.add_task(Task::new("task", 100.0, 1, 1, 0).unwrap()).unwrap();
    bench.workflow.add_input_file(task, &input).unwrap();

    let mut file_locations = FileLocationMap::new();
    file_locations.insert(input, vec![FileLocation::scratch()]);
    let ctx = bench.context(None);

    let message = bench
        .run(StandardJobSpec { tasks: vec![task], file_locations, ..Default::default() }, &[("host1", 1)], ctx, StandardJobExecutorConfig::default())
        .await;

    assert!(matches!(failure_cause(&message), FailureCause::NoScratchSpace(_)));
    assert_close(bench.simulator.now(), 0.0);

    // Rejected before any I/O, so the task never started.
    assert!(bench.output.is_empty());
    let task = bench.workflow.task(task).unwrap();
    assert_eq!(task.failure_count, 0);
    assert_eq!(task.state(), TaskState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_of_absent_file_succeeds() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let storage = bench.storage("storage", "/data", 1 << 20);
    let absent = bench.workflow.add_file("absent", 100).unwrap();
    let ctx = bench.context(None);

    let spec = StandardJobSpec {
        cleanup_file_deletions: vec![FileDeletion::new(absent, FileLocation::root(storage.clone()))],
        ..Default::default()
    };
    let message = bench.run(spec, &[("host1", 1)], ctx, StandardJobExecutorConfig::default()).await;

    assert!(matches!(message, StandardJobExecutorMessage::Done { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_copies_through_scratch_space() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let storage = bench.storage("storage", "/data", 1 << 20);
    let scratch = bench.storage("scratch", "/scratch", 1000);

    let input = bench.workflow.add_file("input", 100).unwrap();
    let output = bench.workflow.add_file("output", 100).unwrap();
    let task = bench.workflow.add_task(Task::new("task", 100.0, 1, 1, 0).unwrap()).unwrap();
    bench.workflow.add_input_file(task, &input).unwrap();
    bench.workflow.add_output_file(task, &output).unwrap();
    storage.stage_file(&input, "/data").unwrap();

    let mut file_locations = FileLocationMap::new();
    file_locations.insert(input.clone(), vec![FileLocation::scratch()]);
    file_locations.insert(output.clone(), vec![FileLocation::scratch()]);

    let spec = StandardJobSpec {
        tasks: vec![task],
        file_locations,
        pre_file_copies: vec![FileCopy::new(input.clone(), FileLocation::root(storage.clone()), FileLocation::scratch())],
        post_file_copies: vec![FileCopy::new(output.clone(), FileLocation::scratch(), FileLocation::root(storage.clone()))],
        cleanup_file_deletions: vec![
            FileDeletion::new(input.clone(), FileLocation::scratch()),
            FileDeletion::new(output.clone(), FileLocation::scratch()),
        ],
        ..Default::default()
    };
    let ctx = bench.context(Some(&scratch));

    let message = bench.run(spec, &[("host1", 1)], ctx, StandardJobExecutorConfig::default()).await;
    assert!(matches!(message, StandardJobExecutorMessage::Done { .. }));

    // copy in (1s), read (1s), compute (1s), write (1s), copy out (1s)
    assert_close(message.job().end_date().unwrap(), 5.0);
    let task = bench.workflow.task(task).unwrap();
    assert_close(task.timestamps.start_date.unwrap(), 1.0);
    assert_close(task.timestamps.computation_start_date.unwrap(), 2.0);
    assert_close(task.timestamps.end_date.unwrap(), 4.0);

    assert!(storage.has_file(&output, "/data"));
    assert!(scratch.files_in("/scratch/standard_job_0").is_empty());
    assert_eq!(scratch.free_space(), 1000);

    let copies = bench.output.filter(|e| matches!(e, TraceEvent::FileCopyCompletion { .. }));
    assert_eq!(copies.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_overheads_and_notification_delay() {
    let mut bench = Bench::with_control_bandwidth(&[("host1", 1, 100.0)], Some(1024.0));
    let task = bench.workflow.add_task(Task::new("task", 100.0, 1, 1, 0).unwrap()).unwrap();
    let ctx = bench.context(None);
    let config = StandardJobExecutorConfig {
        workunit_executor_startup_overhead: 0.5,
        thread_startup_overhead: 0.25,
        ..Default::default()
    };
    let spec = StandardJobSpec { tasks: vec![task], pre_overhead: 2.0, post_overhead: 3.0, ..Default::default() };

    let message = bench.run(spec, &[("host1", 1)], ctx, config).await;
    assert!(matches!(message, StandardJobExecutorMessage::Done { .. }));

    // pre overhead unit: 0.5 + 2, task unit: 0.5 + 0.25 + 1, post overhead unit: 0.5 + 3
    let task = bench.workflow.task(task).unwrap();
    assert_close(task.timestamps.start_date.unwrap(), 3.0);
    assert_close(task.timestamps.end_date.unwrap(), 4.25);
    assert_close(message.job().end_date().unwrap(), 7.75);

    // 1024 byte payload over a 1024 byte/s control network.
    assert_close(bench.simulator.now(), 8.75);
}

#[tokio::test(start_paused = true)]
async fn test_failure_kills_the_other_running_units() {
    let mut bench = Bench::new(&[("host1", 2, 100.0)]);
    let tiny = bench.storage("tiny", "/tiny", 50);
    let output = bench.workflow.add_file("output", 100).unwrap();

    let long = bench.workflow.add_task(Task::new("long", 1000.0, 1, 1, 0).unwrap()).unwrap();
    let short = bench.workflow.add_task(Task::new("short", 100.0, 1, 1, 0).unwrap()).unwrap();
    bench.workflow.add_output_file(short, &output).unwrap();

    let mut file_locations = FileLocationMap::new();
    file_locations.insert(output, vec![FileLocation::root(tiny.clone())]);
    let spec = StandardJobSpec { tasks: vec![long, short], file_locations, ..Default::default() };
    let ctx = bench.context(None);

    let message = bench.run(spec, &[("host1", 2)], ctx, StandardJobExecutorConfig::default()).await;

    assert!(matches!(failure_cause(&message), FailureCause::StorageServiceNotEnoughSpace { .. }));
    assert_close(message.job().end_date().unwrap(), 1.0);
    assert_close(bench.simulator.now(), 1.0);

    let long_task = bench.workflow.task(long).unwrap();
    assert_close(long_task.timestamps.termination_date.unwrap(), 1.0);
    assert_eq!(long_task.failure_count, 0);
    assert_eq!(long_task.state(), TaskState::Ready);
    assert_eq!(long_task.internal_state(), TaskInternalState::Ready);

    let short_task = bench.workflow.task(short).unwrap();
    assert_eq!(short_task.failure_count, 1);
    assert_eq!(tiny.free_space(), 50);

    let terminations = bench.output.filter(|e| matches!(e, TraceEvent::TaskTermination { .. }));
    assert_eq!(terminations.len(), 1);
    assert_eq!(terminations[0].event.task(), Some(&long_task.id));
}

#[tokio::test(start_paused = true)]
async fn test_terminate_returns_the_job_without_notification() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let task = bench.workflow.add_task(Task::new("task", 1000.0, 1, 1, 0).unwrap()).unwrap();
    let ctx = bench.context(None);

    let (handle, mut notifications) =
        bench.submit(StandardJobSpec { tasks: vec![task], ..Default::default() }, &[("host1", 1)], ctx, StandardJobExecutorConfig::default());
    bench.simulator.sleep(2.0).await;

    let job = handle.terminate().await.unwrap();
    assert_eq!(job.state(), StandardJobState::Terminated);
    assert_close(job.end_date().unwrap(), 2.0);
    assert!(notifications.recv().await.is_none());

    let task = bench.workflow.task(task).unwrap();
    assert_close(task.timestamps.termination_date.unwrap(), 2.0);
    assert_eq!(task.state(), TaskState::Ready);
    assert!(task.timestamps.end_date.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_host_going_down_kills_compute_threads() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let task = bench.workflow.add_task(Task::new("task", 1000.0, 1, 1, 0).unwrap()).unwrap();
    let ctx = bench.context(None);

    let (handle, mut notifications) =
        bench.submit(StandardJobSpec { tasks: vec![task], ..Default::default() }, &[("host1", 1)], ctx, StandardJobExecutorConfig::default());
    bench.simulator.sleep(2.0).await;
    bench.platform.set_host_down(&HostName::new("host1"));

    let message = notifications.recv().await.unwrap();
    handle.join().await.unwrap();

    assert_eq!(failure_cause(&message), &FailureCause::ComputeThreadHasDied(HostName::new("host1")));
    let task = bench.workflow.task(task).unwrap();
    assert_eq!(task.failure_count, 1);
    assert_eq!(task.state(), TaskState::Ready);
}

/// Storage whose reads bring the calling executor down.
#[derive(Debug)]
struct PanickingStorage {
    name: StorageServiceName,
}

#[async_trait]
impl StorageService for PanickingStorage {
    fn name(&self) -> &StorageServiceName {
        &self.name
    }

    fn mount_point(&self) -> &str {
        "/"
    }

    fn bandwidth(&self) -> f64 {
        1.0
    }

    async fn lookup_file(&self, _file: &WorkflowFile, _path: &str) -> Result<bool, FailureCause> {
        Ok(true)
    }

    async fn read_file(&self, file: &WorkflowFile, _path: &str) -> Result<(), FailureCause> {
        panic!("disk controller exploded while reading {}", file);
    }

    async fn write_file(&self, _file: &WorkflowFile, _path: &str) -> Result<(), FailureCause> {
        Ok(())
    }

    async fn delete_file(&self, _file: &WorkflowFile, _path: &str) -> Result<(), FailureCause> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_crashed_executor_fails_the_job() {
    let mut bench = Bench::new(&[("host1", 1, 100.0)]);
    let broken = Arc::new(PanickingStorage { name: StorageServiceName::new("broken") });
    let input = bench.workflow.add_file("input", 100).unwrap();
    let task = bench.workflow.add_task(Task::new("task", 100.0, 1, 1, 0).unwrap()).unwrap();
    bench.workflow.add_input_file(task, &input).unwrap();

    let mut file_locations = FileLocationMap::new();
    file_locations.insert(input, vec![FileLocation::root(broken)]);
    let ctx = bench.context(None);

    let message = bench
        .run(StandardJobSpec { tasks: vec![task], file_locations, ..Default::default() }, &[("host1", 1)], ctx, StandardJobExecutorConfig::default())
        .await;

    assert!(matches!(failure_cause(&message), FailureCause::FatalFailure(_)));
    let task = bench.workflow.task(task).unwrap();
    assert_eq!(task.failure_count, 1);
    assert_eq!(task.state(), TaskState::Ready);
    assert_eq!(task.internal_state(), TaskInternalState::Ready);
}
