use std::fs;

use workflow_sim_core::api::scenario_dto::{LocationDto, ScenarioDto};
use workflow_sim_core::domain::scenario::{JobReport, Scenario};
use workflow_sim_core::domain::simulator::simulator::TokioSimulator;
use workflow_sim_core::domain::utils::id::StorageServiceName;
use workflow_sim_core::domain::workflow::task::TaskState;
use workflow_sim_core::error::Error;
use workflow_sim_core::load_scenario;
use workflow_sim_core::loader::parser::parse_json_str;

const SCENARIO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/scenario_two_stage.json");

fn scenario_dto() -> ScenarioDto {
    let data = fs::read_to_string(SCENARIO).unwrap();
    parse_json_str(&data).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_load_scenario() {
    let scenario = load_scenario(SCENARIO, TokioSimulator::shared()).unwrap();

    assert_eq!(scenario.name, "two-stage-analysis");
    assert_eq!(scenario.workflow.num_tasks(), 2);
    assert_eq!(scenario.workflow.files().len(), 3);
    assert_eq!(scenario.storage_services.len(), 2);
    assert!(scenario.scratch_space.is_some());
    assert_eq!(scenario.job_spec.tasks.len(), 2);
    assert_eq!(scenario.job_spec.pre_file_copies.len(), 1);
    assert_eq!(scenario.job_spec.cleanup_file_deletions.len(), 3);
    assert_eq!(scenario.compute_resources.len(), 1);
    assert_eq!(scenario.config.thread_startup_overhead, 0.0);

    let input = scenario.workflow.files().into_iter().find(|f| f.id.as_str() == "input").unwrap();
    let storage = &scenario.storage_services[&StorageServiceName::new("storage")];
    assert!(storage.has_file(&input, "/data"));
}

#[tokio::test(start_paused = true)]
async fn test_run_scenario() {
    let scenario = load_scenario(SCENARIO, TokioSimulator::shared()).unwrap();
    let storage = scenario.storage_services[&StorageServiceName::new("storage")].clone();
    let result = scenario.workflow.files().into_iter().find(|f| f.id.as_str() == "result").unwrap();

    let report = scenario.run().await.unwrap();

    assert_eq!(report.outcome, JobReport::Completed);
    assert_eq!(report.job, "standard_job_0");
    // copy in, then read, compute and write for each stage, then copy out
    assert!((report.makespan - 8.0).abs() < 1e-3, "makespan was {}", report.makespan);

    assert_eq!(report.tasks.len(), 2);
    let prepare = &report.tasks[0];
    let analyze = &report.tasks[1];
    assert_eq!(prepare.id.as_str(), "prepare");
    assert_eq!(prepare.num_cores, 2);
    assert_eq!(analyze.num_cores, 4);
    assert!(report.tasks.iter().all(|t| t.state == TaskState::Completed));
    assert!(prepare.end_date.unwrap() <= analyze.start_date.unwrap());

    assert!(storage.has_file(&result, "/data/results"));
    assert!(!report.trace.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_references_are_rejected() {
    let mut dto = scenario_dto();
    dto.workflow.tasks[0].inputs.push("ghost".to_string());
    let res = Scenario::from_dto(dto, TokioSimulator::shared());
    assert!(matches!(res, Err(Error::ModelConstructionError(_))));

    let mut dto = scenario_dto();
    dto.scratch_space = Some("nowhere".to_string());
    let res = Scenario::from_dto(dto, TokioSimulator::shared());
    assert!(matches!(res, Err(Error::ModelConstructionError(_))));

    let mut dto = scenario_dto();
    dto.job.pre_file_copies[0].src = LocationDto::Storage { service: "nowhere".to_string(), path: None };
    let res = Scenario::from_dto(dto, TokioSimulator::shared());
    assert!(matches!(res, Err(Error::ModelConstructionError(_))));

    let mut dto = scenario_dto();
    dto.job.tasks.push("ghost".to_string());
    let res = Scenario::from_dto(dto, TokioSimulator::shared());
    assert!(matches!(res, Err(Error::ModelConstructionError(_))));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_configuration_is_rejected() {
    let mut dto = scenario_dto();
    dto.properties.insert("NOT_A_PROPERTY".to_string(), "1".to_string());
    assert!(matches!(Scenario::from_dto(dto, TokioSimulator::shared()), Err(Error::InvalidArgument(_))));

    let mut dto = scenario_dto();
    dto.workflow.tasks[1].min_cores = 8;
    assert!(matches!(Scenario::from_dto(dto, TokioSimulator::shared()), Err(Error::InvalidArgument(_))));

    assert!(matches!(load_scenario("/definitely/not/here.json", TokioSimulator::shared()), Err(Error::IoError(_))));
}

#[tokio::test(start_paused = true)]
async fn test_scenario_that_cannot_fit_fails_on_submission() {
    let mut dto = scenario_dto();
    dto.compute_resources[0].host = "host2".to_string();
    dto.compute_resources[0].cores = 2;
    let scenario = Scenario::from_dto(dto, TokioSimulator::shared()).unwrap();

    // analyze needs 4 cores, host2 only has 2.
    assert!(matches!(scenario.run().await, Err(Error::InvalidArgument(_))));
}
