use crate::api::scenario_dto::ScenarioDto;
use crate::domain::scenario::Scenario;
use crate::domain::simulator::simulator::SharedSimulator;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Reads a scenario file and builds the platform, workflow and job it
/// describes on top of `simulator`.
pub fn load_scenario(file_path: &str, simulator: SharedSimulator) -> Result<Scenario> {
    let root_dto: ScenarioDto = parse_json_file::<ScenarioDto>(file_path)?;
    log::info!("Scenario file '{}' parsed successfully.", file_path);

    let scenario = Scenario::from_dto(root_dto, simulator)?;
    log::info!("Scenario '{}' constructed with {} tasks.", scenario.name, scenario.workflow.num_tasks());

    Ok(scenario)
}
