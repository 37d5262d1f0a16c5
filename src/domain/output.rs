pub mod simulation_output;
