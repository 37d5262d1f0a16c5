pub mod compute_substrate;
pub mod simulated_platform;
