pub mod compute;
pub mod execution;
pub mod job;
pub mod output;
pub mod scenario;
pub mod simulator;
pub mod storage;
pub mod utils;
pub mod workflow;
