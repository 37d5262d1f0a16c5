pub mod file;
pub mod parallel_model;
pub mod task;
pub mod workflow;
