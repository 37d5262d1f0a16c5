pub mod config;
pub mod context;
pub mod decomposer;
pub mod failure_cause;
pub mod messages;
pub mod standard_job_executor;
pub mod work_unit;
pub mod work_unit_executor;
