pub mod job_manager;
pub mod standard_job;
