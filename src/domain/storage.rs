pub mod file_location;
pub mod simple_storage_service;
pub mod storage_service;
