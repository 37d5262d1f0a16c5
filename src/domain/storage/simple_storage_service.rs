use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::domain::execution::failure_cause::FailureCause;
use crate::domain::simulator::simulator::SharedSimulator;
use crate::domain::storage::storage_service::StorageService;
use crate::domain::utils::id::{FileId, StorageServiceName};
use crate::domain::workflow::file::WorkflowFile;
use crate::error::{Error, Result};

#[derive(Debug)]
struct StorageState {
    /// Directory -> files stored in it.
    directories: BTreeMap<String, BTreeSet<WorkflowFile>>,
    /// Bytes held by stored files plus bytes reserved by writes in flight.
    used: u64,
    up: bool,
}

impl StorageState {
    fn contains(&self, file: &WorkflowFile, path: &str) -> bool {
        self.directories.get(path).is_some_and(|files| files.contains(file))
    }
}

/// A single disk with a fixed capacity and bandwidth.
///
/// Reads and writes take `size / bandwidth` simulated seconds. A write
/// reserves its space when it starts and releases it again if it is
/// cancelled before completing.
#[derive(Debug)]
pub struct SimpleStorageService {
    name: StorageServiceName,
    mount_point: String,
    capacity: u64,
    bandwidth: f64,
    simulator: SharedSimulator,
    state: Mutex<StorageState>,
}

impl SimpleStorageService {
    pub fn new(name: impl Into<String>, mount_point: impl Into<String>, capacity: u64, bandwidth: f64, simulator: SharedSimulator) -> Result<Self> {
        let name = StorageServiceName::new(name);
        let mount_point = mount_point.into();

        if !mount_point.starts_with('/') {
            return Err(Error::invalid_argument(format!("storage service {}: mount point '{}' must be absolute", name, mount_point)));
        }
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(Error::invalid_argument(format!("storage service {}: bandwidth must be positive", name)));
        }

        Ok(SimpleStorageService {
            name,
            mount_point,
            capacity,
            bandwidth,
            simulator,
            state: Mutex::new(StorageState { directories: BTreeMap::new(), used: 0, up: true }),
        })
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn lock(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Places `file` in `path` without simulating any transfer. Used to set
    /// up the initial state of a simulation.
    pub fn stage_file(&self, file: &WorkflowFile, path: &str) -> Result<()> {
        let mut state = self.lock();
        if state.contains(file, path) {
            return Ok(());
        }
        if state.used + file.size > self.capacity {
            return Err(Error::invalid_argument(format!("storage service {} cannot hold file {}", self.name, file)));
        }
        state.used += file.size;
        state.directories.entry(path.to_string()).or_default().insert(file.clone());
        Ok(())
    }

    pub fn has_file(&self, file: &WorkflowFile, path: &str) -> bool {
        self.lock().contains(file, path)
    }

    pub fn files_in(&self, path: &str) -> Vec<FileId> {
        self.lock().directories.get(path).map(|files| files.iter().map(|f| f.id.clone()).collect()).unwrap_or_default()
    }

    pub fn free_space(&self) -> u64 {
        self.capacity.saturating_sub(self.lock().used)
    }

    /// Takes the service off the network. Every later operation fails with
    /// a network error until `set_up` is called.
    pub fn set_down(&self) {
        self.lock().up = false;
    }

    pub fn set_up(&self) {
        self.lock().up = true;
    }

    fn check_up(&self) -> std::result::Result<(), FailureCause> {
        if self.lock().up { Ok(()) } else { Err(FailureCause::NetworkError(self.name.to_string())) }
    }

    fn transfer_time(&self, file: &WorkflowFile) -> f64 {
        file.size as f64 / self.bandwidth
    }

    fn describe(&self, path: &str) -> String {
        format!("{}:{}", self.name, path)
    }
}

/// Space held by a write in flight. Dropping it without `commit` hands the
/// bytes back.
struct SpaceReservation<'a> {
    service: &'a SimpleStorageService,
    bytes: u64,
}

impl SpaceReservation<'_> {
    fn commit(mut self, file: &WorkflowFile, path: &str) {
        let mut state = self.service.lock();
        if state.contains(file, path) {
            // Overwrite: the stored copy already accounts for the space.
            state.used -= self.bytes;
        } else {
            state.used += file.size - self.bytes;
            state.directories.entry(path.to_string()).or_default().insert(file.clone());
        }
        self.bytes = 0;
    }
}

impl Drop for SpaceReservation<'_> {
    fn drop(&mut self) {
        let mut state = self.service.lock();
        state.used = state.used.saturating_sub(self.bytes);
    }
}

#[async_trait]
impl StorageService for SimpleStorageService {
    fn name(&self) -> &StorageServiceName {
        &self.name
    }

    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    async fn lookup_file(&self, file: &WorkflowFile, path: &str) -> std::result::Result<bool, FailureCause> {
        self.check_up()?;
        Ok(self.lock().contains(file, path))
    }

    async fn read_file(&self, file: &WorkflowFile, path: &str) -> std::result::Result<(), FailureCause> {
        self.check_up()?;
        if !self.lock().contains(file, path) {
            return Err(FailureCause::FileNotFound { file: file.id.clone(), location: self.describe(path) });
        }

        debug!("Reading file {} from {}", file, self.describe(path));
        self.simulator.sleep(self.transfer_time(file)).await;
        self.check_up()
    }

    async fn write_file(&self, file: &WorkflowFile, path: &str) -> std::result::Result<(), FailureCause> {
        self.check_up()?;
        let reservation = {
            let mut state = self.lock();
            let bytes = if state.contains(file, path) { 0 } else { file.size };
            if state.used + bytes > self.capacity {
                return Err(FailureCause::StorageServiceNotEnoughSpace { file: file.id.clone(), service: self.name.clone() });
            }
            state.used += bytes;
            SpaceReservation { service: self, bytes }
        };

        debug!("Writing file {} to {}", file, self.describe(path));
        self.simulator.sleep(self.transfer_time(file)).await;
        self.check_up()?;

        reservation.commit(file, path);
        Ok(())
    }

    async fn delete_file(&self, file: &WorkflowFile, path: &str) -> std::result::Result<(), FailureCause> {
        self.check_up()?;
        let mut state = self.lock();

        let removed = state.directories.get_mut(path).is_some_and(|files| files.remove(file));
        if !removed {
            return Err(FailureCause::FileNotFound { file: file.id.clone(), location: self.describe(path) });
        }
        state.used = state.used.saturating_sub(file.size);
        Ok(())
    }
}
