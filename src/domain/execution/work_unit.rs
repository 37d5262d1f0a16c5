use slotmap::{SlotMap, new_key_type};
use std::collections::{BTreeSet, VecDeque};

use crate::domain::job::standard_job::{FileCopy, FileDeletion, FileLocationMap};
use crate::domain::utils::id::JobName;
use crate::domain::workflow::workflow::TaskKey;
use crate::error::{Error, Result};

new_key_type! {
    pub struct WorkUnitKey;
}

/// The smallest piece of a standard job handed to one executor: an optional
/// sleep, pre-copies, at most one task, post-copies, then deletions.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    job: JobName,
    sleep_time: f64,
    pre_file_copies: Vec<FileCopy>,
    task: Option<TaskKey>,
    file_locations: FileLocationMap,
    post_file_copies: Vec<FileCopy>,
    cleanup_file_deletions: Vec<FileDeletion>,

    pub(crate) num_pending_parents: usize,
    pub(crate) children: BTreeSet<WorkUnitKey>,
}

impl WorkUnit {
    /// # Returns
    /// `Error::InvalidArgument` if the sleep time is negative, a file has an
    /// empty candidate location list, or a copy has identical source and
    /// destination.
    pub fn new(
        job: JobName,
        sleep_time: f64,
        pre_file_copies: Vec<FileCopy>,
        task: Option<TaskKey>,
        file_locations: FileLocationMap,
        post_file_copies: Vec<FileCopy>,
        cleanup_file_deletions: Vec<FileDeletion>,
    ) -> Result<Self> {
        if !(sleep_time.is_finite() && sleep_time >= 0.0) {
            return Err(Error::invalid_argument("invalid work unit sleep time"));
        }
        if let Some((file, _)) = file_locations.iter().find(|(_, locations)| locations.is_empty()) {
            return Err(Error::invalid_argument(format!("invalid file location spec: no location given for file {}", file)));
        }
        for (kind, copies) in [("pre", &pre_file_copies), ("post", &post_file_copies)] {
            if let Some(copy) = copies.iter().find(|c| c.src == c.dst) {
                return Err(Error::invalid_argument(format!(
                    "invalid {} file copy spec: file {} has identical source and destination",
                    kind, copy.file
                )));
            }
        }

        Ok(WorkUnit {
            job,
            sleep_time,
            pre_file_copies,
            task,
            file_locations,
            post_file_copies,
            cleanup_file_deletions,
            num_pending_parents: 0,
            children: BTreeSet::new(),
        })
    }

    /// A unit that only sleeps. Used for job pre/post overheads.
    pub fn sleep(job: JobName, sleep_time: f64) -> Result<Self> {
        Self::new(job, sleep_time, Vec::new(), None, FileLocationMap::new(), Vec::new(), Vec::new())
    }

    pub fn job(&self) -> &JobName {
        &self.job
    }

    pub fn sleep_time(&self) -> f64 {
        self.sleep_time
    }

    pub fn pre_file_copies(&self) -> &[FileCopy] {
        &self.pre_file_copies
    }

    pub fn task(&self) -> Option<TaskKey> {
        self.task
    }

    pub fn file_locations(&self) -> &FileLocationMap {
        &self.file_locations
    }

    pub(crate) fn file_locations_mut(&mut self) -> &mut FileLocationMap {
        &mut self.file_locations
    }

    pub fn post_file_copies(&self) -> &[FileCopy] {
        &self.post_file_copies
    }

    pub fn cleanup_file_deletions(&self) -> &[FileDeletion] {
        &self.cleanup_file_deletions
    }

    pub fn num_pending_parents(&self) -> usize {
        self.num_pending_parents
    }

    pub fn children(&self) -> &BTreeSet<WorkUnitKey> {
        &self.children
    }
}

/// Arena of the work units of one job and the dependencies between them.
#[derive(Debug, Default)]
pub struct WorkUnitGraph {
    units: SlotMap<WorkUnitKey, WorkUnit>,
}

impl WorkUnitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, unit: WorkUnit) -> WorkUnitKey {
        self.units.insert(unit)
    }

    pub fn get(&self, key: WorkUnitKey) -> Option<&WorkUnit> {
        self.units.get(key)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkUnitKey, &WorkUnit)> {
        self.units.iter()
    }

    /// Adds a parent -> child edge. Adding an existing edge does nothing.
    pub fn add_dependency(&mut self, parent: WorkUnitKey, child: WorkUnitKey) -> Result<()> {
        if !self.units.contains_key(parent) || !self.units.contains_key(child) {
            return Err(Error::invalid_argument("unknown work unit in dependency"));
        }
        if parent == child {
            return Err(Error::invalid_argument("a work unit cannot depend on itself"));
        }

        if self.units[parent].children.insert(child) {
            self.units[child].num_pending_parents += 1;
        }
        Ok(())
    }

    /// Counts one parent of `key` as completed.
    ///
    /// # Returns
    /// The number of parents still pending, or `None` for an unknown key.
    pub(crate) fn complete_parent_of(&mut self, key: WorkUnitKey) -> Option<usize> {
        let unit = self.units.get_mut(key)?;
        unit.num_pending_parents = unit.num_pending_parents.saturating_sub(1);
        Some(unit.num_pending_parents)
    }

    pub fn parents_of(&self, key: WorkUnitKey) -> Vec<WorkUnitKey> {
        self.units.iter().filter(|(_, u)| u.children.contains(&key)).map(|(k, _)| k).collect()
    }

    /// Splits the units into those without pending parents and the rest.
    pub fn partition_ready(&self) -> (BTreeSet<WorkUnitKey>, BTreeSet<WorkUnitKey>) {
        let (ready, not_ready): (Vec<_>, Vec<_>) = self.units.iter().partition(|(_, u)| u.num_pending_parents == 0);
        (ready.into_iter().map(|(k, _)| k).collect(), not_ready.into_iter().map(|(k, _)| k).collect())
    }

    /// Kahn's algorithm over the child edges.
    pub fn is_acyclic(&self) -> bool {
        let mut pending: std::collections::HashMap<WorkUnitKey, usize> = self.units.iter().map(|(k, u)| (k, u.num_pending_parents)).collect();
        let mut queue: VecDeque<WorkUnitKey> = pending.iter().filter(|(_, n)| **n == 0).map(|(k, _)| *k).collect();
        let mut visited = 0;

        while let Some(key) = queue.pop_front() {
            visited += 1;
            for child in &self.units[key].children {
                if let Some(n) = pending.get_mut(child) {
                    *n -= 1;
                    if *n == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
        visited == self.units.len()
    }
}
