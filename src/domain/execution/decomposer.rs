use log::debug;
use std::collections::{BTreeSet, HashMap};

use crate::domain::execution::work_unit::{WorkUnit, WorkUnitGraph, WorkUnitKey};
use crate::domain::job::standard_job::{FileLocationMap, StandardJob};
use crate::domain::storage::file_location::FileLocation;
use crate::domain::storage::storage_service::SharedStorageService;
use crate::domain::workflow::workflow::TaskKey;
use crate::error::{Error, Result};

/// Splits a standard job into a DAG of work units.
///
/// * one unit holding every pre-copy, if there are any,
/// * one unit per task, wired along the task dependencies inside the job,
/// * one unit holding every post-copy, if there are any,
/// * one unit holding every cleanup deletion, if there are any,
/// * sleep units for the job pre and post overheads, wrapping everything.
///
/// Scratch entries in the per-task file locations are replaced by the job's
/// scratch directory when `scratch_space` is given. Otherwise they stay and
/// the executor reports the missing scratch space at run time.
pub fn create_work_units(job: &StandardJob, scratch_space: Option<&SharedStorageService>) -> Result<WorkUnitGraph> {
    let mut graph = WorkUnitGraph::new();
    let workflow = job.workflow();

    let pre_copies = if job.pre_file_copies().is_empty() {
        None
    } else {
        let unit = WorkUnit::new(job.name().clone(), 0.0, job.pre_file_copies().to_vec(), None, FileLocationMap::new(), Vec::new(), Vec::new())?;
        Some(graph.insert(unit))
    };

    let mut task_units: HashMap<TaskKey, WorkUnitKey> = HashMap::new();
    for &task in job.tasks() {
        let files: BTreeSet<_> = workflow
            .with_task(task, |t| t.files().cloned().collect())
            .ok_or_else(|| Error::invalid_argument("job references a task that is not part of its workflow"))?;

        let mut file_locations = FileLocationMap::new();
        for (file, locations) in job.file_locations() {
            if !files.contains(file) {
                continue;
            }
            let locations = locations
                .iter()
                .map(|location| match (location, scratch_space) {
                    (FileLocation::Scratch, Some(scratch)) => FileLocation::job_scratch_dir(scratch, job.name()),
                    _ => location.clone(),
                })
                .collect();
            file_locations.insert(file.clone(), locations);
        }

        let unit = WorkUnit::new(job.name().clone(), 0.0, Vec::new(), Some(task), file_locations, Vec::new(), Vec::new())?;
        task_units.insert(task, graph.insert(unit));
    }

    for (&task, &unit) in &task_units {
        for child in workflow.children(task) {
            if let Some(&child_unit) = task_units.get(&child) {
                graph.add_dependency(unit, child_unit)?;
            }
        }
    }

    let post_copies = if job.post_file_copies().is_empty() {
        None
    } else {
        let unit = WorkUnit::new(job.name().clone(), 0.0, Vec::new(), None, FileLocationMap::new(), job.post_file_copies().to_vec(), Vec::new())?;
        Some(graph.insert(unit))
    };

    let cleanup = if job.cleanup_file_deletions().is_empty() {
        None
    } else {
        let unit = WorkUnit::new(
            job.name().clone(),
            0.0,
            Vec::new(),
            None,
            FileLocationMap::new(),
            Vec::new(),
            job.cleanup_file_deletions().to_vec(),
        )?;
        Some(graph.insert(unit))
    };

    // Pre-copies feed the tasks, or whatever comes next when there are none.
    if let Some(pre) = pre_copies {
        if !task_units.is_empty() {
            for &unit in task_units.values() {
                graph.add_dependency(pre, unit)?;
            }
        } else if let Some(post) = post_copies {
            graph.add_dependency(pre, post)?;
        } else if let Some(cleanup) = cleanup {
            graph.add_dependency(pre, cleanup)?;
        }
    }

    for &unit in task_units.values() {
        if let Some(post) = post_copies {
            graph.add_dependency(unit, post)?;
        } else if let Some(cleanup) = cleanup {
            graph.add_dependency(unit, cleanup)?;
        }
    }

    if let (Some(post), Some(cleanup)) = (post_copies, cleanup) {
        graph.add_dependency(post, cleanup)?;
    }

    if job.pre_overhead() > 0.0 {
        let existing: Vec<WorkUnitKey> = graph.iter().map(|(k, _)| k).collect();
        let overhead = graph.insert(WorkUnit::sleep(job.name().clone(), job.pre_overhead())?);
        for unit in existing {
            graph.add_dependency(overhead, unit)?;
        }
    }
    if job.post_overhead() > 0.0 {
        let existing: Vec<WorkUnitKey> = graph.iter().map(|(k, _)| k).collect();
        let overhead = graph.insert(WorkUnit::sleep(job.name().clone(), job.post_overhead())?);
        for unit in existing {
            graph.add_dependency(unit, overhead)?;
        }
    }

    debug!("Job {} decomposed into {} work units", job.name(), graph.len());
    Ok(graph)
}
