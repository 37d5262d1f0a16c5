use slotmap::{SlotMap, new_key_type};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::utils::id::{FileId, TaskId};
use crate::domain::workflow::file::WorkflowFile;
use crate::domain::workflow::task::{Task, TaskInternalState, TaskState};
use crate::error::{Error, Result};

new_key_type! {
    pub struct TaskKey;
}

#[derive(Debug)]
struct WorkflowInner {
    name: String,

    /// Task storage.
    tasks: SlotMap<TaskKey, Task>,

    /// Lookup of the internal key using the user-facing task id.
    id_index: HashMap<TaskId, TaskKey>,

    files: BTreeMap<FileId, WorkflowFile>,
    producers: HashMap<FileId, TaskKey>,
    consumers: HashMap<FileId, Vec<TaskKey>>,
}

/// A DAG of tasks plus the files they exchange.
///
/// The workflow is shared by handle between the submitter, the job
/// coordinator and the work unit executors. Every method takes the lock for
/// the duration of one call only.
#[derive(Debug, Clone)]
pub struct Workflow {
    inner: Arc<RwLock<WorkflowInner>>,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        let inner = WorkflowInner {
            name: name.into(),
            tasks: SlotMap::with_key(),
            id_index: HashMap::new(),
            files: BTreeMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        };
        Self { inner: Arc::new(RwLock::new(inner)) }
    }

    fn read(&self) -> RwLockReadGuard<'_, WorkflowInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, WorkflowInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> String {
        self.read().name.clone()
    }

    pub fn add_file(&self, id: impl Into<String>, size: u64) -> Result<WorkflowFile> {
        let file = WorkflowFile::new(id, size);
        let mut guard = self.write();

        if guard.files.contains_key(&file.id) {
            return Err(Error::invalid_argument(format!("file {} already exists in workflow", file.id)));
        }
        guard.files.insert(file.id.clone(), file.clone());

        Ok(file)
    }

    pub fn file(&self, id: &FileId) -> Option<WorkflowFile> {
        self.read().files.get(id).cloned()
    }

    pub fn files(&self) -> Vec<WorkflowFile> {
        self.read().files.values().cloned().collect()
    }

    /// Adds a task to the workflow.
    ///
    /// # Returns
    /// The internal key of the task, or `Error::InvalidArgument` if a task
    /// with the same id already exists.
    pub fn add_task(&self, task: Task) -> Result<TaskKey> {
        let mut guard = self.write();

        if guard.id_index.contains_key(&task.id) {
            return Err(Error::invalid_argument(format!("task {} already exists in workflow", task.id)));
        }
        let id = task.id.clone();
        let key = guard.tasks.insert(task);
        guard.id_index.insert(id, key);

        Ok(key)
    }

    pub fn task_key(&self, id: &TaskId) -> Option<TaskKey> {
        self.read().id_index.get(id).copied()
    }

    /// Snapshot of a task.
    pub fn task(&self, key: TaskKey) -> Option<Task> {
        self.read().tasks.get(key).cloned()
    }

    pub fn task_keys(&self) -> Vec<TaskKey> {
        self.read().tasks.keys().collect()
    }

    pub fn num_tasks(&self) -> usize {
        self.read().tasks.len()
    }

    pub fn with_task<R>(&self, key: TaskKey, f: impl FnOnce(&Task) -> R) -> Option<R> {
        self.read().tasks.get(key).map(f)
    }

    pub fn update_task<R>(&self, key: TaskKey, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        self.write().tasks.get_mut(key).map(f)
    }

    pub fn task_state(&self, key: TaskKey) -> Option<TaskState> {
        self.with_task(key, |t| t.state)
    }

    pub fn internal_state(&self, key: TaskKey) -> Option<TaskInternalState> {
        self.with_task(key, |t| t.internal_state)
    }

    pub fn parents(&self, key: TaskKey) -> Vec<TaskKey> {
        self.with_task(key, |t| t.parents.clone()).unwrap_or_default()
    }

    pub fn children(&self, key: TaskKey) -> Vec<TaskKey> {
        self.with_task(key, |t| t.children.clone()).unwrap_or_default()
    }

    /// Declares that `task` reads `file`. If another task produces the file,
    /// a dependency from the producer is added.
    pub fn add_input_file(&self, task: TaskKey, file: &WorkflowFile) -> Result<()> {
        let mut guard = self.write();
        guard.check_file(file)?;

        let producer = guard.producers.get(&file.id).copied();
        if producer == Some(task) {
            return Err(Error::invalid_argument(format!("file {} cannot be both input and output of the same task", file.id)));
        }

        let t = guard.task_mut(task)?;
        if !t.input_files.contains(file) {
            t.input_files.push(file.clone());
        }
        let consumers = guard.consumers.entry(file.id.clone()).or_default();
        if !consumers.contains(&task) {
            consumers.push(task);
        }

        if let Some(producer) = producer {
            guard.add_dependency(producer, task)?;
        }
        Ok(())
    }

    /// Declares that `task` writes `file`. A file has at most one producer.
    pub fn add_output_file(&self, task: TaskKey, file: &WorkflowFile) -> Result<()> {
        let mut guard = self.write();
        guard.check_file(file)?;

        if let Some(existing) = guard.producers.get(&file.id) {
            if *existing != task {
                return Err(Error::invalid_argument(format!("file {} already has a producer task", file.id)));
            }
            return Ok(());
        }
        let consumers = guard.consumers.get(&file.id).cloned().unwrap_or_default();
        if consumers.contains(&task) {
            return Err(Error::invalid_argument(format!("file {} cannot be both input and output of the same task", file.id)));
        }

        guard.task_mut(task)?.output_files.push(file.clone());
        guard.producers.insert(file.id.clone(), task);

        for consumer in consumers {
            guard.add_dependency(task, consumer)?;
        }
        Ok(())
    }

    /// Adds a parent -> child edge. Adding an existing edge does nothing.
    ///
    /// # Returns
    /// `Error::InvalidArgument` for unknown tasks, self-edges, or edges that
    /// would close a cycle.
    pub fn add_control_dependency(&self, parent: TaskKey, child: TaskKey) -> Result<()> {
        self.write().add_dependency(parent, child)
    }

    /// Whether every parent of `key` has completed (internally).
    pub fn all_parents_completed(&self, key: TaskKey) -> bool {
        let guard = self.read();
        guard.all_parents_completed(key)
    }

    /// Marks the children of a just-completed task as internally ready when
    /// all of their parents have completed.
    pub(crate) fn promote_ready_children(&self, key: TaskKey) {
        let mut guard = self.write();
        let children = match guard.tasks.get(key) {
            Some(t) => t.children.clone(),
            None => return,
        };

        for child in children {
            if guard.all_parents_completed(child) {
                if let Some(c) = guard.tasks.get_mut(child) {
                    if c.internal_state == TaskInternalState::NotReady {
                        c.internal_state = TaskInternalState::Ready;
                    }
                }
            }
        }
    }

    /// Makes the tasks of a successful job visibly completed, and their
    /// children outside the job visibly ready when possible.
    pub(crate) fn settle_completed_tasks(&self, keys: &[TaskKey]) {
        let mut guard = self.write();

        for &key in keys {
            if let Some(t) = guard.tasks.get_mut(key) {
                t.state = TaskState::Completed;
            }
        }
        for &key in keys {
            let children = guard.tasks.get(key).map(|t| t.children.clone()).unwrap_or_default();
            for child in children {
                if guard.all_parents_completed(child) {
                    if let Some(c) = guard.tasks.get_mut(child) {
                        if c.state == TaskState::NotReady {
                            c.state = TaskState::Ready;
                        }
                    }
                }
            }
        }
    }

    /// Reconciles the tasks of a job that failed or was terminated: tasks
    /// that completed stay completed, every other task goes back to `Ready`
    /// or `NotReady` depending on its parents.
    pub(crate) fn settle_unfinished_tasks(&self, keys: &[TaskKey]) {
        let mut guard = self.write();

        for &key in keys {
            let completed = guard.tasks.get(key).map(|t| t.internal_state == TaskInternalState::Completed);
            match completed {
                Some(true) => {
                    if let Some(t) = guard.tasks.get_mut(key) {
                        t.state = TaskState::Completed;
                    }
                }
                Some(false) => {
                    let ready = guard.all_parents_completed(key);
                    if let Some(t) = guard.tasks.get_mut(key) {
                        if ready {
                            t.state = TaskState::Ready;
                            t.internal_state = TaskInternalState::Ready;
                        } else {
                            t.state = TaskState::NotReady;
                            t.internal_state = TaskInternalState::NotReady;
                        }
                    }
                }
                None => {}
            }
        }
    }
}

impl WorkflowInner {
    fn check_file(&self, file: &WorkflowFile) -> Result<()> {
        if !self.files.contains_key(&file.id) {
            return Err(Error::invalid_argument(format!("file {} is not part of workflow {}", file.id, self.name)));
        }
        Ok(())
    }

    fn task_mut(&mut self, key: TaskKey) -> Result<&mut Task> {
        self.tasks.get_mut(key).ok_or_else(|| Error::invalid_argument("unknown task key"))
    }

    fn all_parents_completed(&self, key: TaskKey) -> bool {
        match self.tasks.get(key) {
            Some(t) => t
                .parents
                .iter()
                .all(|p| self.tasks.get(*p).is_some_and(|p| p.internal_state == TaskInternalState::Completed)),
            None => false,
        }
    }

    /// Depth-first search along child edges.
    fn reaches(&self, from: TaskKey, to: TaskKey) -> bool {
        let mut stack = vec![from];
        let mut seen = Vec::new();

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(t) = self.tasks.get(current) {
                stack.extend(t.children.iter().copied());
            }
        }
        false
    }

    fn add_dependency(&mut self, parent: TaskKey, child: TaskKey) -> Result<()> {
        if !self.tasks.contains_key(parent) || !self.tasks.contains_key(child) {
            return Err(Error::invalid_argument("unknown task key in dependency"));
        }
        if parent == child {
            return Err(Error::invalid_argument("a task cannot depend on itself"));
        }
        if self.tasks[parent].children.contains(&child) {
            return Ok(());
        }
        if self.reaches(child, parent) {
            return Err(Error::invalid_argument(format!(
                "dependency {} -> {} would create a cycle",
                self.tasks[parent].id, self.tasks[child].id
            )));
        }

        let parent_completed = self.tasks[parent].internal_state == TaskInternalState::Completed;
        self.tasks[parent].children.push(child);

        let c = &mut self.tasks[child];
        c.parents.push(parent);
        if !parent_completed && c.state == TaskState::Ready {
            c.state = TaskState::NotReady;
            c.internal_state = TaskInternalState::NotReady;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (Workflow, TaskKey, TaskKey, TaskKey) {
        let wf = Workflow::new("chain");
        let t1 = wf.add_task(Task::new("t1", 100.0, 1, 1, 0).unwrap()).unwrap();
        let t2 = wf.add_task(Task::new("t2", 100.0, 1, 1, 0).unwrap()).unwrap();
        let t3 = wf.add_task(Task::new("t3", 100.0, 1, 1, 0).unwrap()).unwrap();
        wf.add_control_dependency(t1, t2).unwrap();
        wf.add_control_dependency(t2, t3).unwrap();
        (wf, t1, t2, t3)
    }

    #[test]
    fn test_dependencies_update_states() {
        let (wf, t1, t2, t3) = chain();
        assert_eq!(wf.task_state(t1), Some(TaskState::Ready));
        assert_eq!(wf.task_state(t2), Some(TaskState::NotReady));
        assert_eq!(wf.task_state(t3), Some(TaskState::NotReady));
        assert_eq!(wf.parents(t2), vec![t1]);
        assert_eq!(wf.children(t2), vec![t3]);
    }

    #[test]
    fn test_cycle_and_self_edges_rejected() {
        let (wf, t1, _, t3) = chain();
        assert!(matches!(wf.add_control_dependency(t3, t1), Err(Error::InvalidArgument(_))));
        assert!(matches!(wf.add_control_dependency(t1, t1), Err(Error::InvalidArgument(_))));
        // Existing edges are accepted silently.
        let t2 = wf.task_key(&TaskId::new("t2")).unwrap();
        assert!(wf.add_control_dependency(t1, t2).is_ok());
        assert_eq!(wf.children(t1).len(), 1);
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let wf = Workflow::new("dup");
        wf.add_task(Task::new("t1", 1.0, 1, 1, 0).unwrap()).unwrap();
        assert!(wf.add_task(Task::new("t1", 1.0, 1, 1, 0).unwrap()).is_err());
    }

    #[test]
    fn test_data_dependency_from_files() {
        let wf = Workflow::new("data");
        let f = wf.add_file("intermediate", 10).unwrap();
        let consumer = wf.add_task(Task::new("consumer", 1.0, 1, 1, 0).unwrap()).unwrap();
        let producer = wf.add_task(Task::new("producer", 1.0, 1, 1, 0).unwrap()).unwrap();

        wf.add_input_file(consumer, &f).unwrap();
        wf.add_output_file(producer, &f).unwrap();

        assert_eq!(wf.parents(consumer), vec![producer]);
        assert_eq!(wf.task_state(consumer), Some(TaskState::NotReady));

        let other = wf.add_task(Task::new("other", 1.0, 1, 1, 0).unwrap()).unwrap();
        assert!(wf.add_output_file(other, &f).is_err());
    }

    #[test]
    fn test_repeated_input_recorded_once() {
        let wf = Workflow::new("data");
        let f = wf.add_file("shared", 10).unwrap();
        let reader = wf.add_task(Task::new("reader", 1.0, 1, 1, 0).unwrap()).unwrap();

        wf.add_input_file(reader, &f).unwrap();
        wf.add_input_file(reader, &f).unwrap();

        let guard = wf.read();
        assert_eq!(guard.consumers[&f.id], vec![reader]);
        assert_eq!(guard.tasks[reader].input_files.len(), 1);
        drop(guard);

        // The late producer gets a single edge to the reader.
        let writer = wf.add_task(Task::new("writer", 1.0, 1, 1, 0).unwrap()).unwrap();
        wf.add_output_file(writer, &f).unwrap();
        assert_eq!(wf.parents(reader), vec![writer]);
        assert_eq!(wf.children(writer), vec![reader]);
    }

    #[test]
    fn test_unknown_file_rejected() {
        let wf = Workflow::new("files");
        let t = wf.add_task(Task::new("t", 1.0, 1, 1, 0).unwrap()).unwrap();
        assert!(wf.add_input_file(t, &WorkflowFile::new("ghost", 1)).is_err());
    }

    #[test]
    fn test_promote_and_settle() {
        let (wf, t1, t2, t3) = chain();
        wf.update_task(t1, |t| t.internal_state = TaskInternalState::Completed);
        wf.promote_ready_children(t1);
        assert_eq!(wf.internal_state(t2), Some(TaskInternalState::Ready));
        assert_eq!(wf.internal_state(t3), Some(TaskInternalState::NotReady));

        wf.settle_unfinished_tasks(&[t1, t2, t3]);
        assert_eq!(wf.task_state(t1), Some(TaskState::Completed));
        assert_eq!(wf.task_state(t2), Some(TaskState::Ready));
        assert_eq!(wf.task_state(t3), Some(TaskState::NotReady));

        wf.update_task(t2, |t| t.internal_state = TaskInternalState::Completed);
        wf.settle_completed_tasks(&[t2]);
        assert_eq!(wf.task_state(t2), Some(TaskState::Completed));
        assert_eq!(wf.task_state(t3), Some(TaskState::Ready));
    }
}
