//! Task store
//!
//! An ordered, most-recent-first collection of tasks. Every mutation writes the
//! whole collection to a single key-value slot before returning.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Task, TaskId, QUICK_ADD_CONTEXT};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task title must not be empty")]
    InvalidInput,
    #[error("Task '{0}' not found")]
    NotFound(TaskId),
    #[error("Stored tasks could not be read: {0}")]
    Corrupt(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A durable slot holding one serialized value
pub trait Slot: Send {
    /// Returns the stored value, or `None` when the slot was never written
    fn load(&self) -> Result<Option<String>, StoreError>;

    /// Replaces the stored value
    fn save(&mut self, contents: &str) -> Result<(), StoreError>;
}

/// Slot backed by a JSON file on disk
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Slot for FileSlot {
    fn load(&self) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, contents: &str) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory slot. Clones share the same storage, so a test can keep one
/// handle to inspect what the store wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySlot {
    data: Arc<Mutex<Option<String>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        let slot = Self::default();
        *slot.lock_data() = Some(contents.into());
        slot
    }

    /// The currently stored value
    pub fn contents(&self) -> Option<String> {
        self.lock_data().clone()
    }

    /// Makes subsequent writes fail, to simulate an unavailable device
    pub fn set_fail_writes(&self, fail: bool) {
        let mut guard = match self.fail_writes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = fail;
    }

    fn lock_data(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.data.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn writes_fail(&self) -> bool {
        match self.fail_writes.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Slot for MemorySlot {
    fn load(&self) -> Result<Option<String>, StoreError> {
        Ok(self.contents())
    }

    fn save(&mut self, contents: &str) -> Result<(), StoreError> {
        if self.writes_fail() {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "memory slot is read-only",
            )));
        }
        *self.lock_data() = Some(contents.to_string());
        Ok(())
    }
}

/// Issues task ids derived from the wall clock in milliseconds.
///
/// Ids strictly increase within a process even when many tasks are created in
/// the same millisecond, and start past every numeric id already loaded.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    /// A generator that never issues an id at or below those in `tasks`.
    ///
    /// `u64::MAX` leaves no room above it and no clock reading can reach it,
    /// so it does not move the floor.
    pub fn seeded_from(tasks: &[Task]) -> Self {
        let last = tasks
            .iter()
            .filter_map(|t| t.id().numeric())
            .filter(|n| *n < u64::MAX)
            .max()
            .unwrap_or(0);
        Self { last }
    }

    pub fn next_id(&mut self) -> TaskId {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        self.last = now.max(self.last.saturating_add(1));
        TaskId::new(self.last.to_string())
    }
}

/// The ordered task collection and its durable slot
pub struct TaskStore {
    tasks: Vec<Task>,
    slot: Box<dyn Slot>,
    ids: IdGenerator,
    needs_flush: bool,
}

impl TaskStore {
    /// Loads the collection from `slot`, seeding the default task when the slot
    /// is missing or empty.
    ///
    /// A slot holding something other than a task array is reported as
    /// [`StoreError::Corrupt`] and left as is.
    pub fn open(slot: impl Slot + 'static) -> Result<Self, StoreError> {
        let stored = slot.load()?;
        let (tasks, seeded) = match stored.as_deref().map(str::trim) {
            None | Some("") => (vec![Task::seed()], true),
            Some(raw) => {
                let tasks: Vec<Task> =
                    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                (tasks, false)
            }
        };

        info!(count = tasks.len(), seeded, "task store opened");

        let mut store = Self {
            ids: IdGenerator::seeded_from(&tasks),
            tasks,
            slot: Box::new(slot),
            needs_flush: false,
        };
        if seeded {
            store.persist();
        }
        Ok(store)
    }

    /// Creates a task and puts it first in the collection
    pub fn create_task(&mut self, title: &str, context: Option<&str>) -> Result<Task, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::InvalidInput);
        }

        let task = Task::new(
            self.ids.next_id(),
            title.to_string(),
            context.map(str::to_string),
        );
        self.tasks.insert(0, task.clone());
        debug!(task_id = %task.id(), context = ?task.context(), "task created");

        self.persist();
        Ok(task)
    }

    /// Creates a task with the quick-add context
    pub fn quick_add(&mut self, title: &str) -> Result<Task, StoreError> {
        self.create_task(title, Some(QUICK_ADD_CONTEXT))
    }

    /// Flips the completion flag, returning the updated task
    pub fn toggle_complete(&mut self, id: &TaskId) -> Result<Task, StoreError> {
        let task = self.find_mut(id)?;
        task.toggle();
        let task = task.clone();
        debug!(task_id = %id, completed = task.is_completed(), "task toggled");

        self.persist();
        Ok(task)
    }

    /// Removes a task, returning it
    pub fn delete_task(&mut self, id: &TaskId) -> Result<Task, StoreError> {
        let position = self
            .tasks
            .iter()
            .position(|t| t.id() == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let removed = self.tasks.remove(position);
        debug!(task_id = %id, "task deleted");

        self.persist();
        Ok(removed)
    }

    /// Attaches `subtasks` to a task.
    ///
    /// Tasks that are completed or already broken down are returned unchanged
    /// and nothing is written. An empty list is ignored the same way.
    pub fn breakdown(&mut self, id: &TaskId, subtasks: Vec<String>) -> Result<Task, StoreError> {
        let task = self.find_mut(id)?;
        if !task.can_breakdown() || subtasks.is_empty() {
            debug!(task_id = %id, "breakdown skipped");
            return Ok(task.clone());
        }

        task.set_subtasks(subtasks);
        let task = task.clone();
        debug!(task_id = %id, "task broken down");

        self.persist();
        Ok(task)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.iter().filter(|t| !t.is_completed()).count()
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_completed()).count()
    }

    /// True when the last write to the slot failed
    pub fn needs_flush(&self) -> bool {
        self.needs_flush
    }

    fn find_mut(&mut self, id: &TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Writes the full collection. Failures keep the in-memory state and are
    /// retried by the next mutation.
    fn persist(&mut self) {
        let result = serde_json::to_string_pretty(&self.tasks)
            .map_err(StoreError::from)
            .and_then(|json| self.slot.save(&json));

        match result {
            Ok(()) => {
                if self.needs_flush {
                    info!("task store flushed after earlier write failure");
                }
                self.needs_flush = false;
            }
            Err(e) => {
                warn!(error = %e, "failed to persist tasks; keeping in-memory state");
                self.needs_flush = true;
            }
        }
    }
}
