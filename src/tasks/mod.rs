//! Task manager
//!
//! Keeps the task table in memory, arms a one-shot timer per scheduled task,
//! and runs a once-per-second housekeeping poll that fires anything overdue
//! without a live timer (e.g. tasks that came due while the assistant was
//! not running). Every change is persisted through [`StateManager`].

mod types;

pub use types::{Metadata, Task, TaskType};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::task::JoinHandle;

use crate::state::StateManager;
use crate::{Error, Result};

/// Interval of the overdue-task poll
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Called with a copy of each task as it fires
pub type TaskCallback = Arc<dyn Fn(&Task) + Send + Sync>;

/// One-shot timer; the generation tells a live timer from a superseded one
struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    state: Arc<StateManager>,
    tasks: Mutex<BTreeMap<String, Task>>,
    timers: Mutex<HashMap<String, ArmedTimer>>,
    next_generation: AtomicU64,
    callbacks: Mutex<Vec<TaskCallback>>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Schedules, fires and persists tasks
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &lock(&self.inner.tasks).len())
            .field("timers", &lock(&self.inner.timers).len())
            .finish_non_exhaustive()
    }
}

impl TaskManager {
    /// Load the task table from state
    ///
    /// Nothing is armed until [`TaskManager::start_scheduler`] runs.
    #[must_use]
    pub fn new(state: Arc<StateManager>) -> Self {
        Self::with_poll_interval(state, POLL_INTERVAL)
    }

    /// Load the task table with a custom poll interval
    #[must_use]
    pub fn with_poll_interval(state: Arc<StateManager>, poll_interval: Duration) -> Self {
        let tasks = state.tasks();
        tracing::debug!(count = tasks.len(), "tasks loaded");

        Self {
            inner: Arc::new(Inner {
                state,
                tasks: Mutex::new(tasks),
                timers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
                scheduler: Mutex::new(None),
                poll_interval,
            }),
        }
    }

    /// Register a completion callback
    pub fn add_callback<F>(&self, callback: F)
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        lock(&self.inner.callbacks).push(Arc::new(callback));
    }

    /// Arm timers for pending future tasks and start the overdue poll
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_scheduler(&self) {
        let mut scheduler = lock(&self.inner.scheduler);
        if scheduler.is_some() {
            return;
        }

        let now = Local::now();
        let pending: Vec<Task> = lock(&self.inner.tasks)
            .values()
            .filter(|t| !t.completed && t.scheduled_time.is_some_and(|at| at > now))
            .cloned()
            .collect();
        for task in &pending {
            self.schedule(task);
        }

        let manager = self.clone();
        let interval = self.inner.poll_interval;
        *scheduler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.run_due(Local::now());
            }
        }));

        tracing::info!(rescheduled = pending.len(), "task scheduler started");
    }

    /// Stop the overdue poll and cancel all armed timers
    pub fn stop_scheduler(&self) {
        if let Some(handle) = lock(&self.inner.scheduler).take() {
            handle.abort();
        }
        for (_, timer) in lock(&self.inner.timers).drain() {
            timer.handle.abort();
        }
        tracing::debug!("task scheduler stopped");
    }

    /// Create a task, persist it, and arm its timer if it is scheduled
    ///
    /// # Errors
    ///
    /// Returns error if the task table cannot be saved; the task is then
    /// discarded and never fires
    pub fn create_task(
        &self,
        task_type: TaskType,
        content: impl Into<String>,
        scheduled_time: Option<DateTime<Local>>,
        metadata: Metadata,
    ) -> Result<String> {
        let task = Task::new(task_type, content)
            .scheduled_at(scheduled_time)
            .with_metadata(metadata);
        let id = task.id.clone();

        lock(&self.inner.tasks).insert(id.clone(), task.clone());
        if let Err(e) = self.persist() {
            lock(&self.inner.tasks).remove(&id);
            return Err(e);
        }
        self.schedule(&task);

        tracing::info!(id, kind = %task_type, "task created");
        Ok(id)
    }

    /// Move a task to a new time, re-arming it if it had already fired
    ///
    /// # Errors
    ///
    /// Returns error if the task does not exist or cannot be saved
    pub fn reschedule(&self, id: &str, when: DateTime<Local>) -> Result<()> {
        let task = {
            let mut tasks = lock(&self.inner.tasks);
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(format!("task {id}")))?;
            task.scheduled_time = Some(when);
            task.completed = false;
            task.clone()
        };

        self.disarm(id);
        self.schedule(&task);
        self.persist()?;

        tracing::info!(id, %when, "task rescheduled");
        Ok(())
    }

    /// Remove a task and its timer
    ///
    /// Returns `false` if no such task existed.
    ///
    /// # Errors
    ///
    /// Returns error if the task table cannot be saved
    pub fn cancel(&self, id: &str) -> Result<bool> {
        self.disarm(id);
        let removed = lock(&self.inner.tasks).remove(id).is_some();
        if removed {
            self.persist()?;
            tracing::info!(id, "task cancelled");
        }
        Ok(removed)
    }

    /// Look up a task by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Task> {
        lock(&self.inner.tasks).get(id).cloned()
    }

    /// All tasks, oldest first
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = lock(&self.inner.tasks).values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Tasks that have not completed, oldest first
    #[must_use]
    pub fn active_tasks(&self) -> Vec<Task> {
        let mut tasks = self.tasks();
        tasks.retain(|t| !t.completed);
        tasks
    }

    /// Whether a timer is currently armed for the task
    #[must_use]
    pub fn has_timer(&self, id: &str) -> bool {
        lock(&self.inner.timers).contains_key(id)
    }

    /// Fire every overdue task that has no armed timer
    ///
    /// Returns the ids that fired.
    pub fn run_due(&self, now: DateTime<Local>) -> Vec<String> {
        let due: Vec<String> = {
            let tasks = lock(&self.inner.tasks);
            let timers = lock(&self.inner.timers);
            tasks
                .values()
                .filter(|t| t.is_due(now) && !timers.contains_key(&t.id))
                .map(|t| t.id.clone())
                .collect()
        };

        due.into_iter().filter(|id| self.execute(id)).collect()
    }

    /// Mark a task completed, persist, and notify callbacks
    ///
    /// Any armed timer for the task is cancelled. Returns `false` if the task
    /// is unknown or already completed.
    pub fn execute(&self, id: &str) -> bool {
        self.disarm(id);
        self.complete(id)
    }

    /// Timer wakeup; ignored if the timer was superseded or the task moved
    fn fire_timer(&self, id: &str, generation: u64) -> bool {
        {
            let mut timers = lock(&self.inner.timers);
            match timers.get(id) {
                Some(armed) if armed.generation == generation => {
                    timers.remove(id);
                }
                _ => return false,
            }
        }

        let Some(task) = self.get(id).filter(|t| !t.completed) else {
            return false;
        };
        if !task.is_due(Local::now()) {
            // Woke ahead of the wall clock or the task was moved later
            self.schedule(&task);
            return false;
        }
        self.complete(id)
    }

    fn complete(&self, id: &str) -> bool {
        let fired = {
            let mut tasks = lock(&self.inner.tasks);
            match tasks.get_mut(id) {
                Some(task) if !task.completed => {
                    task.completed = true;
                    task.clone()
                }
                _ => return false,
            }
        };

        tracing::info!(id, kind = %fired.task_type, "task fired");

        if let Err(e) = self.persist() {
            tracing::error!(id, error = %e, "failed to persist fired task");
        }

        let callbacks = lock(&self.inner.callbacks).clone();
        for callback in callbacks {
            callback(&fired);
        }
        true
    }

    /// Arm a one-shot timer for the task if its time is in the future
    fn schedule(&self, task: &Task) {
        let Some(when) = task.scheduled_time else {
            return;
        };
        let Ok(delay) = (when - Local::now()).to_std() else {
            return;
        };
        if delay.is_zero() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(id = %task.id, "no runtime; task left to the overdue poll");
            return;
        };

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let manager = self.clone();
        let id = task.id.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            manager.fire_timer(&id, generation);
        });

        let armed = ArmedTimer { generation, handle };
        if let Some(previous) = lock(&self.inner.timers).insert(task.id.clone(), armed) {
            previous.handle.abort();
        }
        tracing::debug!(id = %task.id, %when, "task scheduled");
    }

    fn disarm(&self, id: &str) {
        if let Some(timer) = lock(&self.inner.timers).remove(id) {
            timer.handle.abort();
        }
    }

    fn persist(&self) -> Result<()> {
        let snapshot = lock(&self.inner.tasks).clone();
        self.inner.state.set_tasks(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Duration as ChronoDuration;

    use super::*;

    fn manager() -> (tempfile::TempDir, TaskManager) {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(StateManager::open(dir.path().join("state.json")));
        (dir, TaskManager::new(state))
    }

    #[test]
    fn notes_are_not_scheduled() {
        let (_dir, tasks) = manager();
        let id = tasks
            .create_task(TaskType::Note, "buy milk", None, Metadata::new())
            .unwrap();
        assert!(!tasks.has_timer(&id));
        assert_eq!(tasks.active_tasks().len(), 1);
    }

    #[test]
    fn run_due_fires_once() {
        let (_dir, tasks) = manager();
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        tasks.add_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        // Past times are never armed, so the poll owns the task
        let past = Local::now() - ChronoDuration::seconds(5);
        let id = tasks
            .create_task(TaskType::Reminder, "stretch", Some(past), Metadata::new())
            .unwrap();

        assert_eq!(tasks.run_due(Local::now()), vec![id.clone()]);
        assert!(tasks.run_due(Local::now()).is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(tasks.get(&id).unwrap().completed);
    }

    #[test]
    fn cancel_unknown_is_false() {
        let (_dir, tasks) = manager();
        assert!(!tasks.cancel("task_missing").unwrap());
    }

    #[test]
    fn reschedule_unknown_is_not_found() {
        let (_dir, tasks) = manager();
        let err = tasks.reschedule("task_missing", Local::now()).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    fn armed_generation(tasks: &TaskManager, id: &str) -> u64 {
        lock(&tasks.inner.timers)[id].generation
    }

    #[tokio::test]
    async fn superseded_timer_wakeup_is_ignored() {
        let (_dir, tasks) = manager();
        let soon = Local::now() + ChronoDuration::milliseconds(50);
        let id = tasks
            .create_task(TaskType::Reminder, "stretch", Some(soon), Metadata::new())
            .unwrap();
        let stale = armed_generation(&tasks, &id);

        let later = Local::now() + ChronoDuration::minutes(10);
        tasks.reschedule(&id, later).unwrap();

        // Old timer woke before it could be aborted
        assert!(!tasks.fire_timer(&id, stale));
        assert!(tasks.has_timer(&id));
        assert!(!tasks.get(&id).unwrap().completed);

        tasks.stop_scheduler();
    }

    #[tokio::test]
    async fn early_timer_wakeup_leaves_task_pending() {
        let (_dir, tasks) = manager();
        let later = Local::now() + ChronoDuration::minutes(10);
        let id = tasks
            .create_task(TaskType::Reminder, "stretch", Some(later), Metadata::new())
            .unwrap();
        let generation = armed_generation(&tasks, &id);

        assert!(!tasks.fire_timer(&id, generation));
        assert!(!tasks.get(&id).unwrap().completed);
        // Re-armed under a fresh generation
        assert!(tasks.has_timer(&id));
        assert_ne!(armed_generation(&tasks, &id), generation);

        tasks.stop_scheduler();
    }

    #[tokio::test]
    async fn failed_save_discards_new_task() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the state directory should be makes every save fail
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let state = Arc::new(StateManager::open(blocker.join("state.json")));
        let tasks = TaskManager::new(state);

        let soon = Local::now() + ChronoDuration::milliseconds(50);
        let result = tasks.create_task(
            TaskType::Timer,
            "Timer for 1 seconds",
            Some(soon),
            Metadata::new(),
        );

        assert!(result.is_err());
        assert!(tasks.tasks().is_empty());
        assert!(lock(&tasks.inner.timers).is_empty());
    }
}
