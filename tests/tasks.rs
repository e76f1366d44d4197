//! Task scheduling integration tests
//!
//! Uses short real-time delays; every wait is bounded by a timeout.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Local};
use tokio::sync::mpsc;

use voice_assistant::StateManager;
use voice_assistant::tasks::{Metadata, Task, TaskManager, TaskType};

mod common;

const WAIT: Duration = Duration::from_secs(3);

/// Forward fired tasks into a channel
fn subscribe(tasks: &TaskManager) -> mpsc::UnboundedReceiver<Task> {
    let (tx, rx) = mpsc::unbounded_channel();
    tasks.add_callback(move |task| {
        let _ = tx.send(task.clone());
    });
    rx
}

fn in_millis(ms: i64) -> Option<chrono::DateTime<Local>> {
    Some(Local::now() + ChronoDuration::milliseconds(ms))
}

#[tokio::test]
async fn test_timer_fires_and_persists() {
    let (dir, state) = common::temp_state();
    let tasks = TaskManager::new(Arc::clone(&state));
    let mut fired = subscribe(&tasks);

    let mut metadata = Metadata::new();
    metadata.insert("duration".into(), 1.into());
    let id = tasks
        .create_task(TaskType::Timer, "Timer for 1 seconds", in_millis(200), metadata)
        .unwrap();
    assert!(tasks.has_timer(&id));

    let task = tokio::time::timeout(WAIT, fired.recv()).await.unwrap().unwrap();
    assert_eq!(task.id, id);
    assert!(task.completed);
    assert!(!tasks.has_timer(&id));
    assert!(tasks.active_tasks().is_empty());

    // Completion reached the file
    let reopened = StateManager::open(dir.path().join("assistant_state.json"));
    let stored = reopened.tasks();
    assert!(stored[&id].completed);
    assert_eq!(stored[&id].metadata["duration"], 1);
}

#[tokio::test]
async fn test_overdue_task_fires_on_first_poll_after_restart() {
    let (dir, state) = common::temp_state();
    let id = {
        let tasks = TaskManager::new(state);
        tasks
            .create_task(
                TaskType::Reminder,
                "take out the trash",
                in_millis(-60_000),
                Metadata::new(),
            )
            .unwrap()
    };

    let state = Arc::new(StateManager::open(dir.path().join("assistant_state.json")));
    let tasks = TaskManager::with_poll_interval(state, Duration::from_millis(50));
    let mut fired = subscribe(&tasks);
    tasks.start_scheduler();

    let task = tokio::time::timeout(WAIT, fired.recv()).await.unwrap().unwrap();
    assert_eq!(task.id, id);
    assert_eq!(task.content, "take out the trash");

    tasks.stop_scheduler();
}

#[tokio::test]
async fn test_future_tasks_are_rearmed_after_restart() {
    let (dir, state) = common::temp_state();
    let id = {
        let tasks = TaskManager::new(state);
        let id = tasks
            .create_task(TaskType::Timer, "Timer for 1 seconds", in_millis(400), Metadata::new())
            .unwrap();
        // Simulate shutdown before the timer fires
        tasks.stop_scheduler();
        id
    };

    let state = Arc::new(StateManager::open(dir.path().join("assistant_state.json")));
    let tasks = TaskManager::new(state);
    assert!(!tasks.has_timer(&id));

    let mut fired = subscribe(&tasks);
    tasks.start_scheduler();
    assert!(tasks.has_timer(&id));

    let task = tokio::time::timeout(WAIT, fired.recv()).await.unwrap().unwrap();
    assert_eq!(task.id, id);

    // Fired exactly once
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(fired.try_recv().is_err());

    tasks.stop_scheduler();
}

#[tokio::test]
async fn test_cancelled_timer_never_fires() {
    let (_dir, state) = common::temp_state();
    let tasks = TaskManager::new(state);
    let mut fired = subscribe(&tasks);

    let id = tasks
        .create_task(TaskType::Timer, "Timer for 1 seconds", in_millis(150), Metadata::new())
        .unwrap();
    assert!(tasks.cancel(&id).unwrap());
    assert!(tasks.get(&id).is_none());
    assert!(!tasks.has_timer(&id));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(fired.try_recv().is_err());
}

#[tokio::test]
async fn test_reschedule_moves_reminder_earlier() {
    let (_dir, state) = common::temp_state();
    let tasks = TaskManager::new(state);
    let mut fired = subscribe(&tasks);

    let id = tasks
        .create_task(TaskType::Reminder, "stretch", in_millis(60_000), Metadata::new())
        .unwrap();
    tasks.reschedule(&id, in_millis(100).unwrap()).unwrap();

    let task = tokio::time::timeout(WAIT, fired.recv()).await.unwrap().unwrap();
    assert_eq!(task.id, id);

    // Only the rescheduled timer existed
    assert!(fired.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_scheduler_disarms_everything() {
    let (_dir, state) = common::temp_state();
    let tasks = TaskManager::with_poll_interval(state, Duration::from_millis(50));
    let mut fired = subscribe(&tasks);
    tasks.start_scheduler();

    let id = tasks
        .create_task(TaskType::Timer, "Timer for 1 seconds", in_millis(150), Metadata::new())
        .unwrap();
    tasks.stop_scheduler();
    assert!(!tasks.has_timer(&id));

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(fired.try_recv().is_err());
    assert!(!tasks.get(&id).unwrap().completed);
}

#[tokio::test]
async fn test_notes_are_listed_oldest_first() {
    let (_dir, state) = common::temp_state();
    let tasks = TaskManager::new(state);

    let first = tasks
        .create_task(TaskType::Note, "buy eggs", None, Metadata::new())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = tasks
        .create_task(TaskType::Note, "call the plumber", None, Metadata::new())
        .unwrap();

    let ids: Vec<String> = tasks.tasks().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![first, second]);
}
