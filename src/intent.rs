//! Local command routing
//!
//! Recognizes the commands handled on-device (sleep, timers, reminders,
//! notes, task listing) so they never reach the language model.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use regex::Regex;

use crate::Result;
use crate::tasks::{Metadata, Task, TaskManager, TaskType};

const SLEEP_PHRASES: &[&str] = &["sleep", "okay for now", "goodbye for now"];
const TIMER_PHRASES: &[&str] = &["timer", "set timer", "countdown"];
const REMINDER_PHRASES: &[&str] = &["remind", "reminder", "remember to"];
const NOTE_PHRASES: &[&str] = &["note", "write down", "save this"];
const LIST_PHRASES: &[&str] = &["list tasks", "show tasks", "my tasks"];
const EXIT_WORDS: &[&str] = &["goodbye", "bye", "stop", "exit"];

/// Reply when a sleep command is recognized
pub const SLEEP_REPLY: &str = "Going to sleep. Say a wake word when you need me.";

/// Maximum characters of a note shown in task listings
const NOTE_PREVIEW_CHARS: usize = 50;

/// Entries spoken when listing tasks
const LIST_LIMIT: usize = 3;

static DURATION_PATTERNS: LazyLock<[(Regex, u64); 3]> = LazyLock::new(|| {
    [
        (Regex::new(r"(\d+)\s*(?:minute|min)s?").expect("valid regex"), 60),
        (Regex::new(r"(\d+)\s*(?:hour|hr)s?").expect("valid regex"), 3600),
        (Regex::new(r"(\d+)\s*(?:second|sec)s?").expect("valid regex"), 1),
    ]
});

static IN_MINUTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"in (\d+) minutes?").expect("valid regex"));
static IN_HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"in (\d+) hours?").expect("valid regex"));
static AT_CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"at (\d{1,2}):(\d{2})(?:\s*([ap])\.?\s?m\b\.?)?").expect("valid regex")
});

/// A locally handled command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Sleep,
    Timer,
    Reminder,
    Note,
    ListTasks,
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| text.contains(p))
}

/// Match a command against the local handlers, in priority order
#[must_use]
pub fn route(command: &str) -> Option<Intent> {
    let lower = command.to_lowercase();

    if contains_any(&lower, SLEEP_PHRASES) {
        Some(Intent::Sleep)
    } else if contains_any(&lower, TIMER_PHRASES) {
        Some(Intent::Timer)
    } else if contains_any(&lower, REMINDER_PHRASES) {
        Some(Intent::Reminder)
    } else if contains_any(&lower, NOTE_PHRASES) {
        Some(Intent::Note)
    } else if contains_any(&lower, LIST_PHRASES) {
        Some(Intent::ListTasks)
    } else {
        None
    }
}

/// Whether the command asks the assistant to shut down
#[must_use]
pub fn is_exit_command(command: &str) -> bool {
    command
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| EXIT_WORDS.contains(&word))
}

/// Total seconds across every "N minutes/hours/seconds" mention
#[must_use]
pub fn parse_duration(text: &str) -> u64 {
    let lower = text.to_lowercase();

    DURATION_PATTERNS
        .iter()
        .flat_map(|(pattern, multiplier)| {
            pattern.captures_iter(&lower).filter_map(move |caps| {
                caps[1]
                    .parse::<u64>()
                    .ok()
                    .map(|value| value.saturating_mul(*multiplier))
            })
        })
        .fold(0, u64::saturating_add)
}

/// Resolve "in N minutes", "in N hours" or "at H:MM" relative to `now`
///
/// Clock times that already passed today refer to tomorrow.
#[must_use]
pub fn parse_reminder_time(text: &str, now: DateTime<Local>) -> Option<DateTime<Local>> {
    let lower = text.to_lowercase();

    if let Some(caps) = IN_MINUTES.captures(&lower) {
        let minutes: i64 = caps[1].parse().ok()?;
        return now.checked_add_signed(Duration::try_minutes(minutes)?);
    }

    if let Some(caps) = IN_HOURS.captures(&lower) {
        let hours: i64 = caps[1].parse().ok()?;
        return now.checked_add_signed(Duration::try_hours(hours)?);
    }

    let caps = AT_CLOCK.captures(&lower)?;
    let mut hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    match caps.get(3).map(|m| m.as_str()) {
        Some("p") if hour < 12 => hour += 12,
        Some("a") if hour == 12 => hour = 0,
        _ => {}
    }

    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let mut date = now.date_naive();
    loop {
        // Skip local times that do not exist (DST gaps)
        if let Some(candidate) = Local.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > now {
                return Some(candidate);
            }
        }
        date = date.succ_opt()?;
        if date > now.date_naive() + Duration::days(2) {
            return None;
        }
    }
}

fn plural(n: u64, unit: &str) -> String {
    if n == 1 {
        format!("{n} {unit}")
    } else {
        format!("{n} {unit}s")
    }
}

/// Spoken confirmation for a new timer
#[must_use]
pub fn describe_timer(total_seconds: u64) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    if minutes > 0 {
        format!(
            "Timer set for {} and {}.",
            plural(minutes, "minute"),
            plural(seconds, "second")
        )
    } else {
        format!("Timer set for {}.", plural(seconds, "second"))
    }
}

fn clock(time: DateTime<Local>) -> String {
    time.format("%I:%M %p").to_string()
}

fn note_preview(content: &str) -> String {
    if content.chars().count() > NOTE_PREVIEW_CHARS {
        let head: String = content.chars().take(NOTE_PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        content.to_string()
    }
}

/// Describe active tasks for speaking
#[must_use]
pub fn format_task_list(tasks: &[Task], now: DateTime<Local>) -> String {
    let entries: Vec<String> = tasks
        .iter()
        .filter(|t| !t.completed)
        .filter_map(|task| match task.task_type {
            TaskType::Timer => {
                let remaining = (task.scheduled_time? - now).num_seconds();
                (remaining > 0).then(|| {
                    format!(
                        "Timer: {} minutes {} seconds remaining",
                        remaining / 60,
                        remaining % 60
                    )
                })
            }
            TaskType::Reminder => Some(task.scheduled_time.map_or_else(
                || format!("Reminder: {}", task.content),
                |at| format!("Reminder at {}: {}", clock(at), task.content),
            )),
            TaskType::Note => Some(format!("Note: {}", note_preview(&task.content))),
            _ => None,
        })
        .collect();

    if entries.is_empty() {
        "You have no active tasks.".to_string()
    } else if entries.len() <= LIST_LIMIT {
        format!("Here are your active tasks:\n{}", entries.join("\n"))
    } else {
        format!(
            "You have {} active tasks. Here are the first {LIST_LIMIT}:\n{}",
            entries.len(),
            entries[..LIST_LIMIT].join("\n")
        )
    }
}

/// Run a task-related intent against the task manager
///
/// Sleep is a controller concern and only yields its reply here.
///
/// # Errors
///
/// Returns error if a new task cannot be persisted
pub fn handle(
    intent: Intent,
    command: &str,
    tasks: &TaskManager,
    now: DateTime<Local>,
) -> Result<String> {
    match intent {
        Intent::Sleep => Ok(SLEEP_REPLY.to_string()),
        Intent::Timer => create_timer(command, tasks, now),
        Intent::Reminder => create_reminder(command, tasks, now),
        Intent::Note => {
            let mut metadata = Metadata::new();
            metadata.insert("created_via".into(), "voice".into());
            tasks.create_task(TaskType::Note, command, None, metadata)?;
            Ok("Note saved successfully.".to_string())
        }
        Intent::ListTasks => Ok(format_task_list(&tasks.active_tasks(), now)),
    }
}

fn create_timer(command: &str, tasks: &TaskManager, now: DateTime<Local>) -> Result<String> {
    let total_seconds = parse_duration(command);
    let due = i64::try_from(total_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| now.checked_add_signed(d));

    let Some(due) = due.filter(|_| total_seconds > 0) else {
        return Ok(
            "I couldn't understand the timer duration. Please specify how long you want the timer for."
                .to_string(),
        );
    };

    let mut metadata = Metadata::new();
    metadata.insert("duration".into(), total_seconds.into());
    tasks.create_task(
        TaskType::Timer,
        format!("Timer for {total_seconds} seconds"),
        Some(due),
        metadata,
    )?;

    Ok(describe_timer(total_seconds))
}

fn create_reminder(command: &str, tasks: &TaskManager, now: DateTime<Local>) -> Result<String> {
    let scheduled = parse_reminder_time(command, now);

    let mut metadata = Metadata::new();
    metadata.insert("original_command".into(), command.into());
    tasks.create_task(TaskType::Reminder, command, scheduled, metadata)?;

    Ok(scheduled.map_or_else(
        || "Reminder noted. I'll help you specify the time later.".to_string(),
        |at| format!("Reminder set for {}.", clock(at)),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    fn noon() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2025, 6, 10, 12, 0, 0)
            .earliest()
            .unwrap()
    }

    #[test]
    fn routes_in_priority_order() {
        assert_eq!(route("Okay for now"), Some(Intent::Sleep));
        assert_eq!(route("set a timer for 5 minutes"), Some(Intent::Timer));
        assert_eq!(route("remind me to call mom"), Some(Intent::Reminder));
        assert_eq!(route("write down buy eggs"), Some(Intent::Note));
        assert_eq!(route("show tasks"), Some(Intent::ListTasks));
        assert_eq!(route("what is the capital of France"), None);
    }

    #[test]
    fn durations_are_summed() {
        assert_eq!(parse_duration("set a timer for 5 minutes"), 300);
        assert_eq!(parse_duration("timer 1 hour 2 mins 3 seconds"), 3723);
        assert_eq!(parse_duration("30 sec countdown"), 30);
        assert_eq!(parse_duration("set a timer"), 0);
    }

    #[test]
    fn timer_descriptions() {
        assert_eq!(describe_timer(1), "Timer set for 1 second.");
        assert_eq!(describe_timer(45), "Timer set for 45 seconds.");
        assert_eq!(describe_timer(60), "Timer set for 1 minute and 0 seconds.");
        assert_eq!(describe_timer(3723), "Timer set for 62 minutes and 3 seconds.");
    }

    #[test]
    fn relative_reminder_times() {
        let now = noon();
        assert_eq!(
            parse_reminder_time("remind me in 10 minutes", now),
            Some(now + Duration::minutes(10))
        );
        assert_eq!(
            parse_reminder_time("remind me in 2 hours to stretch", now),
            Some(now + Duration::hours(2))
        );
        assert_eq!(parse_reminder_time("remind me to stretch", now), None);
    }

    #[test]
    fn out_of_range_reminder_times_are_ignored() {
        let now = noon();
        assert_eq!(parse_reminder_time("remind me in 9999999999 hours", now), None);
        assert_eq!(parse_reminder_time("remind me in 99999999999999 minutes", now), None);
    }

    #[test]
    fn clock_reminder_times() {
        let now = noon();

        let later = parse_reminder_time("remind me at 14:30", now).unwrap();
        assert_eq!((later.hour(), later.minute()), (14, 30));
        assert_eq!(later.date_naive(), now.date_naive());

        let tomorrow = parse_reminder_time("remind me at 9:15", now).unwrap();
        assert_eq!(tomorrow.date_naive(), now.date_naive().succ_opt().unwrap());

        let pm = parse_reminder_time("remind me at 3:00 pm", now).unwrap();
        assert_eq!(pm.hour(), 15);

        assert!(parse_reminder_time("remind me at 25:00", now).is_none());
    }

    #[test]
    fn exit_matches_whole_words() {
        assert!(is_exit_command("Goodbye!"));
        assert!(is_exit_command("ok bye"));
        assert!(is_exit_command("please stop"));
        assert!(!is_exit_command("start the stopwatch"));
        assert!(!is_exit_command("what's a byte"));
    }

    #[test]
    fn empty_task_list() {
        assert_eq!(format_task_list(&[], noon()), "You have no active tasks.");
    }

    #[test]
    fn task_list_formats_each_kind() {
        let now = noon();
        let timer = Task::new(TaskType::Timer, "Timer for 90 seconds")
            .scheduled_at(Some(now + Duration::seconds(90)));
        let reminder = Task::new(TaskType::Reminder, "call mom")
            .scheduled_at(Some(now + Duration::hours(1)));
        let note = Task::new(TaskType::Note, "x".repeat(60));

        let listing = format_task_list(&[timer, reminder, note], now);
        assert_eq!(
            listing,
            format!(
                "Here are your active tasks:\nTimer: 1 minutes 30 seconds remaining\nReminder at 01:00 PM: call mom\nNote: {}...",
                "x".repeat(50)
            )
        );
    }

    #[test]
    fn long_task_lists_are_truncated() {
        let now = noon();
        let notes: Vec<Task> = (0..5)
            .map(|i| Task::new(TaskType::Note, format!("note {i}")))
            .collect();
        let listing = format_task_list(&notes, now);
        assert!(listing.starts_with("You have 5 active tasks. Here are the first 3:\n"));
        assert_eq!(listing.lines().count(), 4);
    }

    #[test]
    fn expired_timers_are_skipped() {
        let now = noon();
        let timer = Task::new(TaskType::Timer, "Timer for 5 seconds")
            .scheduled_at(Some(now - Duration::seconds(1)));
        assert_eq!(format_task_list(&[timer], now), "You have no active tasks.");
    }
}
