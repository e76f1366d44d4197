//! Controller tests with scripted input, recorded output and a fake model

use std::time::Duration;

use voice_assistant::assistant::{FAREWELL, GREETING, SHUTDOWN_REPLY, WAKE_ACK};
use voice_assistant::intent::SLEEP_REPLY;
use voice_assistant::llm::SYSTEM_PROMPT;
use voice_assistant::tasks::Metadata;
use voice_assistant::voice::WakeWordDetector;
use voice_assistant::{Assistant, AssistantOptions, Role, TaskManager, TaskType};

mod common;

use common::{RecordingSpeaker, ScriptedListener, ScriptedResponder};

type TestAssistant = Assistant<ScriptedListener, RecordingSpeaker, ScriptedResponder>;

fn fast_options() -> AssistantOptions {
    AssistantOptions {
        loop_delay: Duration::from_millis(1),
        error_delay: Duration::from_millis(1),
        ..AssistantOptions::default()
    }
}

fn assistant(
    listener: ScriptedListener,
    responder: &ScriptedResponder,
    options: AssistantOptions,
) -> (TestAssistant, RecordingSpeaker, tempfile::TempDir) {
    let (dir, state) = common::temp_state();
    let speaker = RecordingSpeaker::default();
    let tasks = TaskManager::new(std::sync::Arc::clone(&state));

    let assistant = Assistant::new(
        listener,
        speaker.clone(),
        responder.clone(),
        state,
        tasks,
        WakeWordDetector::default(),
        options,
    );
    (assistant, speaker, dir)
}

async fn run(assistant: &mut TestAssistant) {
    tokio::time::timeout(
        Duration::from_secs(5),
        assistant.run_until(std::future::pending()),
    )
    .await
    .expect("assistant loop did not finish");
}

#[tokio::test]
async fn test_inline_command_is_answered() {
    let responder = ScriptedResponder::always("Rust is a programming language.");
    let (mut assistant, speaker, dir) = assistant(
        ScriptedListener::new(["Hey assistant, what is rust?"]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(
        speaker.spoken(),
        vec![GREETING, "Rust is a programming language."]
    );
    assert_eq!(
        responder.calls(),
        vec![("what is rust?".to_string(), SYSTEM_PROMPT.to_string())]
    );
    assert_eq!(assistant.error_count(), 0);
    assert!(!assistant.is_awake());

    let reopened =
        voice_assistant::StateManager::open(dir.path().join("assistant_state.json"));
    let history = reopened.conversation_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "what is rust?");
    assert_eq!(history[1].role, Role::Model);
    assert_eq!(reopened.session_count(), 1);
}

#[tokio::test]
async fn test_bare_wake_word_prompts_for_command() {
    let responder = ScriptedResponder::always("Why did the crab cross the road?");
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new(["Assistant.", "tell me a joke"]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(
        speaker.spoken(),
        vec![GREETING, WAKE_ACK, "Why did the crab cross the road?"]
    );
    assert_eq!(responder.calls()[0].0, "tell me a joke");
}

#[tokio::test]
async fn test_speech_without_wake_word_is_ignored() {
    let responder = ScriptedResponder::always("unused");
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new(["what's on the radio", "turn it up"]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(speaker.spoken(), vec![GREETING]);
    assert!(responder.calls().is_empty());
}

#[tokio::test]
async fn test_follow_up_needs_no_wake_word() {
    let responder = ScriptedResponder::always("Sure.");
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new(["hey assistant what's two plus two", "and times three"]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(speaker.spoken(), vec![GREETING, "Sure.", "Sure."]);
    let calls = responder.calls();
    assert_eq!(calls[1].0, "and times three");
    // Second prompt carries the first exchange
    assert!(calls[1].1.contains("User: what's two plus two"));
    assert!(calls[1].1.contains("Assistant: Sure."));
}

#[tokio::test]
async fn test_timer_is_handled_locally() {
    let responder = ScriptedResponder::always("unused");
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new(["hey assistant set a timer for 5 minutes"]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(
        speaker.spoken(),
        vec![GREETING, "Timer set for 5 minutes and 0 seconds."]
    );
    assert!(responder.calls().is_empty());

    let tasks = assistant.tasks().tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, TaskType::Timer);
    assert_eq!(tasks[0].content, "Timer for 300 seconds");
    assert!(!tasks[0].completed);
}

#[tokio::test]
async fn test_sleep_requires_wake_word_again() {
    let responder = ScriptedResponder::always("It's noon.");
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new([
            "hey assistant what time is it",
            "okay for now",
            "what about tomorrow",
        ]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(speaker.spoken(), vec![GREETING, "It's noon.", SLEEP_REPLY]);
    assert_eq!(responder.calls().len(), 1);
}

#[tokio::test]
async fn test_exit_command_stops_the_loop() {
    let responder = ScriptedResponder::always("See you later.");
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new(["assistant goodbye", "hey assistant are you there"]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert!(assistant.is_stopped());
    assert_eq!(speaker.spoken(), vec![GREETING, "See you later.", FAREWELL]);
    assert_eq!(responder.calls().len(), 1);
}

#[tokio::test]
async fn test_error_budget_shuts_down() {
    let responder = ScriptedResponder::failing();
    let options = AssistantOptions {
        max_errors: 2,
        ..fast_options()
    };
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new(["hey assistant first question", "second question", "third"]),
        &responder,
        options,
    );

    run(&mut assistant).await;

    assert_eq!(assistant.error_count(), 2);
    assert_eq!(responder.calls().len(), 2);
    assert_eq!(speaker.spoken().last().map(String::as_str), Some(SHUTDOWN_REPLY));
}

#[tokio::test]
async fn test_success_resets_error_count() {
    let responder = ScriptedResponder::always("Back online.").then(None);
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::new(["hey assistant hello", "are you there"]),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(assistant.error_count(), 0);
    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 3);
    assert_ne!(spoken[1], "Back online.");
    assert_eq!(spoken[2], "Back online.");
}

#[tokio::test]
async fn test_listener_failure_counts_as_error() {
    let responder = ScriptedResponder::always("unused");
    let (mut assistant, speaker, _dir) = assistant(
        ScriptedListener::default().then_error("microphone unplugged"),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(assistant.error_count(), 1);
    assert_eq!(speaker.spoken(), vec![GREETING]);
}

#[tokio::test]
async fn test_empty_capture_is_not_an_error() {
    let responder = ScriptedResponder::always("unused");
    let (mut assistant, _speaker, _dir) = assistant(
        ScriptedListener::default().then_nothing().then_nothing(),
        &responder,
        fast_options(),
    );

    run(&mut assistant).await;

    assert_eq!(assistant.error_count(), 0);
}

#[tokio::test]
async fn test_fired_reminder_is_announced() {
    let responder = ScriptedResponder::always("unused");
    let (mut assistant, speaker, _dir) =
        assistant(ScriptedListener::default(), &responder, fast_options());

    let id = assistant
        .tasks()
        .create_task(TaskType::Reminder, "call mom", None, Metadata::new())
        .unwrap();
    assert!(assistant.tasks().execute(&id));

    assistant.announce_fired().await;

    assert_eq!(speaker.spoken(), vec!["Reminder: call mom"]);
    assert!(speaker.sounds().is_empty());
}

#[tokio::test]
async fn test_finished_timer_plays_alarm() {
    let alarm = tempfile::NamedTempFile::new().unwrap();
    let options = AssistantOptions {
        alarm_path: Some(alarm.path().to_path_buf()),
        ..fast_options()
    };
    let responder = ScriptedResponder::always("unused");
    let (mut assistant, speaker, _dir) =
        assistant(ScriptedListener::default(), &responder, options);

    let id = assistant
        .tasks()
        .create_task(TaskType::Timer, "Timer for 1 seconds", None, Metadata::new())
        .unwrap();
    assistant.tasks().execute(&id);
    assistant.announce_fired().await;

    assert_eq!(speaker.sounds(), vec![alarm.path().to_path_buf()]);
    assert_eq!(speaker.spoken(), vec!["Timer finished! Timer for 1 seconds"]);
}

#[tokio::test]
async fn test_missing_alarm_file_still_announces() {
    let options = AssistantOptions {
        alarm_path: Some("/nonexistent/alarm.wav".into()),
        ..fast_options()
    };
    let responder = ScriptedResponder::always("unused");
    let (mut assistant, speaker, _dir) =
        assistant(ScriptedListener::default(), &responder, options);

    let id = assistant
        .tasks()
        .create_task(TaskType::Timer, "Timer for 2 seconds", None, Metadata::new())
        .unwrap();
    assistant.tasks().execute(&id);
    assistant.announce_fired().await;

    assert!(speaker.sounds().is_empty());
    assert_eq!(speaker.spoken(), vec!["Timer finished! Timer for 2 seconds"]);
}
