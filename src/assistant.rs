//! Assistant controller
//!
//! Drives the wake word → command → reply loop, announces fired tasks and
//! shuts down once the error budget is spent.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio::sync::mpsc;

use crate::intent::{self, Intent};
use crate::llm::{self, Responder};
use crate::state::{ConversationMessage, StateManager};
use crate::tasks::{Task, TaskManager, TaskType};
use crate::voice::{Listener, Speaker, WakeWordDetector, extract_command};

pub const GREETING: &str = "Voice assistant initialized and ready.";
pub const FAREWELL: &str = "Goodbye!";
pub const WAKE_ACK: &str = "Yes?";
pub const SHUTDOWN_REPLY: &str = "I'm experiencing technical difficulties. Please restart me.";
pub const PROCESSING_ERROR_REPLY: &str =
    "I'm sorry, I had trouble processing that. Could you try again?";

/// What the assistant is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

/// Controller tuning
#[derive(Debug, Clone)]
pub struct AssistantOptions {
    /// Consecutive failures tolerated before shutting down
    pub max_errors: u32,
    pub wake_word_timeout: Duration,
    pub command_timeout: Duration,
    /// Pause between loop iterations
    pub loop_delay: Duration,
    /// Pause after a failed iteration
    pub error_delay: Duration,
    /// Sound played when a timer finishes
    pub alarm_path: Option<PathBuf>,
}

impl Default for AssistantOptions {
    fn default() -> Self {
        Self {
            max_errors: 5,
            wake_word_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
            loop_delay: Duration::from_millis(100),
            error_delay: Duration::from_secs(1),
            alarm_path: None,
        }
    }
}

/// Spoken announcement for a fired task
#[must_use]
pub fn announcement(task: &Task) -> Option<String> {
    match task.task_type {
        TaskType::Timer => Some(format!("Timer finished! {}", task.content)),
        TaskType::Reminder => Some(format!("Reminder: {}", task.content)),
        _ => None,
    }
}

/// The voice assistant
pub struct Assistant<L, S, R> {
    listener: L,
    speaker: S,
    responder: R,
    state: Arc<StateManager>,
    tasks: TaskManager,
    wake_words: WakeWordDetector,
    options: AssistantOptions,
    fired: mpsc::UnboundedReceiver<Task>,
    current: AssistantState,
    error_count: u32,
    awake: bool,
    should_stop: bool,
}

impl<L, S, R> Assistant<L, S, R>
where
    L: Listener,
    S: Speaker,
    R: Responder,
{
    /// Wire up the controller; fired tasks are queued for announcement
    pub fn new(
        listener: L,
        speaker: S,
        responder: R,
        state: Arc<StateManager>,
        tasks: TaskManager,
        wake_words: WakeWordDetector,
        options: AssistantOptions,
    ) -> Self {
        let (tx, fired) = mpsc::unbounded_channel();
        tasks.add_callback(move |task| {
            // Receiver gone means the assistant has shut down
            let _ = tx.send(task.clone());
        });

        Self {
            listener,
            speaker,
            responder,
            state,
            tasks,
            wake_words,
            options,
            fired,
            current: AssistantState::Idle,
            error_count: 0,
            awake: false,
            should_stop: false,
        }
    }

    #[must_use]
    pub const fn current_state(&self) -> AssistantState {
        self.current
    }

    #[must_use]
    pub const fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Whether a conversation is in progress
    #[must_use]
    pub const fn is_awake(&self) -> bool {
        self.awake
    }

    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.should_stop
    }

    #[must_use]
    pub const fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    /// Ask the loop to stop after the current iteration
    pub fn stop(&mut self) {
        self.should_stop = true;
    }

    /// Speak a reply; failures are logged and swallowed
    pub async fn speak(&mut self, text: &str) {
        self.current = AssistantState::Speaking;
        if let Err(e) = self.speaker.speak(text).await {
            tracing::error!(error = %e, "failed to speak");
        }
        self.current = AssistantState::Idle;
    }

    /// Wait for a wake word
    ///
    /// Returns whatever followed the wake word in the same utterance (possibly
    /// empty), or `None` if no wake word was heard.
    ///
    /// # Errors
    ///
    /// Returns error if capture or transcription fails
    pub async fn listen_for_wake_word(&mut self) -> crate::Result<Option<String>> {
        self.current = AssistantState::Listening;
        let heard = self.listener.listen(self.options.wake_word_timeout).await;
        self.current = AssistantState::Idle;

        let Some(text) = heard? else {
            return Ok(None);
        };
        tracing::info!(text, "heard");

        Ok(self
            .wake_words
            .matches(&text)
            .map(|wake_word| extract_command(&text, wake_word)))
    }

    /// Wait for a command
    ///
    /// # Errors
    ///
    /// Returns error if capture or transcription fails
    pub async fn listen_for_command(&mut self) -> crate::Result<Option<String>> {
        self.current = AssistantState::Listening;
        tracing::info!("listening for command");
        let heard = self.listener.listen(self.options.command_timeout).await;
        self.current = AssistantState::Idle;

        let command = heard?;
        if let Some(command) = &command {
            tracing::info!(command, "command");
        }
        Ok(command)
    }

    /// Produce the reply to a command
    ///
    /// Local task commands are handled directly; everything else goes to the
    /// responder with recent conversation as context.
    pub async fn process_command(&mut self, command: &str) -> String {
        self.current = AssistantState::Processing;
        let reply = self.reply_to(command).await;
        self.current = if self.error_count > 0 {
            AssistantState::Error
        } else {
            AssistantState::Idle
        };
        reply
    }

    async fn reply_to(&mut self, command: &str) -> String {
        let context = llm::build_context(&self.state.recent_messages(llm::CONTEXT_MESSAGES));

        if let Err(e) = self
            .state
            .update_conversation(ConversationMessage::user(command))
        {
            tracing::error!(error = %e, "failed to record command");
            self.error_count += 1;
            return PROCESSING_ERROR_REPLY.to_string();
        }

        if let Some(intent) = intent::route(command) {
            tracing::debug!(?intent, "handling locally");
            if intent == Intent::Sleep {
                self.awake = false;
            }
            return match intent::handle(intent, command, &self.tasks, Local::now()) {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::error!(error = %e, "task command failed");
                    self.error_count += 1;
                    PROCESSING_ERROR_REPLY.to_string()
                }
            };
        }

        match self.responder.generate_response(command, &context).await {
            Ok(reply) => {
                if let Err(e) = self
                    .state
                    .update_conversation(ConversationMessage::model(&reply))
                {
                    tracing::error!(error = %e, "failed to record reply");
                }
                self.error_count = 0;
                reply
            }
            Err(e) => {
                self.error_count += 1;
                tracing::warn!(error = %e, errors = self.error_count, "falling back");
                llm::fallback_response(command).to_string()
            }
        }
    }

    /// Announce every task that fired since the last call
    pub async fn announce_fired(&mut self) {
        while let Ok(task) = self.fired.try_recv() {
            let Some(text) = announcement(&task) else {
                continue;
            };

            if task.task_type == TaskType::Timer {
                if let Some(alarm) = self.options.alarm_path.clone().filter(|p| p.exists()) {
                    if let Err(e) = self.speaker.play_sound(&alarm).await {
                        tracing::warn!(path = %alarm.display(), error = %e, "failed to play alarm");
                    }
                }
            }

            self.speak(&text).await;
        }
    }

    /// One pass of the main loop
    ///
    /// # Errors
    ///
    /// Returns error if listening fails
    pub async fn step(&mut self) -> crate::Result<()> {
        self.announce_fired().await;

        let command = if self.awake {
            self.listen_for_command().await?
        } else {
            match self.listen_for_wake_word().await? {
                None => None,
                Some(inline) if inline.is_empty() => {
                    self.awake = true;
                    self.speak(WAKE_ACK).await;
                    self.listen_for_command().await?
                }
                Some(inline) => {
                    self.awake = true;
                    Some(inline)
                }
            }
        };

        match command {
            Some(command) => {
                let reply = self.process_command(&command).await;
                self.speak(&reply).await;

                if intent::route(&command).is_none() && intent::is_exit_command(&command) {
                    self.speak(FAREWELL).await;
                    self.should_stop = true;
                }
            }
            None if self.awake => {
                tracing::debug!("conversation ended");
                self.awake = false;
            }
            None => {}
        }

        Ok(())
    }

    fn check_error_budget(&self) -> bool {
        self.error_count >= self.options.max_errors
    }

    /// Run until stopped or Ctrl-C
    pub async fn run(&mut self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("assistant stopped by user");
        })
        .await;
    }

    /// Run until stopped or `shutdown` completes, then clean up
    pub async fn run_until<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);

        match self.state.begin_session() {
            Ok(session) => tracing::info!(session, "assistant starting"),
            Err(e) => tracing::warn!(error = %e, "failed to record session"),
        }
        self.tasks.start_scheduler();
        self.speak(GREETING).await;

        while !self.should_stop {
            let delay = tokio::select! {
                () = &mut shutdown => break,
                result = self.step() => match result {
                    Ok(()) => self.options.loop_delay,
                    Err(e) => {
                        self.error_count += 1;
                        self.current = AssistantState::Error;
                        tracing::error!(
                            error = %e,
                            errors = self.error_count,
                            "error in main loop"
                        );
                        self.options.error_delay
                    }
                },
            };

            if self.check_error_budget() {
                tracing::error!(errors = self.error_count, "too many errors, stopping assistant");
                self.speak(SHUTDOWN_REPLY).await;
                self.should_stop = true;
            }

            if self.listener.is_closed() {
                tracing::info!("input closed");
                self.should_stop = true;
            }

            if !self.should_stop {
                tokio::select! {
                    () = &mut shutdown => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        // Flush announcements for tasks that fired during the last command
        self.announce_fired().await;
        self.cleanup();
    }

    /// Stop the scheduler and persist state
    pub fn cleanup(&mut self) {
        self.tasks.stop_scheduler();
        if let Err(e) = self.state.save() {
            tracing::error!(error = %e, "cleanup failed to save state");
        }
        self.current = AssistantState::Idle;
        tracing::info!("assistant cleanup completed");
    }
}
