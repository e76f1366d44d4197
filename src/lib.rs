//! Voice Assistant - wake-word driven personal assistant
//!
//! This library provides the pieces of the assistant:
//! - Voice processing (capture, VAD, wake word, STT, TTS, playback)
//! - Local task handling (timers, reminders, notes)
//! - LLM replies via Gemini, with a weather lookup shortcut
//! - Persisted conversation history and task table
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Voice                           │
//! │   Capture → VAD → STT → Wake Word │ TTS → Playback   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Assistant                         │
//! │   Intent routing  │  Tasks  │  Error budget          │
//! └──────────┬─────────────────────────┬────────────────┘
//!            │                         │
//! ┌──────────▼──────────┐   ┌──────────▼────────────────┐
//! │   LLM (Gemini)      │   │   State (JSON on disk)    │
//! │   Weather lookup    │   │   History  │  Tasks       │
//! └─────────────────────┘   └───────────────────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod error;
pub mod intent;
pub mod llm;
pub mod logging;
pub mod state;
pub mod tasks;
pub mod voice;

pub use assistant::{Assistant, AssistantOptions, AssistantState};
pub use config::Config;
pub use error::{Error, Result};
pub use llm::{GeminiClient, Responder, WeatherClient};
pub use state::{ConversationMessage, Role, StateManager};
pub use tasks::{Task, TaskManager, TaskType};
