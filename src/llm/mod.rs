//! Language model responses
//!
//! Commands that are not handled locally go to Gemini. Weather questions
//! are answered from OpenWeatherMap without calling the model.

pub mod retry;
pub mod weather;

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub use retry::RetryPolicy;
pub use weather::WeatherClient;

use crate::state::{ConversationMessage, Role};
use crate::{Error, Result};

const GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

/// Default Gemini model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Messages from history included in each prompt
pub const CONTEXT_MESSAGES: usize = 5;

/// Chat turns kept in the live session
const MAX_SESSION_TURNS: usize = 40;

pub const SYSTEM_PROMPT: &str = "You are a helpful voice assistant with the following capabilities:
- Natural conversation and Q&A
- Setting timers and reminders
- Taking notes and managing tasks
- Looking up information
- Managing calendar events

Be conversational, concise, and helpful. When users ask for tasks:
- For timers: Extract duration and confirm
- For reminders: Extract time/date and content
- For notes: Acknowledge and confirm saving
- Always ask for clarification if something is unclear

Respond in a natural, friendly manner as if speaking aloud. Keep responses concise but informative.";

const FALLBACK_REPLIES: [&str; 3] = [
    "I'm having trouble connecting to my AI service right now. Could you please try again?",
    "I'm experiencing some technical difficulties. Let me try to help you in a moment.",
    "Sorry, I'm having connection issues. Please repeat your request.",
];

const WEATHER_KEYWORDS: &[&str] = &["weather", "temperature", "temp", "how hot", "how cold"];

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

/// Produces replies for commands the assistant does not handle locally
#[async_trait]
pub trait Responder: Send + Sync {
    /// Answer `message`, with `context` prepended when non-empty
    async fn generate_response(&self, message: &str, context: &str) -> Result<String>;
}

/// Pick a canned apology for when the model is unreachable
///
/// The same message always yields the same reply.
#[must_use]
pub fn fallback_response(message: &str) -> &'static str {
    let mut hasher = DefaultHasher::new();
    message.hash(&mut hasher);
    let index = usize::try_from(hasher.finish() % FALLBACK_REPLIES.len() as u64).unwrap_or(0);
    FALLBACK_REPLIES[index]
}

/// System prompt followed by the recent conversation
#[must_use]
pub fn build_context(recent: &[ConversationMessage]) -> String {
    if recent.is_empty() {
        return SYSTEM_PROMPT.to_string();
    }

    let mut context = format!("{SYSTEM_PROMPT}\n\nRecent conversation:\n");
    for msg in recent {
        context.push_str(msg.role.label());
        context.push_str(": ");
        context.push_str(&msg.content);
        context.push('\n');
    }
    context
}

/// City named in a weather question, if any
///
/// The question must mention weather or temperature and contain the word
/// "in" followed by another word.
#[must_use]
pub fn extract_weather_city(message: &str) -> Option<String> {
    let lower = message.to_lowercase();
    if !WEATHER_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return None;
    }

    let mut words = lower.split_whitespace();
    words.by_ref().find(|w| *w == "in")?;
    let word = words.next()?.trim_matches(|c: char| !c.is_alphanumeric());

    let mut chars = word.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

impl Content {
    fn text(role: Role, text: impl Into<String>) -> Self {
        let role = match role {
            Role::User => "user",
            Role::Model => "model",
        };
        Self {
            role: Some(role.to_string()),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: &'a [Content],
    system_instruction: Content,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Result<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if !text.trim().is_empty() {
            return Ok(text.trim().to_string());
        }

        let reason = self
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "empty response".to_string());
        Err(Error::Llm(format!("no reply from model: {reason}")))
    }
}

/// Outcome of a single attempt
enum Attempt {
    Reply(String),
    Retry(Error, Option<std::time::Duration>),
    Fatal(Error),
}

/// Gemini chat client with weather shortcut and retries
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    retry: RetryPolicy,
    weather: WeatherClient,
    session: Mutex<Vec<Content>>,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Create a client for the given model
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("Gemini API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            base_url: GEMINI_URL.to_string(),
            retry: RetryPolicy::default(),
            weather: WeatherClient::new(None),
            session: Mutex::new(Vec::new()),
        })
    }

    /// Point the client at a different API host
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Answer weather questions with this client
    #[must_use]
    pub fn with_weather(mut self, weather: WeatherClient) -> Self {
        self.weather = weather;
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Forget the chat session
    pub fn reset_session(&self) {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of turns in the chat session
    #[must_use]
    pub fn session_len(&self) -> usize {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn request_body(contents: &[Content]) -> GenerateRequest<'_> {
        GenerateRequest {
            contents,
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(SYSTEM_PROMPT.to_string()),
                }],
            },
            safety_settings: HARM_CATEGORIES
                .iter()
                .map(|&category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        }
    }

    async fn attempt(&self, prompt: &str) -> Attempt {
        let mut contents = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        contents.push(Content::text(Role::User, prompt));

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let sent = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&Self::request_body(&contents))
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if retry::is_recoverable_transport(&e) => {
                return Attempt::Retry(Error::Llm(format!("request failed: {e}")), None);
            }
            Err(e) => return Attempt::Fatal(e.into()),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Attempt::Retry(Error::Llm(format!("failed to read response: {e}")), None);
            }
        };

        if !status.is_success() {
            let err = Error::Llm(format!("Gemini API error {status}: {body}"));
            return if retry::is_recoverable(status.as_u16()) {
                Attempt::Retry(err, retry::parse_retry_after(&body))
            } else {
                Attempt::Fatal(err)
            };
        }

        let reply = match serde_json::from_str::<GenerateResponse>(&body) {
            Ok(parsed) => parsed.into_text(),
            Err(e) => Err(Error::Llm(format!("unexpected response: {e}"))),
        };

        match reply {
            Ok(text) => {
                let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
                *session = contents;
                session.push(Content::text(Role::Model, text.clone()));
                let excess = session.len().saturating_sub(MAX_SESSION_TURNS);
                session.drain(..excess);
                drop(session);
                Attempt::Reply(text)
            }
            Err(e) => Attempt::Retry(e, None),
        }
    }
}

#[async_trait]
impl Responder for GeminiClient {
    async fn generate_response(&self, message: &str, context: &str) -> Result<String> {
        if let Some(city) = extract_weather_city(message) {
            tracing::info!(city, "answering weather question");
            return Ok(self.weather.report(&city).await);
        }

        let prompt = if context.is_empty() {
            message.to_string()
        } else {
            format!("{context}\n\nUser: {message}")
        };

        let attempts = self.retry.max_retries.max(1);
        let mut last_error = Error::Llm("no attempts made".to_string());

        for attempt in 0..attempts {
            match self.attempt(&prompt).await {
                Attempt::Reply(text) => {
                    tracing::debug!(attempt, chars = text.len(), "model replied");
                    return Ok(text);
                }
                Attempt::Fatal(e) => {
                    tracing::error!(attempt = attempt + 1, error = %e, "Gemini request failed");
                    self.reset_session();
                    return Err(e);
                }
                Attempt::Retry(e, retry_after) => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Gemini request failed");
                    self.reset_session();
                    last_error = e;

                    if attempt + 1 < attempts {
                        let delay = retry::delay_for_attempt(&self.retry, attempt, retry_after);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error)
    }
}
