//! Wake word detection
//!
//! Wake words are matched against transcripts returned by the STT bridge.

/// Wake words used when none are configured
pub const DEFAULT_WAKE_WORDS: &[&str] = &["assistant", "hey assistant", "ok assistant"];

/// Detects wake words in transcribed speech
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_words: Vec<String>,
}

impl Default for WakeWordDetector {
    fn default() -> Self {
        Self::new(DEFAULT_WAKE_WORDS.iter().map(ToString::to_string))
    }
}

impl WakeWordDetector {
    /// Create a new wake word detector
    ///
    /// Words are lowercased and trimmed; empty entries are dropped. Longer
    /// phrases are tried first so "hey assistant" wins over "assistant".
    pub fn new<I, S>(wake_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = wake_words
            .into_iter()
            .map(|w| w.as_ref().trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        normalized.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        normalized.dedup();

        tracing::debug!(wake_words = ?normalized, "wake word detector initialized");

        Self {
            wake_words: normalized,
        }
    }

    /// Return the wake word contained in the transcript, if any
    #[must_use]
    pub fn matches(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();

        let found = self
            .wake_words
            .iter()
            .find(|w| normalized.contains(w.as_str()))
            .map(String::as_str);

        if let Some(wake_word) = found {
            tracing::info!(wake_word, transcript, "wake word detected");
        }
        found
    }

    /// Get the configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }
}

/// Extract command after wake word
#[must_use]
pub fn extract_command(transcript: &str, wake_word: &str) -> String {
    let lower = transcript.to_lowercase();
    let wake_lower = wake_word.to_lowercase();

    lower.find(&wake_lower).map_or_else(
        || transcript.to_string(),
        |pos| {
            // Lowercasing can change byte offsets for non-ASCII text
            let end = pos + wake_lower.len();
            transcript
                .get(end..)
                .unwrap_or_default()
                .trim_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
                .to_string()
        },
    )
}
