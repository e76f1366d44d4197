//! Configuration management for the voice assistant
//!
//! Values are layered: environment variables override the TOML file,
//! which overrides built-in defaults. A `.env` file in the working
//! directory is loaded into the environment first.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::voice::{DEFAULT_WAKE_WORDS, SttProvider, TtsProvider, TtsSettings};
use crate::{Error, Result};

use file::ConfigFile;

/// Voice assistant configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the state file
    pub data_dir: PathBuf,

    /// Directory for rolling log files
    pub log_dir: PathBuf,

    /// Words that wake the assistant
    pub wake_words: Vec<String>,

    /// WAV file played when a timer finishes
    pub alarm_path: Option<PathBuf>,

    pub api_keys: ApiKeys,
    pub llm: LlmConfig,
    pub voice: VoiceConfig,
    pub audio: AudioConfig,
    pub errors: ErrorConfig,
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub gemini: Option<SecretString>,
    pub openweather: Option<SecretString>,
    /// Used for Whisper STT and `OpenAI` TTS
    pub openai: Option<SecretString>,
    pub deepgram: Option<SecretString>,
    pub elevenlabs: Option<SecretString>,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub model: String,
}

/// Speech recognition and synthesis configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub stt_provider: SttProvider,
    pub stt_model: String,
    pub tts_provider: TtsProvider,
    pub tts_model: Option<String>,
    pub tts: TtsSettings,
    /// Spoken language hint (ISO 639-1)
    pub language: String,
}

/// Recording configuration
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    /// Silence threshold on the 16-bit PCM scale
    pub silence_threshold: f32,
    /// Trailing silence that ends an utterance
    pub silence_duration: Duration,
    pub wake_word_timeout: Duration,
    /// Also the longest command recording
    pub command_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 1000.0,
            silence_duration: Duration::from_millis(1500),
            wake_word_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(10),
        }
    }
}

/// Error budget and retry configuration
#[derive(Debug, Clone, Copy)]
pub struct ErrorConfig {
    /// Consecutive failures before the assistant shuts down
    pub max_errors: u32,
    /// LLM attempts per command
    pub max_retries: u32,
    /// Backoff step between LLM attempts
    pub retry_delay: Duration,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            max_errors: 5,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

fn secret(value: Option<String>) -> Option<SecretString> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

fn seconds(value: Option<f32>) -> Option<Duration> {
    value.and_then(|s| Duration::try_from_secs_f32(s).ok())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".voice-assistant"),
        |d| d.data_dir().join("voice-assistant"),
    )
}

impl Config {
    /// Load configuration from `.env`, the environment and the config file
    ///
    /// # Errors
    ///
    /// Returns error if the data directory cannot be created
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env"),
        }

        let config = Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok());

        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            Error::Config(format!(
                "failed to create data directory {}: {e}",
                config.data_dir.display()
            ))
        })?;

        Ok(config)
    }

    /// Build configuration from a parsed file and an environment lookup
    pub fn from_sources<F>(fc: ConfigFile, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys = ApiKeys {
            gemini: secret(env("GEMINI_API_KEY").or(fc.api_keys.gemini)),
            openweather: secret(env("OPENWEATHER_API_KEY").or(fc.api_keys.openweather)),
            openai: secret(env("OPENAI_API_KEY").or(fc.api_keys.openai)),
            deepgram: secret(env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram)),
            elevenlabs: secret(env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs)),
        };

        let data_dir = env("ASSISTANT_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);
        let log_dir = data_dir.join("logs");

        let wake_words = env("ASSISTANT_WAKE_WORDS")
            .map(|s| split_list(&s))
            .or(fc.wake_words)
            .filter(|words| !words.is_empty())
            .unwrap_or_else(|| DEFAULT_WAKE_WORDS.iter().map(ToString::to_string).collect());

        let alarm_path = env("ASSISTANT_ALARM_SOUND")
            .or(fc.alarm_sound)
            .map(PathBuf::from);

        let llm = LlmConfig {
            model: env("ASSISTANT_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or_else(|| crate::llm::DEFAULT_MODEL.to_string()),
        };

        let stt_provider = env("ASSISTANT_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .map_or(SttProvider::Whisper, |name| SttProvider::from_name(&name));
        let tts_provider = env("ASSISTANT_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .map_or(TtsProvider::OpenAI, |name| TtsProvider::from_name(&name));

        let default_tts = TtsSettings::default();
        let voice = VoiceConfig {
            stt_provider,
            stt_model: env("ASSISTANT_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| match stt_provider {
                    SttProvider::Whisper => "whisper-1".to_string(),
                    SttProvider::Deepgram => "nova-2".to_string(),
                }),
            tts_provider,
            tts_model: env("ASSISTANT_TTS_MODEL").or(fc.voice.tts_model),
            tts: TtsSettings {
                voice: env("ASSISTANT_TTS_VOICE")
                    .or(fc.voice.tts_voice)
                    .unwrap_or(default_tts.voice),
                rate_wpm: env("ASSISTANT_TTS_RATE")
                    .and_then(|s| s.parse().ok())
                    .or(fc.voice.tts_rate)
                    .unwrap_or(default_tts.rate_wpm),
                volume: env("ASSISTANT_TTS_VOLUME")
                    .and_then(|s| s.parse().ok())
                    .or(fc.voice.tts_volume)
                    .map_or(default_tts.volume, |v: f32| v.clamp(0.0, 1.0)),
            },
            language: fc.voice.language.unwrap_or_else(|| "en".to_string()),
        };

        let default_audio = AudioConfig::default();
        let audio = AudioConfig {
            silence_threshold: fc
                .audio
                .silence_threshold
                .unwrap_or(default_audio.silence_threshold),
            silence_duration: seconds(fc.audio.silence_duration)
                .unwrap_or(default_audio.silence_duration),
            wake_word_timeout: seconds(fc.audio.wake_word_timeout)
                .unwrap_or(default_audio.wake_word_timeout),
            command_timeout: seconds(fc.audio.command_timeout)
                .unwrap_or(default_audio.command_timeout),
        };

        let default_errors = ErrorConfig::default();
        let errors = ErrorConfig {
            max_errors: fc.errors.max_errors.unwrap_or(default_errors.max_errors),
            max_retries: fc.errors.max_retries.unwrap_or(default_errors.max_retries),
            retry_delay: seconds(fc.errors.retry_delay).unwrap_or(default_errors.retry_delay),
        };

        Self {
            data_dir,
            log_dir,
            wake_words,
            alarm_path,
            api_keys,
            llm,
            voice,
            audio,
            errors,
        }
    }

    /// Path of the persisted state file
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join(crate::state::STATE_FILE)
    }

    /// Key for the configured speech-to-text provider
    #[must_use]
    pub const fn stt_key(&self) -> Option<&SecretString> {
        match self.voice.stt_provider {
            SttProvider::Whisper => self.api_keys.openai.as_ref(),
            SttProvider::Deepgram => self.api_keys.deepgram.as_ref(),
        }
    }

    /// Key for the configured text-to-speech provider
    #[must_use]
    pub const fn tts_key(&self) -> Option<&SecretString> {
        match self.voice.tts_provider {
            TtsProvider::OpenAI => self.api_keys.openai.as_ref(),
            TtsProvider::ElevenLabs => self.api_keys.elevenlabs.as_ref(),
        }
    }

    /// Check the keys the assistant cannot run without
    ///
    /// # Errors
    ///
    /// Returns error naming every missing key
    pub fn require_run_keys(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("GEMINI_API_KEY", self.api_keys.gemini.is_some()),
            ("OPENWEATHER_API_KEY", self.api_keys.openweather.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, present)| (!present).then_some(name))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )))
        }
    }
}
