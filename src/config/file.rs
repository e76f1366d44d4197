//! TOML configuration file loading
//!
//! Supports `~/.config/voice-assistant/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    /// Words that wake the assistant
    #[serde(default)]
    pub wake_words: Option<Vec<String>>,

    /// Directory for state and logs
    #[serde(default)]
    pub data_dir: Option<String>,

    /// WAV file played when a timer finishes
    #[serde(default)]
    pub alarm_sound: Option<String>,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub audio: AudioFileConfig,

    #[serde(default)]
    pub errors: ErrorsFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Language model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Gemini model (e.g. "gemini-2.0-flash")
    pub model: Option<String>,
}

/// Speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "nova")
    pub tts_voice: Option<String>,

    /// Speaking rate in words per minute
    pub tts_rate: Option<u32>,

    /// Output volume, 0.0 to 1.0
    pub tts_volume: Option<f32>,

    /// Spoken language hint (ISO 639-1)
    pub language: Option<String>,
}

/// Recording configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// Silence threshold on the 16-bit PCM scale
    pub silence_threshold: Option<f32>,

    /// Seconds of silence that end an utterance
    pub silence_duration: Option<f32>,

    /// Seconds to wait for a wake word
    pub wake_word_timeout: Option<f32>,

    /// Seconds to wait for a command
    pub command_timeout: Option<f32>,
}

/// Error budget configuration
#[derive(Debug, Default, Deserialize)]
pub struct ErrorsFileConfig {
    pub max_errors: Option<u32>,
    pub max_retries: Option<u32>,
    /// Seconds between LLM retries
    pub retry_delay: Option<f32>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
    pub openweather: Option<String>,
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ConfigFile {
    config_file_path().map_or_else(ConfigFile::default, |path| load_from(&path))
}

/// Load a TOML config file, falling back to defaults
pub fn load_from(path: &Path) -> ConfigFile {
    if !path.exists() {
        return ConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                ConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-assistant/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-assistant").join("config.toml"))
}
