//! Text-to-speech (TTS) processing

use std::path::Path;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::AudioPlayback;
use crate::{Error, Result};

/// Speaking rate the provider's 1.0 speed corresponds to (words per minute)
pub const BASE_RATE_WPM: u32 = 175;

/// Speaks text back to the user
#[async_trait(?Send)]
pub trait Speaker {
    /// Speak a line of text, blocking until playback completes
    async fn speak(&mut self, text: &str) -> Result<()>;

    /// Play a sound file such as the timer alarm
    async fn play_sound(&mut self, path: &Path) -> Result<()> {
        tracing::debug!(path = %path.display(), "sound playback not supported");
        Ok(())
    }
}

/// Voice configuration shared by TTS providers
#[derive(Debug, Clone, PartialEq)]
pub struct TtsSettings {
    /// Provider voice identifier
    pub voice: String,
    /// Speaking rate in words per minute
    pub rate_wpm: u32,
    /// Output volume (0.0 to 1.0)
    pub volume: f32,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            voice: "nova".to_string(),
            rate_wpm: BASE_RATE_WPM,
            volume: 0.9,
        }
    }
}

impl TtsSettings {
    /// Provider speed multiplier derived from the rate
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn speed(&self) -> f32 {
        (self.rate_wpm as f32 / BASE_RATE_WPM as f32).clamp(0.25, 4.0)
    }
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    /// Parse a provider name, defaulting to `OpenAI`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("elevenlabs") {
            Self::ElevenLabs
        } else {
            Self::OpenAI
        }
    }

    const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_monolingual_v1",
        }
    }
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    settings: TtsSettings,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(
        provider: TtsProvider,
        api_key: SecretString,
        settings: TtsSettings,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(format!("{provider:?} API key required for TTS")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            settings,
            model: provider.default_model().to_string(),
            provider,
        })
    }

    /// Override the provider model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Voice settings in use
    #[must_use]
    pub const fn settings(&self) -> &TtsSettings {
        &self.settings
    }

    /// Drop pooled connections and start from a fresh HTTP client
    pub fn reset_client(&mut self) {
        self.client = reqwest::Client::new();
    }

    /// Synthesize text to speech
    ///
    /// Returns audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text).await,
        }
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.settings.voice,
            speed: self.settings.speed(),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
            speed: f32,
        }

        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            voice_settings: VoiceSettings,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.settings.voice
        );

        // ElevenLabs accepts a narrower speed range than OpenAI
        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
                speed: self.settings.speed().clamp(0.7, 1.2),
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("ElevenLabs TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

/// Turns text into audible speech
///
/// Implemented by [`CloudVoice`]; [`VoiceOutput`] adds recovery on top.
#[async_trait(?Send)]
pub trait SpeechBackend {
    /// Synthesize and play one line
    async fn render(&mut self, text: &str) -> Result<()>;

    /// Rebuild connections and devices after a failure
    fn reset(&mut self) -> Result<()>;

    /// Play a WAV file through the same output
    async fn play_file(&mut self, path: &Path) -> Result<()>;
}

/// Cloud TTS played through the default speaker
pub struct CloudVoice {
    tts: TextToSpeech,
    playback: Option<AudioPlayback>,
}

impl CloudVoice {
    /// Open the default speaker for the given synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn new(tts: TextToSpeech) -> Result<Self> {
        let mut voice = Self {
            tts,
            playback: None,
        };
        voice.reset()?;
        Ok(voice)
    }

    fn playback(&mut self) -> Result<&mut AudioPlayback> {
        self.playback
            .as_mut()
            .ok_or_else(|| Error::Audio("output device not initialized".to_string()))
    }
}

#[async_trait(?Send)]
impl SpeechBackend for CloudVoice {
    async fn render(&mut self, text: &str) -> Result<()> {
        let audio = self.tts.synthesize(text).await?;
        self.playback()?.play_mp3(&audio).await
    }

    fn reset(&mut self) -> Result<()> {
        self.tts.reset_client();
        let mut playback = AudioPlayback::new()?;
        playback.set_volume(self.tts.settings().volume);
        self.playback = Some(playback);
        Ok(())
    }

    async fn play_file(&mut self, path: &Path) -> Result<()> {
        self.playback()?.play_wav_file(path).await
    }
}

/// Speaker backed by a [`SpeechBackend`]
///
/// A failed line resets the backend and is retried once. A second failure
/// is reported as [`Error::Tts`].
pub struct VoiceOutput<B = CloudVoice> {
    backend: B,
}

impl VoiceOutput {
    /// Cloud TTS through the default speaker
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn new(tts: TextToSpeech) -> Result<Self> {
        Ok(Self::with_backend(CloudVoice::new(tts)?))
    }
}

impl<B: SpeechBackend> VoiceOutput<B> {
    #[must_use]
    pub const fn with_backend(backend: B) -> Self {
        Self { backend }
    }

    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    async fn recover(&mut self, text: &str) -> Result<()> {
        self.backend.reset()?;
        self.backend.render(text).await
    }
}

#[async_trait(?Send)]
impl<B: SpeechBackend> Speaker for VoiceOutput<B> {
    async fn speak(&mut self, text: &str) -> Result<()> {
        tracing::info!("Assistant: {text}");

        if text.trim().is_empty() {
            return Ok(());
        }

        let Err(e) = self.backend.render(text).await else {
            return Ok(());
        };
        tracing::warn!(error = %e, "TTS failed, reinitializing");

        self.recover(text).await.map_err(|e| {
            tracing::error!(error = %e, "TTS recovery failed");
            Error::Tts(format!("speech failed after retry: {e}"))
        })
    }

    async fn play_sound(&mut self, path: &Path) -> Result<()> {
        self.backend.play_file(path).await
    }
}

/// Prints replies to stdout instead of speaking them
#[derive(Debug, Default)]
pub struct ConsoleSpeaker;

#[async_trait(?Send)]
impl Speaker for ConsoleSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        tracing::info!("Assistant: {text}");
        println!("{text}");
        Ok(())
    }
}
