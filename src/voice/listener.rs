//! Sources of spoken (or typed) user input

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use super::{AudioCapture, SAMPLE_RATE, Transcriber, VoiceActivityDetector};
use crate::Result;

/// Produces one utterance of user text per call
#[async_trait(?Send)]
pub trait Listener {
    /// Wait up to `timeout` for an utterance
    ///
    /// Returns `Ok(None)` when nothing intelligible was heard.
    async fn listen(&mut self, timeout: Duration) -> Result<Option<String>>;

    /// Whether the input source is exhausted
    fn is_closed(&self) -> bool {
        false
    }
}

/// Recording parameters for the microphone listener
#[derive(Debug, Clone, Copy)]
pub struct RecordingSettings {
    /// Silence threshold on the 16-bit PCM scale
    pub silence_threshold: f32,
    /// Trailing silence that ends an utterance
    pub silence_duration: Duration,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            silence_threshold: super::vad::DEFAULT_THRESHOLD_I16,
            silence_duration: Duration::from_secs_f32(1.5),
        }
    }
}

/// Microphone capture followed by cloud transcription
pub struct MicrophoneListener<T> {
    capture: AudioCapture,
    vad: VoiceActivityDetector,
    settings: RecordingSettings,
    transcriber: T,
}

impl<T: Transcriber> MicrophoneListener<T> {
    /// Create a listener over an opened capture device
    #[must_use]
    pub fn new(capture: AudioCapture, transcriber: T, settings: RecordingSettings) -> Self {
        Self {
            capture,
            vad: VoiceActivityDetector::from_i16_threshold(settings.silence_threshold),
            settings,
            transcriber,
        }
    }
}

#[async_trait(?Send)]
impl<T: Transcriber> Listener for MicrophoneListener<T> {
    async fn listen(&mut self, timeout: Duration) -> Result<Option<String>> {
        let recorded = self
            .capture
            .record_utterance(self.vad, self.settings.silence_duration, timeout)
            .await?;

        let Some(samples) = recorded else {
            return Ok(None);
        };

        tracing::debug!(samples = samples.len(), "utterance captured");
        self.transcriber.transcribe(&samples, SAMPLE_RATE).await
    }
}

impl<T> Drop for MicrophoneListener<T> {
    fn drop(&mut self) {
        self.capture.stop();
    }
}

/// Reads typed lines from stdin, for use without audio hardware
pub struct StdinListener {
    lines: Lines<BufReader<Stdin>>,
    closed: bool,
}

impl Default for StdinListener {
    fn default() -> Self {
        Self::new()
    }
}

impl StdinListener {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            closed: false,
        }
    }
}

#[async_trait(?Send)]
impl Listener for StdinListener {
    async fn listen(&mut self, timeout: Duration) -> Result<Option<String>> {
        if self.closed {
            return Ok(None);
        }

        match tokio::time::timeout(timeout, self.lines.next_line()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(Some(line))) => Ok(super::normalize_transcript(&line)),
            Ok(Ok(None)) => {
                tracing::info!("stdin closed");
                self.closed = true;
                Ok(None)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
