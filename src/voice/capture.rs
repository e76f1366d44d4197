//! Audio capture from microphone

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::VoiceActivityDetector;
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Polling interval while recording an utterance
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum number of chunks before silence may end a recording
const MIN_CHUNKS: usize = 10;

/// Captures audio from the default input device
pub struct AudioCapture {
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl AudioCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Start capturing audio
    ///
    /// # Errors
    ///
    /// Returns error if capture fails
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = Arc::clone(&self.buffer);
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device".to_string()))?;

        let stream = device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    /// Stop capturing audio
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    /// Get captured audio buffer and clear it
    #[must_use]
    pub fn take_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }

    /// Get captured audio buffer without clearing
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Clear the audio buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Get the sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Record one utterance, stopping on trailing silence or timeout
    ///
    /// The input stream is open only while recording. Returns `None` when no
    /// speech was heard before the timeout.
    ///
    /// # Errors
    ///
    /// Returns error if the input stream cannot be started
    #[allow(clippy::future_not_send)]
    pub async fn record_utterance(
        &mut self,
        vad: VoiceActivityDetector,
        silence: Duration,
        timeout: Duration,
    ) -> Result<Option<Vec<f32>>> {
        self.start()?;
        self.clear_buffer();

        let mut recorder = UtteranceRecorder::new(vad, silence);
        let started = Instant::now();
        tracing::info!("recording started - speak now...");

        while started.elapsed() < timeout {
            tokio::time::sleep(POLL_INTERVAL).await;

            let chunk = self.take_buffer();
            if chunk.is_empty() {
                continue;
            }

            if recorder.push(&chunk) {
                tracing::info!("silence detected - stopping recording");
                break;
            }
        }

        self.stop();
        self.clear_buffer();
        Ok(recorder.finish())
    }
}

/// Accumulates chunks and decides when an utterance has ended
///
/// Silence is counted in samples so the decision does not depend on
/// wall-clock jitter of the polling loop.
#[derive(Debug)]
pub struct UtteranceRecorder {
    vad: VoiceActivityDetector,
    silence_limit: usize,
    samples: Vec<f32>,
    chunks: usize,
    silence_samples: usize,
    heard_speech: bool,
}

impl UtteranceRecorder {
    /// Create a recorder that ends after `silence` of trailing quiet
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn new(vad: VoiceActivityDetector, silence: Duration) -> Self {
        let silence_limit = (silence.as_secs_f64() * f64::from(SAMPLE_RATE)) as usize;
        Self {
            vad,
            silence_limit,
            samples: Vec::new(),
            chunks: 0,
            silence_samples: 0,
            heard_speech: false,
        }
    }

    /// Add a chunk; returns true once the utterance is complete
    pub fn push(&mut self, chunk: &[f32]) -> bool {
        self.samples.extend_from_slice(chunk);
        self.chunks += 1;

        if self.vad.is_speech(chunk) {
            self.heard_speech = true;
            self.silence_samples = 0;
            return false;
        }

        self.silence_samples += chunk.len();
        self.silence_samples > self.silence_limit && self.chunks > MIN_CHUNKS
    }

    /// Whether any chunk contained speech
    #[must_use]
    pub const fn heard_speech(&self) -> bool {
        self.heard_speech
    }

    /// Consume the recorder, returning samples if speech was heard
    #[must_use]
    pub fn finish(self) -> Option<Vec<f32>> {
        (self.heard_speech && !self.samples.is_empty()).then_some(self.samples)
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    write_wav(&mut cursor, samples, sample_rate)?;
    Ok(cursor.into_inner())
}

/// Encode f32 samples as 16-bit mono WAV into any seekable writer
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn write_wav<W>(writer: W, samples: &[f32], sample_rate: u32) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::new(writer, spec).map_err(|e| Error::Audio(e.to_string()))?;

    for &sample in samples {
        // Convert f32 [-1.0, 1.0] to i16
        #[allow(clippy::cast_possible_truncation)]
        let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer
            .write_sample(sample_i16)
            .map_err(|e| Error::Audio(e.to_string()))?;
    }

    writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(())
}
