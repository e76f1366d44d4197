//! Audio playback to speakers

use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Resampler input chunk size
const RESAMPLE_CHUNK: usize = 1024;

/// Plays audio to the default output device
pub struct AudioPlayback {
    config: StreamConfig,
    volume: f32,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            config,
            volume: 1.0,
        })
    }

    /// Set output gain (0.0 to 1.0)
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    /// Current output gain
    #[must_use]
    pub const fn volume(&self) -> f32 {
        self.volume
    }

    /// Play audio samples at the playback rate
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play(&mut self, samples: Vec<f32>) -> Result<()> {
        self.play_blocking(samples).await
    }

    /// Play audio from MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_mp3(&mut self, mp3_data: &[u8]) -> Result<()> {
        let (samples, rate) = decode_mp3(mp3_data)?;
        let samples = resample(samples, rate, PLAYBACK_SAMPLE_RATE)?;
        self.play_blocking(samples).await
    }

    /// Play a WAV file from disk
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be decoded or played
    pub async fn play_wav_file(&mut self, path: &Path) -> Result<()> {
        let (samples, rate) = decode_wav_file(path)?;
        let samples = resample(samples, rate, PLAYBACK_SAMPLE_RATE)?;
        tracing::debug!(path = %path.display(), "playing wav file");
        self.play_blocking(samples).await
    }

    /// Run the blocking playback on the blocking pool
    async fn play_blocking(&self, mut samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        if (self.volume - 1.0).abs() > f32::EPSILON {
            for s in &mut samples {
                *s *= self.volume;
            }
        }

        let config = self.config.clone();
        tokio::task::spawn_blocking(move || play_samples_blocking(&config, samples))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Play samples in a blocking manner
fn play_samples_blocking(config: &StreamConfig, samples: Vec<f32>) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let channels = usize::from(config.channels);
    let sample_count = samples.len();

    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let samples_cb = Arc::clone(&samples);
    let position_cb = Arc::clone(&position);
    let finished_cb = Arc::clone(&finished);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut pos = position_cb.load(Ordering::Relaxed);

                for frame in data.chunks_mut(channels) {
                    let sample = samples_cb.get(pos).copied().unwrap_or_else(|| {
                        finished_cb.store(true, Ordering::Relaxed);
                        0.0
                    });

                    frame.fill(sample);

                    if pos < samples_cb.len() {
                        pos += 1;
                    }
                }

                position_cb.store(pos, Ordering::Relaxed);
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);

    // Poll for completion with timeout
    let start = Instant::now();
    let timeout = Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Relaxed) {
        if start.elapsed() > timeout {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Small delay to ensure audio finishes
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}

/// Decode MP3 bytes to mono f32 samples, returning the source rate
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if let Ok(hz) = u32::try_from(frame.sample_rate) {
                    rate = hz;
                }
                let as_f32: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&as_f32, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, rate))
}

/// Decode a WAV file to mono f32 samples, returning the source rate
///
/// # Errors
///
/// Returns error if the file is missing or uses an unsupported format
pub fn decode_wav_file(path: &Path) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::open(path).map_err(|e| Error::Audio(e.to_string()))?;
    decode_wav(reader)
}

/// Decode WAV from any reader
///
/// # Errors
///
/// Returns error on unsupported sample formats or corrupt data
#[allow(clippy::cast_precision_loss)]
pub fn decode_wav<R: std::io::Read>(reader: hound::WavReader<R>) -> Result<(Vec<f32>, u32)> {
    let spec = reader.spec();

    let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        (hound::SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = (1_i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
        (format, bits) => {
            return Err(Error::Audio(format!(
                "unsupported WAV format: {format:?} {bits}-bit"
            )));
        }
    };

    Ok((downmix(&interleaved, usize::from(spec.channels)), spec.sample_rate))
}

/// Average interleaved channels down to mono
#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample mono audio between rates
///
/// # Errors
///
/// Returns error if the resampler cannot be constructed or fails
pub fn resample(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples);
    }

    let ratio = f64::from(to) / f64::from(from);
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, RESAMPLE_CHUNK, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + RESAMPLE_CHUNK);
    let mut input = samples.as_slice();

    while input.len() >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let (chunk, rest) = input.split_at(needed);
        let frame: [&[f32]; 1] = [chunk];
        let out = resampler
            .process(&frame[..], None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&out[0]);
        input = rest;
    }

    if !input.is_empty() {
        let tail: [&[f32]; 1] = [input];
        let out = resampler
            .process_partial(Some(&tail[..]), None)
            .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?;
        output.extend_from_slice(&out[0]);
    }

    Ok(output)
}
