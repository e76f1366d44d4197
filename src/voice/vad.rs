//! Voice activity detection
//!
//! Frame-energy detector: a chunk is considered speech when any 20 ms frame
//! rises above the RMS threshold.

use super::SAMPLE_RATE;

/// Default silence threshold on the 16-bit PCM scale
pub const DEFAULT_THRESHOLD_I16: f32 = 1000.0;

/// Frame length in samples (20 ms at 16kHz)
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 1000) * 20;

/// Energy-based voice activity detector
#[derive(Debug, Clone, Copy)]
pub struct VoiceActivityDetector {
    threshold: f32,
    frame_len: usize,
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::from_i16_threshold(DEFAULT_THRESHOLD_I16)
    }
}

impl VoiceActivityDetector {
    /// Create a detector with a threshold on the f32 sample scale `[-1.0, 1.0]`
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self {
            threshold,
            frame_len: FRAME_SAMPLES,
        }
    }

    /// Create a detector from a threshold expressed on the i16 scale
    #[must_use]
    pub fn from_i16_threshold(threshold: f32) -> Self {
        Self::new(threshold / 32768.0)
    }

    /// Override the frame length (in samples)
    #[must_use]
    pub const fn with_frame_len(mut self, frame_len: usize) -> Self {
        self.frame_len = frame_len;
        self
    }

    /// Threshold on the f32 scale
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Check whether a chunk of samples contains voice
    #[must_use]
    pub fn is_speech(&self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return false;
        }

        if self.frame_len == 0 || samples.len() < self.frame_len {
            return rms(samples) > self.threshold;
        }

        samples
            .chunks_exact(self.frame_len)
            .any(|frame| rms(frame) > self.threshold)
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
