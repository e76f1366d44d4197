//! Voice processing module
//!
//! Handles audio capture, voice activity detection, wake words, the cloud
//! STT/TTS bridges, and playback.

mod capture;
mod listener;
mod playback;
mod stt;
mod tts;
mod vad;
mod wake_word;

pub use capture::{AudioCapture, SAMPLE_RATE, UtteranceRecorder, samples_to_wav, write_wav};
pub use listener::{Listener, MicrophoneListener, RecordingSettings, StdinListener};
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE, decode_wav, decode_wav_file, resample};
pub use stt::{SpeechToText, SttProvider, Transcriber, normalize_transcript};
pub use tts::{
    CloudVoice, ConsoleSpeaker, SpeechBackend, Speaker, TextToSpeech, TtsProvider, TtsSettings,
    VoiceOutput,
};
pub use vad::{VoiceActivityDetector, rms};
pub use wake_word::{DEFAULT_WAKE_WORDS, WakeWordDetector, extract_command};
