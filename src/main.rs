use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};

use voice_assistant::llm::{GeminiClient, RetryPolicy, WeatherClient};
use voice_assistant::voice::{
    AudioCapture, AudioPlayback, ConsoleSpeaker, Listener, MicrophoneListener,
    RecordingSettings, Speaker, SpeechToText, StdinListener, TextToSpeech, VoiceOutput,
    WakeWordDetector, rms,
};
use voice_assistant::{Assistant, AssistantOptions, Config, StateManager, TaskManager, logging};

/// Voice assistant with timers, reminders, notes and Gemini-powered answers
#[derive(Parser)]
#[command(name = "assistant", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Read commands from stdin and print replies instead of using audio
    #[arg(long, env = "ASSISTANT_TEXT_MODE", global = true)]
    text: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the assistant (default)
    Run,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// List persisted tasks
    Tasks {
        /// Include completed tasks
        #[arg(short, long)]
        all: bool,
    },
    /// Look up the current weather for a city
    Weather {
        /// City name
        city: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(cli.verbose, Some(&config.log_dir)) {
        eprintln!("{e}");
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_assistant(config, cli.text).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::Tasks { all } => list_tasks(&config, all),
        Command::Weather { city } => weather(&config, &city).await,
    }
}

/// Start the assistant with microphone and speakers, or stdin and stdout
#[allow(clippy::future_not_send)]
async fn run_assistant(config: Config, text_mode: bool) -> anyhow::Result<()> {
    config.require_run_keys()?;

    let weather = WeatherClient::new(config.api_keys.openweather.clone());
    let gemini_key = config
        .api_keys
        .gemini
        .clone()
        .context("GEMINI_API_KEY not set")?;
    let responder = GeminiClient::new(gemini_key, config.llm.model.clone())?
        .with_weather(weather)
        .with_retry_policy(RetryPolicy {
            max_retries: config.errors.max_retries,
            base_delay: config.errors.retry_delay,
            ..RetryPolicy::default()
        });

    tracing::info!(
        model = %config.llm.model,
        wake_words = ?config.wake_words,
        text_mode,
        "starting voice assistant"
    );

    if text_mode {
        println!(
            "Type a wake word (e.g. \"{}\") followed by your request.",
            config.wake_words.first().map_or("assistant", String::as_str)
        );
        return drive(StdinListener::new(), ConsoleSpeaker, responder, &config).await;
    }

    let stt_key = config
        .stt_key()
        .cloned()
        .with_context(|| format!("no API key for {:?} speech-to-text", config.voice.stt_provider))?;
    let stt = SpeechToText::new(config.voice.stt_provider, stt_key, config.voice.stt_model.clone())?
        .with_language(config.voice.language.clone());

    let settings = RecordingSettings {
        silence_threshold: config.audio.silence_threshold,
        silence_duration: config.audio.silence_duration,
    };
    let listener = MicrophoneListener::new(AudioCapture::new()?, stt, settings);

    let speaker = voice_output(&config)?;
    drive(listener, speaker, responder, &config).await
}

#[allow(clippy::future_not_send)]
async fn drive<L, S>(
    listener: L,
    speaker: S,
    responder: GeminiClient,
    config: &Config,
) -> anyhow::Result<()>
where
    L: Listener,
    S: Speaker,
{
    let state = Arc::new(StateManager::open(config.state_path()));
    let tasks = TaskManager::new(Arc::clone(&state));

    let options = AssistantOptions {
        max_errors: config.errors.max_errors,
        wake_word_timeout: config.audio.wake_word_timeout,
        command_timeout: config.audio.command_timeout,
        alarm_path: config.alarm_path.clone(),
        ..AssistantOptions::default()
    };

    let mut assistant = Assistant::new(
        listener,
        speaker,
        responder,
        state,
        tasks,
        WakeWordDetector::new(&config.wake_words),
        options,
    );
    assistant.run().await;

    if assistant.error_count() >= config.errors.max_errors {
        anyhow::bail!("stopped after {} consecutive errors", assistant.error_count());
    }
    Ok(())
}

fn voice_output(config: &Config) -> anyhow::Result<VoiceOutput> {
    let key = config
        .tts_key()
        .cloned()
        .with_context(|| format!("no API key for {:?} text-to-speech", config.voice.tts_provider))?;

    let mut tts = TextToSpeech::new(config.voice.tts_provider, key, config.voice.tts.clone())?;
    if let Some(model) = &config.voice.tts_model {
        tts = tts.with_model(model.clone());
    }
    Ok(VoiceOutput::new(tts)?)
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    println!("Sample rate: {} Hz", capture.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.take_buffer();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} ({:>6.0} on 16-bit scale) | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            energy * f32::from(i16::MAX),
            peak,
            meter
        );
    }

    capture.stop();

    println!("\n---");
    println!("Speech should read well above the silence threshold (default 1000).");
    println!("If RMS stayed near 0, check that the mic is connected and not muted.");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut playback = AudioPlayback::new()?;

    let sample_rate = voice_assistant::voice::PLAYBACK_SAMPLE_RATE;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());
    playback.play(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Speak a line through the configured TTS provider
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let mut output = voice_output(config)?;
    output.speak(text).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}

/// Print the persisted task table
fn list_tasks(config: &Config, all: bool) -> anyhow::Result<()> {
    let state = Arc::new(StateManager::open(config.state_path()));
    let tasks = TaskManager::new(state);

    let listed = if all { tasks.tasks() } else { tasks.active_tasks() };
    if listed.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    let now = Local::now();
    for task in listed {
        let when = task.scheduled_time.map_or_else(
            || "-".to_string(),
            |at| {
                let marker = if at <= now && !task.completed { " (overdue)" } else { "" };
                format!("{}{marker}", at.format("%Y-%m-%d %H:%M:%S"))
            },
        );
        let status = if task.completed { "done" } else { "pending" };
        println!(
            "{:<38} {:<9} {:<8} {:<30} {}",
            task.id,
            task.task_type.as_str(),
            status,
            when,
            task.content
        );
    }

    Ok(())
}

/// Print the weather report for a city
async fn weather(config: &Config, city: &str) -> anyhow::Result<()> {
    let client = WeatherClient::new(config.api_keys.openweather.clone());
    println!("{}", client.report(city).await);
    Ok(())
}
