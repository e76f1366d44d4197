//! Shared test utilities

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use voice_assistant::llm::Responder;
use voice_assistant::voice::{Listener, SAMPLE_RATE, Speaker};
use voice_assistant::{Error, Result, StateManager};

/// Open a state store in a fresh temporary directory
#[must_use]
pub fn temp_state() -> (tempfile::TempDir, Arc<StateManager>) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let state = Arc::new(StateManager::open(dir.path().join("assistant_state.json")));
    (dir, state)
}

/// Generate sine wave audio samples
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn sine(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn silence(duration_secs: f32) -> Vec<f32> {
    vec![0.0; (SAMPLE_RATE as f32 * duration_secs) as usize]
}

/// Listener that replays a fixed script, then reports closed
#[derive(Default)]
pub struct ScriptedListener {
    script: VecDeque<Result<Option<String>>>,
    closed: bool,
}

impl ScriptedListener {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: lines.into_iter().map(|l| Ok(Some(l.into()))).collect(),
            closed: false,
        }
    }

    /// Queue a capture failure
    #[must_use]
    pub fn then_error(mut self, message: &str) -> Self {
        self.script.push_back(Err(Error::Stt(message.to_string())));
        self
    }

    /// Queue a capture that heard nothing
    #[must_use]
    pub fn then_nothing(mut self) -> Self {
        self.script.push_back(Ok(None));
        self
    }

    /// Queue a spoken line
    #[must_use]
    pub fn then(mut self, line: &str) -> Self {
        self.script.push_back(Ok(Some(line.to_string())));
        self
    }
}

#[async_trait(?Send)]
impl Listener for ScriptedListener {
    async fn listen(&mut self, _timeout: Duration) -> Result<Option<String>> {
        match self.script.pop_front() {
            Some(next) => next,
            None => {
                self.closed = true;
                Ok(None)
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Speaker that records everything it is asked to say
#[derive(Clone, Default)]
pub struct RecordingSpeaker {
    spoken: Rc<RefCell<Vec<String>>>,
    sounds: Rc<RefCell<Vec<PathBuf>>>,
}

impl RecordingSpeaker {
    #[must_use]
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.borrow().clone()
    }

    #[must_use]
    pub fn sounds(&self) -> Vec<PathBuf> {
        self.sounds.borrow().clone()
    }
}

#[async_trait(?Send)]
impl Speaker for RecordingSpeaker {
    async fn speak(&mut self, text: &str) -> Result<()> {
        self.spoken.borrow_mut().push(text.to_string());
        Ok(())
    }

    async fn play_sound(&mut self, path: &Path) -> Result<()> {
        self.sounds.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

/// Responder with canned replies; `None` means fail
#[derive(Clone, Default)]
pub struct ScriptedResponder {
    replies: Arc<Mutex<VecDeque<Option<String>>>>,
    fallback: Option<String>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedResponder {
    /// Reply with the same text every time
    #[must_use]
    pub fn always(reply: &str) -> Self {
        Self {
            fallback: Some(reply.to_string()),
            ..Self::default()
        }
    }

    /// Fail every request
    #[must_use]
    pub fn failing() -> Self {
        Self::default()
    }

    /// Queue a one-off outcome ahead of the default
    #[must_use]
    pub fn then(self, reply: Option<&str>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(reply.map(ToString::to_string));
        self
    }

    /// Every `(message, context)` pair received
    #[must_use]
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn generate_response(&self, message: &str, context: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((message.to_string(), context.to_string()));

        let next = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        next.ok_or_else(|| Error::Llm("scripted failure".to_string()))
    }
}

/// A request seen by [`MockHttp`]
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// Request line and headers
    pub head: String,
    pub body: String,
}

/// Minimal HTTP/1.1 server answering with canned `(status, body)` pairs
///
/// The last response repeats once the queue is exhausted.
pub struct MockHttp {
    pub url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<SeenRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockHttp {
    pub async fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let url = format!("http://{}", listener.local_addr().unwrap());

        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let queue = Arc::new(Mutex::new(VecDeque::from(responses)));

        let handle = {
            let hits = Arc::clone(&hits);
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((mut stream, _)) = listener.accept().await {
                    let Ok(seen) = read_request(&mut stream).await else {
                        continue;
                    };
                    hits.fetch_add(1, Ordering::SeqCst);
                    requests.lock().unwrap().push(seen);

                    let (status, body) = {
                        let mut queue = queue.lock().unwrap();
                        if queue.len() > 1 {
                            queue.pop_front().unwrap()
                        } else {
                            queue.front().cloned().unwrap_or((500, String::new()))
                        }
                    };

                    let response = format!(
                        "HTTP/1.1 {status} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                }
            })
        };

        Self {
            url,
            hits,
            requests,
            handle,
        }
    }

    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttp {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(SeenRequest {
        head,
        body: String::from_utf8_lossy(&buf[body_start..]).to_string(),
    })
}
