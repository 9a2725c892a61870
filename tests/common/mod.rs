//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use vista::{
    DescriptionClient, GenerateContent, GenerateResponse, ImageSource, RetryPolicy, Result,
    Session, SessionTiming, classify_api_failure,
};

/// Smallest valid-looking JPEG header
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// What a scripted call answers with
#[derive(Debug, Clone)]
pub enum Reply {
    /// Success with these text parts in the first candidate
    Text(Vec<String>),
    /// Success with no candidates at all
    NoCandidates,
    /// Failure with an HTTP status and body
    Status(u16, String),
}

impl Reply {
    pub fn text(s: &str) -> Self {
        Self::Text(vec![s.to_string()])
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self::Status(status, body.to_string())
    }
}

/// One scripted call: wait, then reply
#[derive(Debug, Clone)]
pub struct Step {
    pub delay: Duration,
    pub reply: Reply,
}

impl Step {
    pub const fn now(reply: Reply) -> Self {
        Self {
            delay: Duration::ZERO,
            reply,
        }
    }

    pub const fn after(delay: Duration, reply: Reply) -> Self {
        Self { delay, reply }
    }
}

/// Generation backend that replays a script and records each call
///
/// When the script runs out, the last step repeats.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Step>>,
    last: Mutex<Option<Step>>,
    calls: Mutex<Vec<Call>>,
}

/// A recorded call
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub mime_type: String,
    pub image_len: usize,
    pub prompt: String,
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(reply: Reply) -> Arc<Self> {
        Self::new([Step::now(reply)])
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Gaps between consecutive calls
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls()
            .windows(2)
            .map(|w| w[1].at.duration_since(w[0].at))
            .collect()
    }

    fn next_step(&self) -> Step {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().expect("script is empty"),
        }
    }
}

#[async_trait]
impl GenerateContent for ScriptedBackend {
    async fn generate(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<GenerateResponse> {
        self.calls.lock().unwrap().push(Call {
            at: Instant::now(),
            mime_type: mime_type.to_string(),
            image_len: image.len(),
            prompt: prompt.to_string(),
        });

        let step = self.next_step();
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }

        match step.reply {
            Reply::Text(parts) => Ok(GenerateResponse::from_texts(parts)),
            Reply::NoCandidates => Ok(GenerateResponse::default()),
            Reply::Status(status, body) => Err(classify_api_failure(status, &body)),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Description client over `backend` with the default 3 attempts / 1s policy
pub fn client_for(backend: Arc<ScriptedBackend>) -> Arc<DescriptionClient> {
    Arc::new(DescriptionClient::new(
        backend,
        RetryPolicy::default(),
        "describe every detail".to_string(),
    ))
}

/// Session over `backend` with default timing
pub fn session_for(backend: Arc<ScriptedBackend>) -> Session {
    Session::new(client_for(backend), SessionTiming::default())
}

pub fn jpeg_source() -> ImageSource {
    ImageSource::from_bytes(JPEG_BYTES.to_vec(), "image/jpeg", "apple.jpg").unwrap()
}
