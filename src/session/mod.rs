//! Analysis session state machine
//!
//! A [`Session`] holds the current image, the busy flag, the simulated
//! progress, and either a result or an error:
//!
//! ```text
//!   Idle ──load──▶ Ready ──generate──▶ Analyzing ──ok──▶ Done
//!    ▲               ▲                     │
//!    │               └──────load───────────┼─────────── Done / Failed
//!    │                                     └──err──▶ Failed
//!    └──────────────── clear (from any phase) ────────────────
//! ```
//!
//! Every `generate` and `clear` bumps a request token. The progress ticker
//! and the in-flight analysis both carry the token they were started with
//! and do nothing once it is no longer current, so a late response after a
//! clear is discarded instead of overwriting newer state.

mod progress;

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::describe::DescriptionClient;
use crate::source::ImageSource;
use crate::{Error, Result};

pub use progress::{CEILING, COMPLETE, Progress, SLOW_ZONE};

/// Prefix for errors surfaced after a failed analysis
pub const FAILURE_PREFIX: &str = "Failed to generate description: ";

/// Progress ticker and result reveal timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTiming {
    /// Interval between simulated progress steps
    pub tick_interval: Duration,
    /// Pause at 100% before the result is shown
    pub reveal_delay: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(400),
            reveal_delay: Duration::from_millis(500),
        }
    }
}

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No image, no result
    Idle,
    /// Image loaded, awaiting generate
    Ready,
    /// Request in flight, progress advancing
    Analyzing,
    /// Result text available
    Done,
    /// Error text available
    Failed,
}

/// Displayable summary of the loaded image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub filename: String,
    pub mime_type: String,
    pub size: usize,
    /// `data:` URL preview, shared with the loaded image
    pub preview: Arc<str>,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub busy: bool,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Current request token
    pub token: u64,
    pub updated_at: DateTime<Utc>,
}

struct SessionState {
    phase: Phase,
    image: Option<Arc<ImageSource>>,
    progress: Progress,
    result: Option<String>,
    error: Option<String>,
    token: u64,
    ticker: Option<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            image: None,
            progress: Progress::default(),
            result: None,
            error: None,
            token: 0,
            ticker: None,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            busy: self.phase == Phase::Analyzing,
            progress: self.progress.value(),
            image: self.image.as_deref().map(|image| ImageSummary {
                filename: image.filename().to_string(),
                mime_type: image.mime_type().to_string(),
                size: image.len(),
                preview: image.shared_preview(),
            }),
            result: self.result.clone(),
            error: self.error.clone(),
            token: self.token,
            updated_at: Utc::now(),
        }
    }

    /// Cancel the progress ticker, if any
    fn stop_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }

    fn reject_if_busy(&self) -> Result<()> {
        if self.phase == Phase::Analyzing {
            return Err(Error::Busy);
        }
        Ok(())
    }
}

struct Shared {
    state: Mutex<SessionState>,
    client: Arc<DescriptionClient>,
    timing: SessionTiming,
    updates: watch::Sender<SessionSnapshot>,
}

impl Shared {
    /// Broadcast the current state and return it
    fn publish(&self, state: &SessionState) -> SessionSnapshot {
        let snapshot = state.snapshot();
        self.updates.send_replace(snapshot.clone());
        snapshot
    }
}

/// An image analysis session
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create an idle session
    #[must_use]
    pub fn new(client: Arc<DescriptionClient>, timing: SessionTiming) -> Self {
        let state = SessionState::new();
        let (updates, _) = watch::channel(state.snapshot());

        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                client,
                timing,
                updates,
            }),
        }
    }

    /// Current state
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.lock().await.snapshot()
    }

    /// Receive every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.updates.subscribe()
    }

    /// Replace the image and return to `Ready`
    ///
    /// # Errors
    ///
    /// Returns `Busy` while an analysis is in flight
    pub async fn load_image(&self, source: ImageSource) -> Result<SessionSnapshot> {
        let mut state = self.shared.state.lock().await;
        state.reject_if_busy()?;

        tracing::debug!(filename = source.filename(), mime_type = source.mime_type(), "image loaded");

        state.stop_ticker();
        state.image = Some(Arc::new(source));
        state.result = None;
        state.error = None;
        state.progress.reset();
        state.phase = Phase::Ready;

        Ok(self.shared.publish(&state))
    }

    /// Show a failed file read or URL fetch
    ///
    /// Discards any loaded image.
    ///
    /// # Errors
    ///
    /// Returns `Busy` while an analysis is in flight
    pub async fn record_load_failure(&self, error: &Error) -> Result<SessionSnapshot> {
        let mut state = self.shared.state.lock().await;
        state.reject_if_busy()?;

        tracing::warn!(error = %error, "image load failed");

        state.stop_ticker();
        state.image = None;
        state.result = None;
        state.error = Some(error.user_message().to_string());
        state.progress.reset();
        state.phase = Phase::Failed;

        Ok(self.shared.publish(&state))
    }

    /// Start analyzing the loaded image
    ///
    /// Returns the request token of the new analysis. The result arrives
    /// asynchronously; watch [`Session::subscribe`] or call
    /// [`Session::wait_until_settled`].
    ///
    /// # Errors
    ///
    /// Returns `NoImage` if nothing is loaded, `Busy` if already analyzing
    pub async fn generate(&self) -> Result<u64> {
        let mut state = self.shared.state.lock().await;
        state.reject_if_busy()?;
        let image = state.image.clone().ok_or(Error::NoImage)?;

        state.stop_ticker();
        state.token += 1;
        let token = state.token;

        state.result = None;
        state.error = None;
        state.progress.reset();
        state.phase = Phase::Analyzing;
        state.ticker = Some(self.spawn_ticker(token));
        self.shared.publish(&state);
        drop(state);

        tracing::info!(token, filename = image.filename(), "analysis started");

        let session = self.clone();
        tokio::spawn(async move {
            let outcome = session
                .shared
                .client
                .describe(image.bytes(), image.mime_type())
                .await;
            session.finish(token, outcome).await;
        });

        Ok(token)
    }

    /// Discard image, result and error, and return to `Idle`
    ///
    /// An in-flight request is not aborted; its response will be ignored.
    pub async fn clear(&self) -> SessionSnapshot {
        let mut state = self.shared.state.lock().await;

        state.stop_ticker();
        state.token += 1;
        state.image = None;
        state.result = None;
        state.error = None;
        state.progress.reset();
        state.phase = Phase::Idle;

        tracing::debug!(token = state.token, "session cleared");

        self.shared.publish(&state)
    }

    /// Wait until no analysis is in flight
    pub async fn wait_until_settled(&self) -> SessionSnapshot {
        let mut updates = self.subscribe();
        let settled = updates.wait_for(|s| !s.busy).await.map(|s| s.clone());

        match settled {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot().await,
        }
    }

    /// Apply an analysis outcome if `token` is still current
    async fn finish(&self, token: u64, outcome: Result<String>) {
        match outcome {
            Ok(description) => {
                {
                    let mut state = self.shared.state.lock().await;
                    if state.token != token {
                        tracing::debug!(token, current = state.token, "discarding stale result");
                        return;
                    }
                    state.stop_ticker();
                    state.progress.complete();
                    self.shared.publish(&state);
                }

                tokio::time::sleep(self.shared.timing.reveal_delay).await;

                let mut state = self.shared.state.lock().await;
                if state.token != token {
                    tracing::debug!(token, current = state.token, "discarding stale result");
                    return;
                }
                state.result = Some(description);
                state.phase = Phase::Done;
                self.shared.publish(&state);

                tracing::info!(token, "analysis complete");
            }
            Err(e) => {
                let mut state = self.shared.state.lock().await;
                if state.token != token {
                    tracing::debug!(token, current = state.token, error = %e, "discarding stale failure");
                    return;
                }
                state.stop_ticker();
                state.error = Some(format!("{FAILURE_PREFIX}{}", e.user_message()));
                state.phase = Phase::Failed;
                self.shared.publish(&state);

                tracing::warn!(token, error = %e, "analysis failed");
            }
        }
    }

    /// Spawn the progress ticker for request `token`
    ///
    /// Holds a weak reference; the ticker ends once the session is dropped.
    fn spawn_ticker(&self, token: u64) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = self.shared.timing.tick_interval;

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let mut state = shared.state.lock().await;
                if state.token != token || state.phase != Phase::Analyzing {
                    break;
                }
                state.progress.advance(&mut rng);
                shared.publish(&state);
            }
        })
    }
}
