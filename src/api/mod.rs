//! HTTP API server for Vista
//!
//! Exposes analysis sessions to a browser front end: create a session,
//! upload or link an image, trigger generation, poll the snapshot, clear.

pub mod health;
pub mod sessions;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL};
use crate::describe::DescriptionClient;
use crate::session::{Session, SessionTiming};
use crate::source::ImageFetcher;
use crate::{Error, Result};

/// Idle expiry and capacity of the session registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Sessions untouched for this long are dropped by the sweeper
    pub ttl: Duration,
    /// Most sessions held at once
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_SESSION_TTL,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

struct SessionEntry {
    session: Session,
    last_seen: Instant,
}

/// Shared state for API handlers
pub struct ApiState {
    pub client: Arc<DescriptionClient>,
    pub fetcher: ImageFetcher,
    pub timing: SessionTiming,
    pub limits: SessionLimits,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    /// Model name reported by `/api/status`
    pub model_name: String,
    /// Largest accepted upload body
    pub max_upload_bytes: usize,
}

impl ApiState {
    #[must_use]
    pub fn new(
        client: Arc<DescriptionClient>,
        fetcher: ImageFetcher,
        timing: SessionTiming,
        limits: SessionLimits,
        model_name: String,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            client,
            fetcher,
            timing,
            limits,
            sessions: RwLock::new(HashMap::new()),
            model_name,
            max_upload_bytes,
        }
    }

    /// Create and register a new idle session
    ///
    /// Expired sessions are swept first when the registry is full.
    ///
    /// # Errors
    ///
    /// Returns `TooManySessions` if the registry is still full
    pub async fn create_session(&self) -> Result<(Uuid, Session)> {
        let mut expired = Vec::new();
        let created = {
            let mut sessions = self.sessions.write().await;
            if sessions.len() >= self.limits.max_sessions {
                expired = self.take_expired(&mut sessions);
            }

            if sessions.len() >= self.limits.max_sessions {
                None
            } else {
                let id = Uuid::new_v4();
                let session = Session::new(self.client.clone(), self.timing.clone());
                sessions.insert(
                    id,
                    SessionEntry {
                        session: session.clone(),
                        last_seen: Instant::now(),
                    },
                );
                Some((id, session))
            }
        };

        for session in expired {
            session.clear().await;
        }

        let Some((id, session)) = created else {
            tracing::warn!(max = self.limits.max_sessions, "session limit reached");
            return Err(Error::TooManySessions(self.limits.max_sessions));
        };

        tracing::info!(session_id = %id, "session created");
        Ok((id, session))
    }

    /// Look up a session and mark it as recently used
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown ids
    pub async fn session(&self, id: Uuid) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        entry.last_seen = Instant::now();
        Ok(entry.session.clone())
    }

    /// Clear and drop a session
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound` for unknown ids
    pub async fn remove_session(&self, id: Uuid) -> Result<()> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;
        entry.session.clear().await;

        tracing::info!(session_id = %id, "session removed");
        Ok(())
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop every session idle for at least the configured TTL
    ///
    /// Returns how many were dropped.
    pub async fn sweep_idle(&self) -> usize {
        let expired = {
            let mut sessions = self.sessions.write().await;
            self.take_expired(&mut sessions)
        };

        for session in &expired {
            session.clear().await;
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired idle sessions");
        }
        expired.len()
    }

    fn take_expired(&self, sessions: &mut HashMap<Uuid, SessionEntry>) -> Vec<Session> {
        let now = Instant::now();
        let ids: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_seen) >= self.limits.ttl)
            .map(|(id, _)| *id)
            .collect();

        ids.iter()
            .filter_map(|id| sessions.remove(id))
            .map(|entry| entry.session)
            .collect()
    }

    /// Run [`ApiState::sweep_idle`] periodically until aborted
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        let period = (state.limits.ttl / 2).max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                state.sweep_idle().await;
            }
        })
    }
}

/// Error response wrapper for API handlers
///
/// Responds with `{"error": {"code", "message"}}`; the message is always
/// the fixed user-facing text.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: &'static str,
        }

        let (status, code) = match &self.0 {
            Error::NoImage => (StatusCode::BAD_REQUEST, "no_image"),
            Error::Busy => (StatusCode::CONFLICT, "busy"),
            Error::SessionNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::TooManySessions(_) => (StatusCode::SERVICE_UNAVAILABLE, "too_many_sessions"),
            Error::InvalidUrl(_) => (StatusCode::BAD_REQUEST, "invalid_url"),
            Error::NotAnImage(_) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "not_an_image"),
            Error::Read(_) => (StatusCode::BAD_REQUEST, "read_failed"),
            Error::Fetch(_) => (StatusCode::BAD_GATEWAY, "fetch_failed"),
            Error::UnsupportedImage(_) => (StatusCode::UNPROCESSABLE_ENTITY, "unsupported_image"),
            Error::EmptyDescription => (StatusCode::BAD_GATEWAY, "empty_description"),
            Error::Credential(_) => (StatusCode::BAD_GATEWAY, "credential"),
            Error::RateLimited(_) | Error::TransientService(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: ErrorBody {
                    code,
                    message: self.0.user_message(),
                },
            }),
        )
            .into_response()
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    #[must_use]
    pub const fn new(state: Arc<ApiState>, port: u16, static_dir: Option<PathBuf>) -> Self {
        Self {
            state,
            port,
            static_dir,
        }
    }

    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest("/api/sessions", sessions::router(self.state.clone()))
            .merge(health::router())
            .merge(health::status_router(self.state.clone()));

        // Serve a front end if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, model = %self.state.model_name, "API server listening");

        let sweeper = self.state.spawn_sweeper();
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await;
        sweeper.abort();

        served.map_err(|e| Error::Config(format!("API server error: {e}")))?;
        Ok(())
    }
}

/// Resolve on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
