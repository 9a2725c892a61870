//! Session endpoints
//!
//! - `POST   /api/sessions`                create
//! - `GET    /api/sessions/{id}`           snapshot
//! - `DELETE /api/sessions/{id}`           clear and remove
//! - `PUT    /api/sessions/{id}/image`     upload raw image body
//! - `POST   /api/sessions/{id}/image-url` load image from a URL
//! - `POST   /api/sessions/{id}/generate`  start analysis
//! - `POST   /api/sessions/{id}/clear`     back to idle

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ApiError, ApiState};
use crate::session::{Session, SessionSnapshot};
use crate::source::ImageSource;
use crate::{Error, Result};

/// Header carrying the original filename of an uploaded image
pub const FILENAME_HEADER: &str = "x-filename";

/// Filename used when an upload does not name itself
pub const DEFAULT_UPLOAD_FILENAME: &str = "upload";

/// Response to session creation
#[derive(Serialize)]
pub struct CreatedSession {
    pub id: Uuid,
    pub session: SessionSnapshot,
}

/// Body of `POST /image-url`
#[derive(Debug, Deserialize)]
pub struct LoadUrlRequest {
    pub url: String,
}

/// Build session router
pub fn router(state: Arc<ApiState>) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/", post(create_session))
        .route("/{id}", get(get_session).delete(delete_session))
        .route("/{id}/image", put(upload_image).layer(upload_limit))
        .route("/{id}/image-url", post(load_image_url))
        .route("/{id}/generate", post(generate))
        .route("/{id}/clear", post(clear))
        .with_state(state)
}

async fn create_session(
    State(state): State<Arc<ApiState>>,
) -> std::result::Result<(StatusCode, Json<CreatedSession>), ApiError> {
    let (id, session) = state.create_session().await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedSession {
            id,
            session: session.snapshot().await,
        }),
    ))
}

async fn get_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> std::result::Result<Json<SessionSnapshot>, ApiError> {
    let session = state.session(id).await?;
    Ok(Json(session.snapshot().await))
}

async fn delete_session(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> std::result::Result<StatusCode, ApiError> {
    state.remove_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Upload an image as the raw request body
///
/// `Content-Type` must be an image type; `X-Filename` names the file.
async fn upload_image(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<SessionSnapshot>, ApiError> {
    let session = state.session(id).await?;
    ensure_idle(&session).await?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let filename = headers
        .get(FILENAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_UPLOAD_FILENAME);

    let loaded = if body.is_empty() {
        Err(Error::Read("empty upload".to_string()))
    } else {
        ImageSource::from_bytes(body.to_vec(), content_type, filename)
    };

    apply_load(&session, loaded).await.map(Json)
}

/// Load an image from a URL
async fn load_image_url(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<LoadUrlRequest>,
) -> std::result::Result<Json<SessionSnapshot>, ApiError> {
    let session = state.session(id).await?;
    ensure_idle(&session).await?;

    let loaded = state.fetcher.load_from_url(&request.url).await;
    apply_load(&session, loaded).await.map(Json)
}

async fn generate(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> std::result::Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let session = state.session(id).await?;
    let token = session.generate().await?;

    tracing::debug!(session_id = %id, token, "generation requested");
    Ok((StatusCode::ACCEPTED, Json(session.snapshot().await)))
}

async fn clear(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> std::result::Result<Json<SessionSnapshot>, ApiError> {
    let session = state.session(id).await?;
    Ok(Json(session.clear().await))
}

/// Reject loads while an analysis is running, before doing any work
async fn ensure_idle(session: &Session) -> Result<()> {
    if session.snapshot().await.busy {
        return Err(Error::Busy);
    }
    Ok(())
}

/// Store a loaded image, or record the load failure and return it
async fn apply_load(
    session: &Session,
    loaded: Result<ImageSource>,
) -> std::result::Result<SessionSnapshot, ApiError> {
    match loaded {
        Ok(source) => Ok(session.load_image(source).await?),
        Err(e) => {
            // An analysis may have started while loading; the load error still wins
            if let Err(busy) = session.record_load_failure(&e).await {
                tracing::debug!(error = %busy, "load failure not recorded");
            }
            Err(ApiError(e))
        }
    }
}
