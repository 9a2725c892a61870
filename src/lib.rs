//! Vista - detailed AI descriptions of images
//!
//! This library provides the core of the Vista service:
//! - Image sources (local files, URLs) normalized to one in-memory form
//! - A description client with retry/backoff around a multimodal endpoint
//! - An analysis session state machine with simulated progress
//! - An HTTP API exposing sessions to a browser front end
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                        │
//! │        HTTP API (browser)   │   CLI (describe)       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Session                          │
//! │   Idle → Ready → Analyzing → Done / Failed           │
//! └───────────┬─────────────────────────┬───────────────┘
//!             │                         │
//! ┌───────────▼──────────┐  ┌───────────▼───────────────┐
//! │   Image sources      │  │   Description client      │
//! │   file │ URL fetch   │  │   retry/backoff → Gemini  │
//! └──────────────────────┘  └───────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod describe;
pub mod error;
pub mod session;
pub mod source;

pub use api::{ApiServer, ApiState, SessionLimits};
pub use config::Config;
pub use describe::{
    DescriptionClient, GenerateContent, GenerateResponse, GeminiBackend, RetryPolicy,
    classify_api_failure,
};
pub use error::{Error, ErrorClassification, Result};
pub use session::{Phase, Session, SessionSnapshot, SessionTiming};
pub use source::{ImageFetcher, ImageSource, load_from_file};
