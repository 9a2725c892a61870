//! Image description
//!
//! [`DescriptionClient`] sends an image plus a fixed instruction to a
//! [`GenerateContent`] backend, retries transient failures with exponential
//! backoff, and validates that usable text came back.

mod gemini;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use gemini::GeminiBackend;
pub use retry::{RetryPolicy, classify_api_failure};

/// A generation endpoint that accepts an image and an instruction
///
/// Implementations classify their own failures (see [`classify_api_failure`])
/// so the retry loop never inspects message text.
#[async_trait]
pub trait GenerateContent: Send + Sync {
    /// Make a single generation call
    ///
    /// # Errors
    ///
    /// Returns a classified error if the call fails
    async fn generate(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<GenerateResponse>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}

/// Generation response: zero or more candidates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// One alternative response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// A content part; only text-bearing parts are used
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

/// Inline binary payload (base64)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl GenerateResponse {
    /// Response with a single candidate made of the given text parts
    #[must_use]
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts = texts
            .into_iter()
            .map(|t| Part {
                text: Some(t.into()),
                inline_data: None,
            })
            .collect();

        Self {
            candidates: vec![Candidate {
                content: Some(Content { parts }),
            }],
        }
    }

    /// Concatenate every text part of the first candidate
    #[must_use]
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

/// Describes images through a [`GenerateContent`] backend
pub struct DescriptionClient {
    backend: Arc<dyn GenerateContent>,
    policy: RetryPolicy,
    prompt: String,
}

impl DescriptionClient {
    /// Create a new description client
    #[must_use]
    pub fn new(backend: Arc<dyn GenerateContent>, policy: RetryPolicy, prompt: String) -> Self {
        Self {
            backend,
            policy,
            prompt,
        }
    }

    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Describe an image
    ///
    /// Retryable failures are retried per the policy and never surface unless
    /// every attempt fails.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the last attempt; use
    /// [`Error::user_message`] for display
    pub async fn describe(&self, image: &[u8], mime_type: &str) -> Result<String> {
        let mut attempt = 1;

        loop {
            match self.attempt(image, mime_type).await {
                Ok(description) => {
                    tracing::debug!(
                        backend = self.backend.name(),
                        attempt,
                        len = description.len(),
                        "image described"
                    );
                    return Ok(description);
                }
                Err(e) => {
                    tracing::warn!(
                        backend = self.backend.name(),
                        attempt,
                        error = %e,
                        "description attempt failed"
                    );

                    let delay = if e.is_retryable() {
                        self.policy.delay_after(attempt)
                    } else {
                        None
                    };

                    let Some(delay) = delay else {
                        return Err(e);
                    };

                    tracing::info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "retrying description"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One call plus text validation
    async fn attempt(&self, image: &[u8], mime_type: &str) -> Result<String> {
        let response = self
            .backend
            .generate(image, mime_type, &self.prompt)
            .await?;

        let description = response.text();
        if description.trim().is_empty() {
            return Err(Error::EmptyDescription);
        }

        Ok(description)
    }
}
