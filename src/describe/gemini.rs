//! Gemini generation backend
//!
//! Calls `models/{model}:generateContent` with an inline image and a text
//! instruction, asking for text and image response modalities.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use super::retry::{classify_api_failure, classify_transport_failure};
use super::{GenerateContent, GenerateResponse};
use crate::config::ModelConfig;
use crate::{Error, Result};

/// Gemini `generateContent` client
pub struct GeminiBackend {
    client: Client,
    api_key: SecretString,
    endpoint: String,
}

/// generateContent request body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

/// Request part (inline image or text)
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: RequestInlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestInlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 2],
}

impl GeminiBackend {
    /// Create a new Gemini backend
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty or the HTTP client cannot be built
    pub fn new(api_key: SecretString, model: &ModelConfig) -> Result<Self> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(Error::Config("API key required for generation".to_string()));
        }

        let client = Client::builder()
            .user_agent(concat!("Vista/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            api_key,
            endpoint: endpoint_for_model(&model.api_base, &model.name),
        })
    }

    /// Full `generateContent` URL this backend posts to
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GenerateContent for GeminiBackend {
    async fn generate(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<GenerateResponse> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![
                    RequestPart::InlineData {
                        inline_data: RequestInlineData {
                            mime_type,
                            data: base64::engine::general_purpose::STANDARD.encode(image),
                        },
                    },
                    RequestPart::Text { text: prompt },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: ["IMAGE", "TEXT"],
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_failure(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_api_failure(status.as_u16(), &body));
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|e| classify_transport_failure(&e))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

/// Build the generateContent URL, accepting model names with or without `models/`
fn endpoint_for_model(api_base: &str, model: &str) -> String {
    let trimmed = model.trim();
    let model_path = if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{trimmed}")
    };

    format!(
        "{}/{model_path}:generateContent",
        api_base.trim_end_matches('/')
    )
}
