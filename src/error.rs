//! Error types for Vista

use thiserror::Error;

/// Result type alias for Vista operations
pub type Result<T> = std::result::Result<T, Error>;

/// Message shown when the configured credential is rejected
pub const MSG_CREDENTIAL: &str =
    "The configured API key is invalid. Please check your environment setup.";
/// Message shown when the service is rate limiting or exhausted
pub const MSG_BUSY: &str =
    "The service is temporarily busy due to high demand. Please try again in a few moments.";
/// Message shown when the service rejects the image content
pub const MSG_UNSUPPORTED_IMAGE: &str =
    "The uploaded image is invalid or in an unsupported format. Please try a different one.";
/// Message shown when the service returns no usable text
pub const MSG_EMPTY_DESCRIPTION: &str =
    "The AI could not describe the image. It might be unclear or unsupported.";
/// Fallback for anything not covered by a more specific message
pub const MSG_UNKNOWN: &str =
    "Could not get a description from the AI service due to an unexpected error.";

/// How an error should be treated by retry logic and callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Transient: rate limiting, overload, server or network failure
    Retryable,
    /// The credential was rejected
    Credential,
    /// The input (URL, image, content) cannot be processed as given
    InvalidInput,
    /// Anything else
    Unknown,
}

/// Errors that can occur in Vista
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Local image could not be read
    #[error("read error: {0}")]
    Read(String),

    /// Image URL is not well formed
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Image URL responded with a non-success status or could not be downloaded
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Content is not an accepted image type
    #[error("not an image: {0}")]
    NotAnImage(String),

    /// The endpoint answered but produced no usable text
    #[error("the AI did not return a text description")]
    EmptyDescription,

    /// Credential missing or rejected by the endpoint
    #[error("credential error: {0}")]
    Credential(String),

    /// Rate limited or resource exhausted (HTTP 429)
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Service unavailable, server or network error
    #[error("transient service error: {0}")]
    TransientService(String),

    /// Endpoint rejected the image content
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),

    /// Unclassified endpoint failure
    #[error("api error: {0}")]
    Api(String),

    /// Generation requested with no image loaded
    #[error("no image loaded")]
    NoImage,

    /// Operation rejected while an analysis is in flight
    #[error("an analysis is already in progress")]
    Busy,

    /// Unknown session id
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Session registry is full
    #[error("session limit of {0} reached")]
    TooManySessions(usize),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Classify this error for retry and response handling
    #[must_use]
    pub const fn classification(&self) -> ErrorClassification {
        match self {
            Self::RateLimited(_) | Self::TransientService(_) => ErrorClassification::Retryable,
            Self::Credential(_) => ErrorClassification::Credential,
            Self::InvalidUrl(_)
            | Self::NotAnImage(_)
            | Self::UnsupportedImage(_)
            | Self::EmptyDescription
            | Self::NoImage => ErrorClassification::InvalidInput,
            _ => ErrorClassification::Unknown,
        }
    }

    /// Whether the description client should try again
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.classification(), ErrorClassification::Retryable)
    }

    /// Fixed user-facing text for this error
    ///
    /// Technical detail stays in the logs; only these strings reach the user.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Credential(_) => MSG_CREDENTIAL,
            Self::RateLimited(_) => MSG_BUSY,
            Self::UnsupportedImage(_) => MSG_UNSUPPORTED_IMAGE,
            Self::EmptyDescription => MSG_EMPTY_DESCRIPTION,
            Self::Read(_) | Self::Io(_) => "Failed to read the image file. Please try again.",
            Self::InvalidUrl(_) => "Please enter a valid image URL.",
            Self::Fetch(_) => "Could not fetch an image from that URL.",
            Self::NotAnImage(_) => "The provided file or URL does not point to a PNG, JPEG, or WEBP image.",
            Self::NoImage => "Please upload an image first.",
            Self::Busy => "An analysis is already in progress.",
            Self::SessionNotFound(_) => "Session not found.",
            Self::TooManySessions(_) => "Too many active sessions. Please try again later.",
            _ => MSG_UNKNOWN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_variants() {
        assert!(Error::RateLimited("429".into()).is_retryable());
        assert!(Error::TransientService("503".into()).is_retryable());
        assert!(!Error::Credential("bad key".into()).is_retryable());
        assert!(!Error::EmptyDescription.is_retryable());
        assert!(!Error::Api("boom".into()).is_retryable());
    }

    #[test]
    fn classification_table() {
        assert_eq!(
            Error::Credential(String::new()).classification(),
            ErrorClassification::Credential
        );
        assert_eq!(
            Error::UnsupportedImage(String::new()).classification(),
            ErrorClassification::InvalidInput
        );
        assert_eq!(
            Error::InvalidUrl(String::new()).classification(),
            ErrorClassification::InvalidInput
        );
        assert_eq!(
            Error::Api(String::new()).classification(),
            ErrorClassification::Unknown
        );
    }

    #[test]
    fn user_messages_hide_details() {
        let err = Error::Credential("API key not valid. Please pass a valid API key.".into());
        assert_eq!(err.user_message(), MSG_CREDENTIAL);

        assert_eq!(Error::RateLimited("x".into()).user_message(), MSG_BUSY);
        assert_eq!(
            Error::UnsupportedImage("x".into()).user_message(),
            MSG_UNSUPPORTED_IMAGE
        );
        assert_eq!(Error::EmptyDescription.user_message(), MSG_EMPTY_DESCRIPTION);
        // 503 has no dedicated message
        assert_eq!(
            Error::TransientService("503 Service Unavailable".into()).user_message(),
            MSG_UNKNOWN
        );
        assert_eq!(Error::Api("teapot".into()).user_message(), MSG_UNKNOWN);
    }
}
