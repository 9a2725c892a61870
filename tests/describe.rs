//! Description client retry and validation tests
//!
//! Run with paused time so backoff delays are exact.

use std::time::Duration;

use vista::error::{MSG_BUSY, MSG_CREDENTIAL, MSG_EMPTY_DESCRIPTION, MSG_UNKNOWN, MSG_UNSUPPORTED_IMAGE};
use vista::{Error, ErrorClassification};

mod common;
use common::{JPEG_BYTES, Reply, ScriptedBackend, Step, client_for};

#[tokio::test(start_paused = true)]
async fn test_success_returns_text() {
    let backend = ScriptedBackend::replying(Reply::text("A red apple on a table."));
    let client = client_for(backend.clone());

    let text = client.describe(JPEG_BYTES, "image/jpeg").await.unwrap();

    assert_eq!(text, "A red apple on a table.");
    assert_eq!(backend.call_count(), 1);

    let call = &backend.calls()[0];
    assert_eq!(call.mime_type, "image/jpeg");
    assert_eq!(call.image_len, JPEG_BYTES.len());
    assert_eq!(call.prompt, "describe every detail");
}

#[tokio::test(start_paused = true)]
async fn test_text_parts_are_concatenated() {
    let backend = ScriptedBackend::replying(Reply::Text(vec![
        "A red apple".to_string(),
        " on a wooden table.".to_string(),
    ]));
    let client = client_for(backend);

    let text = client.describe(JPEG_BYTES, "image/jpeg").await.unwrap();
    assert_eq!(text, "A red apple on a wooden table.");
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_twice_then_success() {
    let backend = ScriptedBackend::new([
        Step::now(Reply::status(429, "Too Many Requests")),
        Step::now(Reply::status(429, "Too Many Requests")),
        Step::now(Reply::text("A red apple on a table.")),
    ]);
    let client = client_for(backend.clone());

    let text = client.describe(JPEG_BYTES, "image/jpeg").await.unwrap();

    assert_eq!(text, "A red apple on a table.");
    assert_eq!(backend.call_count(), 3);
    assert_eq!(
        backend.gaps(),
        vec![Duration::from_millis(1000), Duration::from_millis(2000)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retryable_failures_exhaust_after_three_attempts() {
    for (status, body, message) in [
        (429, "", MSG_BUSY),
        (400, "Resource has been exhausted (e.g. check quota).", MSG_BUSY),
        (503, "Service Unavailable", MSG_UNKNOWN),
        (500, "Internal server error", MSG_UNKNOWN),
    ] {
        let backend = ScriptedBackend::replying(Reply::status(status, body));
        let client = client_for(backend.clone());
        let started = tokio::time::Instant::now();

        let err = client.describe(JPEG_BYTES, "image/jpeg").await.unwrap_err();

        assert_eq!(err.classification(), ErrorClassification::Retryable, "{status}");
        assert_eq!(err.user_message(), message, "{status}");
        assert_eq!(backend.call_count(), 3, "{status}");
        assert_eq!(
            backend.gaps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)],
            "{status}"
        );
        // No sleep after the final attempt
        assert_eq!(started.elapsed(), Duration::from_millis(3000), "{status}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failures_are_not_retried() {
    for (status, body, message) in [
        (400, "API key not valid. Please pass a valid API key.", MSG_CREDENTIAL),
        (403, "Permission denied", MSG_CREDENTIAL),
        (400, "Provided image is invalid or unsupported.", MSG_UNSUPPORTED_IMAGE),
        (400, "Request contains an invalid argument.", MSG_UNKNOWN),
        (404, "models/nope is not found", MSG_UNKNOWN),
    ] {
        let backend = ScriptedBackend::replying(Reply::status(status, body));
        let client = client_for(backend.clone());
        let started = tokio::time::Instant::now();

        let err = client.describe(JPEG_BYTES, "image/jpeg").await.unwrap_err();

        assert!(!err.is_retryable(), "{status} {body}");
        assert_eq!(err.user_message(), message, "{status} {body}");
        assert_eq!(backend.call_count(), 1, "{status} {body}");
        assert_eq!(started.elapsed(), Duration::ZERO, "{status} {body}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_empty_text_is_a_failure() {
    for reply in [
        Reply::NoCandidates,
        Reply::text(""),
        Reply::text("   \n\t "),
        Reply::Text(vec![" ".to_string(), "\n".to_string()]),
    ] {
        let backend = ScriptedBackend::replying(reply.clone());
        let client = client_for(backend.clone());

        let err = client.describe(JPEG_BYTES, "image/jpeg").await.unwrap_err();

        assert!(matches!(err, Error::EmptyDescription), "{reply:?}");
        assert_eq!(err.user_message(), MSG_EMPTY_DESCRIPTION);
        // A syntactically fine but empty answer is not retried
        assert_eq!(backend.call_count(), 1, "{reply:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_after_retryable_stops_immediately() {
    let backend = ScriptedBackend::new([
        Step::now(Reply::status(503, "")),
        Step::now(Reply::status(401, "")),
        Step::now(Reply::text("never reached")),
    ]);
    let client = client_for(backend.clone());

    let err = client.describe(JPEG_BYTES, "image/jpeg").await.unwrap_err();

    assert!(matches!(err, Error::Credential(_)));
    assert_eq!(backend.call_count(), 2);
    assert_eq!(backend.gaps(), vec![Duration::from_millis(1000)]);
}
