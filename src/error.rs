use http::StatusCode;
use thiserror::Error;

/// Cap on how much of an upstream error body is carried in an error value.
const MAX_BODY_SNIPPET: usize = 300;

/// Core error type for aistream.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum AiStreamError {
    /// Transport-level failure: connect/read error or deadline expiry.
    /// Retryable up to the attempt budget.
    #[error("network or timeout failure: {message}")]
    NetworkOrTimeout { message: String },

    /// 4xx from the service. Terminal; `body` is the parsed error message
    /// or the raw body if parsing failed.
    #[error("request rejected ({status}): {body}")]
    ClientRejected { status: StatusCode, body: String },

    /// 5xx from the service. Retryable until the budget is spent.
    #[error("service unavailable ({status})")]
    ServerUnavailable { status: StatusCode },

    /// In-band stream failure: an error frame or malformed JSON mid-stream.
    /// Terminal regardless of HTTP status; `data` is the raw offending frame.
    #[error("stream protocol error: {message}")]
    StreamProtocol { message: String, data: String },

    /// Retry budget spent; wraps the last retryable failure observed.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<AiStreamError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, AiStreamError>;

impl AiStreamError {
    /// Classifier predicate used by the request executor: only transport
    /// failures and 5xx responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkOrTimeout { .. } | Self::ServerUnavailable { .. }
        )
    }

    /// The HTTP status attached to this error, if one was obtained.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::ClientRejected { status, .. } | Self::ServerUnavailable { status } => {
                Some(*status)
            }
            Self::ExhaustedRetries { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Map a non-success HTTP response to the taxonomy.
///
/// 4xx is terminal and carries the parsed error body; everything else in
/// the non-success range is treated as a transient service failure.
pub fn classify_status(status: StatusCode, body: &str) -> AiStreamError {
    if status.is_client_error() {
        AiStreamError::ClientRejected {
            status,
            body: parse_error_body(status, body),
        }
    } else {
        AiStreamError::ServerUnavailable { status }
    }
}

/// Extract a human-readable message from a JSON error body, falling back to
/// the raw body, and to the status text when the body is empty.
fn parse_error_body(status: StatusCode, body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(msg) = v
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
    {
        return truncate(msg, MAX_BODY_SNIPPET);
    }
    if body.trim().is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }
    truncate(body, MAX_BODY_SNIPPET)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let cut = s
            .char_indices()
            .take_while(|(i, _)| *i <= max)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_error_is_terminal_with_parsed_body() {
        let err = classify_status(
            StatusCode::NOT_FOUND,
            r#"{"error":{"message":"no such model"}}"#,
        );
        match err {
            AiStreamError::ClientRejected { status, body } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(body, "no such model");
            }
            other => panic!("expected ClientRejected, got: {:?}", other),
        }
    }

    #[test]
    fn client_error_falls_back_to_raw_body() {
        let err = classify_status(StatusCode::BAD_REQUEST, "not-json");
        match err {
            AiStreamError::ClientRejected { body, .. } => assert_eq!(body, "not-json"),
            other => panic!("expected ClientRejected, got: {:?}", other),
        }
    }

    #[test]
    fn client_error_empty_body_uses_status_text() {
        let err = classify_status(StatusCode::FORBIDDEN, "");
        match err {
            AiStreamError::ClientRejected { body, .. } => assert_eq!(body, "Forbidden"),
            other => panic!("expected ClientRejected, got: {:?}", other),
        }
    }

    #[test]
    fn server_error_is_retryable() {
        let err = classify_status(StatusCode::SERVICE_UNAVAILABLE, "oops");
        assert!(err.is_retryable());
        assert_eq!(err.status(), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn retryable_matrix() {
        assert!(
            AiStreamError::NetworkOrTimeout {
                message: "timed out".into()
            }
            .is_retryable()
        );
        assert!(
            !AiStreamError::ClientRejected {
                status: StatusCode::BAD_REQUEST,
                body: "bad".into()
            }
            .is_retryable()
        );
        assert!(
            !AiStreamError::StreamProtocol {
                message: "bad frame".into(),
                data: "{".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn exhausted_retries_reports_inner_status() {
        let err = AiStreamError::ExhaustedRetries {
            attempts: 3,
            last: Box::new(AiStreamError::ServerUnavailable {
                status: StatusCode::BAD_GATEWAY,
            }),
        };
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        let msg = err.to_string();
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("502"));
    }

    #[test]
    fn truncate_keeps_char_boundaries() {
        let long = "é".repeat(400);
        let t = truncate(&long, 300);
        assert!(t.ends_with("..."));
        assert!(t.len() <= 305);
    }
}
