use futures_util::StreamExt;
use secrecy::SecretString;
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::CompletionEvents;
use crate::config::{Config, RetryPolicy};
use crate::error::{AiStreamError, CoreResult};
use crate::http_client::HttpClient;
use crate::model::Completion;
use crate::stream::{CompletionStream, StreamEvent};

/// Client for one chat-completion endpoint.
///
/// Owns the HTTP client, destination URL, bearer credential, and retry
/// policy. Calls are independent: each owns its own attempt/backoff state
/// and response stream, so a client can serve concurrent callers.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: HttpClient,
    url: String,
    credential: SecretString,
    policy: RetryPolicy,
}

impl ChatClient {
    pub fn new(url: impl Into<String>, credential: SecretString) -> CoreResult<Self> {
        Ok(Self {
            http: HttpClient::new_default()?,
            url: url.into(),
            credential,
            policy: RetryPolicy::default(),
        })
    }

    pub fn from_config(
        url: impl Into<String>,
        credential: SecretString,
        cfg: &Config,
    ) -> CoreResult<Self> {
        Ok(Self {
            http: HttpClient::from_cfg(&cfg.http)?,
            url: url.into(),
            credential,
            policy: cfg.retry.clone(),
        })
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[cfg(test)]
    pub fn new_for_tests(url: &str) -> Self {
        ChatClient::new(url, SecretString::new("test-key".into()))
            .unwrap()
            .with_policy(RetryPolicy {
                max_retries: 0,
                backoff_base_ms: 5,
                attempt_timeout_ms: None,
            })
    }

    /// Streaming mode: POST the body and return incremental events ending
    /// in a single `Final`.
    pub async fn complete_stream<T: Serialize + ?Sized>(
        &self,
        body: &T,
    ) -> CoreResult<CompletionStream> {
        let frames = self
            .http
            .post_sse(&self.url, &self.credential, body, &self.policy)
            .await?;
        Ok(CompletionEvents::new(frames).boxed())
    }

    /// Blocking mode over a streamed response: drives the event stream to
    /// completion internally and returns only the aggregated result.
    pub async fn complete<T: Serialize + ?Sized>(&self, body: &T) -> CoreResult<Completion> {
        let mut events = self.complete_stream(body).await?;
        let mut last = None;
        while let Some(ev) = events.next().await {
            if let StreamEvent::Final(completion) = ev? {
                last = Some(completion);
            }
        }
        last.ok_or_else(|| AiStreamError::StreamProtocol {
            message: "stream ended without a final completion".into(),
            data: String::new(),
        })
    }

    /// Non-streaming round trip for request bodies that do not ask for a
    /// streamed response. The caller picks the response shape.
    pub async fn post<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        body: &T,
    ) -> CoreResult<R> {
        self.http
            .post_json(&self.url, &self.credential, body, &self.policy)
            .await
    }
}
