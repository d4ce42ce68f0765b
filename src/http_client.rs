//! Resilient request executor.
//!
//! One logical call is a bounded attempt loop: 4xx responses terminate
//! immediately, 5xx and transport failures (including per-attempt deadline
//! expiry) retry with linear backoff until the budget is spent, at which
//! point the last failure is surfaced wrapped in `ExhaustedRetries`.

use futures_util::TryStreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::{HttpCfg, RetryPolicy};
use crate::error::{AiStreamError, CoreResult, classify_status};
use crate::sse::{FrameStream, SseDecoder};

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(std::time::Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(std::time::Duration::from_millis(cfg.request_timeout_ms));
        if let Some(cap) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(cap);
        }
        let inner = builder
            .build()
            .map_err(|e| AiStreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "aistream/0.1".to_string(),
        })
    }

    /// POST JSON and decode a JSON response (blocking mode).
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        credential: &SecretString,
        body: &T,
        policy: &RetryPolicy,
    ) -> CoreResult<R> {
        let resp = self.execute(url, credential, body, None, policy).await?;
        let status = resp.status();
        resp.json::<R>().await.map_err(|e| {
            AiStreamError::Other(anyhow::anyhow!(
                "json decode error on {status} response: {e}"
            ))
        })
    }

    /// POST JSON and return a decoded SSE frame stream (streaming mode).
    ///
    /// The attempt loop only covers the request/response-header exchange;
    /// once a success status arrives the body stream belongs to the caller
    /// and mid-stream failures are not retried.
    pub async fn post_sse<T: Serialize + ?Sized>(
        &self,
        url: &str,
        credential: &SecretString,
        body: &T,
        policy: &RetryPolicy,
    ) -> CoreResult<FrameStream> {
        let resp = self
            .execute(url, credential, body, Some("text/event-stream"), policy)
            .await?;
        let bytes = resp.bytes_stream().map_err(|e| {
            let message = if e.is_timeout() {
                format!("stream read timed out: {e}")
            } else {
                format!("stream read failed: {e}")
            };
            AiStreamError::NetworkOrTimeout { message }
        });
        Ok(SseDecoder::new(Box::pin(bytes)).boxed())
    }

    /// Attempt loop shared by both modes. Returns the first success
    /// response, or the classified terminal error.
    async fn execute<T: Serialize + ?Sized>(
        &self,
        url: &str,
        credential: &SecretString,
        body: &T,
        accept: Option<&str>,
        policy: &RetryPolicy,
    ) -> CoreResult<reqwest::Response> {
        let mut last_err: Option<AiStreamError> = None;

        for attempt in 0..=policy.max_retries {
            let mut req = self
                .inner
                .post(url)
                .header("User-Agent", &self.user_agent)
                .header("Content-Type", "application/json")
                .header(
                    "Authorization",
                    format!("Bearer {}", credential.expose_secret()),
                )
                .json(body);
            if let Some(accept) = accept {
                req = req.header("Accept", accept);
            }
            if let Some(deadline) = policy.attempt_timeout() {
                req = req.timeout(deadline);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        tracing::debug!(%status, attempt, "request succeeded");
                        return Ok(resp);
                    }
                    let text = resp.text().await.unwrap_or_default();
                    let err = classify_status(status, &text);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::debug!(%status, attempt, "retryable response status");
                    last_err = Some(err);
                }
                Err(e) => {
                    let message = if e.is_timeout() {
                        format!("attempt deadline expired: {e}")
                    } else {
                        format!("request failed: {e}")
                    };
                    tracing::debug!(attempt, %message, "transport failure");
                    last_err = Some(AiStreamError::NetworkOrTimeout { message });
                }
            }

            if attempt < policy.max_retries {
                let delay = policy.backoff_after(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }

        let last = last_err.unwrap_or(AiStreamError::NetworkOrTimeout {
            message: "request never attempted".into(),
        });
        Err(AiStreamError::ExhaustedRetries {
            attempts: policy.max_retries + 1,
            last: Box::new(last),
        })
    }
}
