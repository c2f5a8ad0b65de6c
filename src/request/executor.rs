use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::time::{sleep, timeout};

use super::error::{RequestError, TransportError};
use super::operation::Operation;
use super::policy::RetryPolicy;
use super::transport::{Response, Transport};
use crate::cancel::CancellationToken;

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes operations against a [`Transport`] with per-attempt timeout,
/// bounded retry and cooperative cancellation.
///
/// Retries run in a flat loop: the attempt counter and cancellation token
/// are checked before every attempt, and both the in-flight attempt and the
/// backoff sleep race against the token.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Policy used when `execute` is called without one.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Run `operation` until it succeeds, fails permanently, runs out of
    /// attempts, or `cancel` fires.
    pub async fn execute(
        &self,
        operation: &Operation,
        policy: Option<&RetryPolicy>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, RequestError> {
        let policy = policy.unwrap_or(&self.policy);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::debug!(operation = %operation, attempt, "Cancelled before attempt");
                return Err(RequestError::Cancelled);
            }

            let failure = match self.attempt(operation, cancel).await {
                Ok(response) => {
                    if attempt > 1 {
                        tracing::info!(operation = %operation, attempt, "Succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(RequestError::Cancelled) => {
                    tracing::debug!(operation = %operation, attempt, "Cancelled during attempt");
                    return Err(RequestError::Cancelled);
                }
                Err(err) => err,
            };

            if !failure.is_retryable(policy.retryable_statuses()) {
                tracing::debug!(
                    operation = %operation,
                    attempt,
                    error = %failure,
                    "Non-retryable failure"
                );
                return Err(failure);
            }

            if attempt >= policy.max_attempts() {
                tracing::warn!(
                    operation = %operation,
                    attempts = attempt,
                    error = %failure,
                    "Retries exhausted"
                );
                return Err(RequestError::ExhaustedRetries {
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            if operation.is_retry_unsafe() {
                tracing::warn!(
                    operation = %operation,
                    "Retrying non-idempotent operation without an idempotency key"
                );
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(
                operation = %operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Attempt failed, retrying"
            );

            if !wait(delay, cancel).await {
                tracing::debug!(operation = %operation, attempt, "Cancelled during backoff");
                return Err(RequestError::Cancelled);
            }
        }
    }

    /// Like [`execute`](Self::execute), decoding a successful JSON body.
    ///
    /// Decode failures are returned as [`RequestError::Decode`] and are
    /// never retried.
    pub async fn execute_json<R: DeserializeOwned>(
        &self,
        operation: &Operation,
        policy: Option<&RetryPolicy>,
        cancel: Option<&CancellationToken>,
    ) -> Result<R, RequestError> {
        let response = self.execute(operation, policy, cancel).await?;
        response.json().map_err(|e| RequestError::Decode {
            reason: e.to_string(),
        })
    }

    async fn attempt(
        &self,
        operation: &Operation,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response, RequestError> {
        let send = timeout(self.attempt_timeout, self.transport.send(operation));

        let outcome = match cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => return Err(RequestError::Cancelled),
                outcome = send => outcome,
            },
            None => send.await,
        };

        match outcome {
            Err(_) | Ok(Err(TransportError::TimedOut)) => Err(RequestError::Timeout {
                after: self.attempt_timeout,
            }),
            Ok(Err(err)) => Err(RequestError::NetworkUnavailable {
                reason: err.to_string(),
            }),
            Ok(Ok(response)) => classify_status(response),
        }
    }
}

fn classify_status(response: Response) -> Result<Response, RequestError> {
    if response.is_success() {
        return Ok(response);
    }
    let status = response.status;
    let body = response.text();
    if status >= 500 {
        Err(RequestError::ServerError { status, body })
    } else {
        Err(RequestError::ClientError { status, body })
    }
}

/// Sleep for `delay`; returns false if cancelled first.
async fn wait(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => false,
            _ = sleep(delay) => true,
        },
        None => {
            sleep(delay).await;
            true
        }
    }
}
