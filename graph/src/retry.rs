//! Retry executor (C2): wraps an HTTP attempt with decorrelated-jitter backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{HttpError, RetryError, TokenError};

/// Total attempts (initial + retries) the executor makes for one logical request.
pub const MAX_ATTEMPTS: u32 = 5;

const BASE_DELAY: Duration = Duration::from_millis(500);
const CAP_DELAY: Duration = Duration::from_secs(30);

/// A decorrelated-jitter backoff schedule, pre-generated once at construction
/// and shared by every retry and every upload-session re-creation on one
/// sender instance.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    schedule: Vec<Duration>,
}

impl RetryPolicy {
    /// Generate a schedule with a median first-retry delay of ~1 second.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut schedule = Vec::with_capacity((MAX_ATTEMPTS - 1) as usize);
        let mut previous = BASE_DELAY;
        for _ in 0..(MAX_ATTEMPTS - 1) {
            let upper = min_duration(previous.saturating_mul(3), CAP_DELAY);
            let lower = min_duration(BASE_DELAY, upper);
            let next = if upper > lower {
                Duration::from_millis(rng.gen_range(lower.as_millis() as u64..=upper.as_millis() as u64))
            } else {
                lower
            };
            schedule.push(next);
            previous = next;
        }
        Self { schedule }
    }

    /// The pre-generated delay before the `retry_index`-th retry (0-based:
    /// `0` is the delay before the first retry).
    pub fn delay(&self, retry_index: usize) -> Duration {
        self.schedule
            .get(retry_index)
            .copied()
            .unwrap_or_else(|| *self.schedule.last().expect("schedule is never empty"))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

fn min_duration(a: Duration, b: Duration) -> Duration {
    if a < b {
        a
    } else {
        b
    }
}

/// Executes an HTTP attempt with retry/backoff per §4.2.
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
    max_attempts: u32,
}

/// What one attempt can fail with before a response is available to classify.
///
/// A token failure is never retried — it propagates to the caller unchanged,
/// per §4.1 — while a transport error is classified as a retriable network
/// error like any other.
pub enum AttemptError {
    Token(TokenError),
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for AttemptError {
    fn from(error: reqwest::Error) -> Self {
        AttemptError::Transport(error)
    }
}

impl<'a> RetryExecutor<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Override the attempt budget (used by the upload session engine, which
    /// bounds session re-creation to 3 attempts rather than 5).
    pub fn with_max_attempts(policy: &'a RetryPolicy, max_attempts: u32) -> Self {
        Self { policy, max_attempts }
    }

    /// `request_factory` is called once per attempt and must fetch a fresh
    /// token and build and send a fresh request each time — request bodies
    /// are consumed on send and the Authorization header must carry a
    /// freshly fetched token, since long-running sequences can outlive one.
    pub async fn execute<F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut request_factory: F,
    ) -> Result<reqwest::Response, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, AttemptError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let result = request_factory().await;
            match classify(result).await {
                Outcome::Success(response) => return Ok(response),
                Outcome::Fatal(error) => return Err(RetryError::Fatal(Box::new(error))),
                Outcome::TokenFailure(error) => return Err(RetryError::Token(error)),
                Outcome::Retriable(error, retry_after) => {
                    if attempt >= self.max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: Box::new(error),
                        });
                    }

                    let delay = retry_after.unwrap_or_else(|| self.policy.delay((attempt - 1) as usize));

                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        status = error.status_code(),
                        body_excerpt = error.body_excerpt(),
                        "retrying request"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    }
                }
            }
        }
    }
}

enum Outcome {
    Success(reqwest::Response),
    Retriable(HttpError, Option<Duration>),
    Fatal(HttpError),
    TokenFailure(TokenError),
}

async fn classify(result: Result<reqwest::Response, AttemptError>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(AttemptError::Token(error)) => return Outcome::TokenFailure(error),
        Err(AttemptError::Transport(error)) => return Outcome::Retriable(HttpError::Network(error), None),
    };

    let status = response.status();
    if status.is_success() {
        return Outcome::Success(response);
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.bytes().await.unwrap_or_default();
    let excerpt = truncate_body(&body);
    let (code, message) = parse_graph_error(&body);

    let http_error = HttpError::Status {
        status,
        code,
        message,
        body: excerpt,
    };

    if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
        Outcome::Retriable(http_error, retry_after)
    } else {
        Outcome::Fatal(http_error)
    }
}

/// Parse a `Retry-After` header carrying a delta-seconds value (Microsoft
/// Graph never sends the HTTP-date form for this API).
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?;
    let seconds: u64 = value.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(seconds))
}

fn truncate_body(body: &[u8]) -> String {
    let limit = body.len().min(500);
    String::from_utf8_lossy(&body[..limit]).into_owned()
}

fn parse_graph_error(body: &[u8]) -> (Option<String>, Option<String>) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) else {
        return (None, None);
    };
    let error = value.get("error");
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .map(str::to_string);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string);
    (code, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_has_four_delays() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.schedule.len(), 4);
    }

    #[test]
    fn schedule_delays_are_bounded() {
        let policy = RetryPolicy::new();
        for delay in &policy.schedule {
            assert!(*delay >= Duration::from_millis(1));
            assert!(*delay <= CAP_DELAY);
        }
    }

    #[test]
    fn parse_retry_after_reads_delta_seconds() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::RETRY_AFTER, "2".parse().unwrap());
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(2)));
    }

    #[test]
    fn parse_graph_error_extracts_code_and_message() {
        let body = br#"{"error":{"code":"ErrorItemNotFound","message":"not found"}}"#;
        let (code, message) = parse_graph_error(body);
        assert_eq!(code.as_deref(), Some("ErrorItemNotFound"));
        assert_eq!(message.as_deref(), Some("not found"));
    }
}
