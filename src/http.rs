//! Shared retry loop for remote model calls.
//!
//! Retry strategy, used by every vision and embedding provider:
//! - HTTP 429 (rate limited) and 5xx (server error): retry
//! - HTTP 4xx other than 429: fail immediately
//! - Network errors: retry
//! - Backoff: `base`, `2 * base`, `4 * base`, ... (exponent capped at 5)

use std::time::Duration;

use crate::error::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total tries, including the first one. Always at least 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Sleep before attempt number `attempt` (1-based; the first attempt
    /// never waits).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(5);
        self.base_delay * (1u32 << shift)
    }
}

/// Send a JSON request until it succeeds or the policy gives up.
///
/// `build` is called once per attempt because a `RequestBuilder` is
/// consumed by `send`. Returns the parsed JSON body on a 2xx response.
pub async fn send_with_backoff<F>(
    policy: &BackoffPolicy,
    provider: &str,
    build: F,
) -> Result<serde_json::Value, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err: Option<ProviderError> = None;

    for attempt in 1..=policy.max_attempts {
        let delay = policy.delay_for(attempt);
        if !delay.is_zero() {
            tracing::debug!(provider, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json::<serde_json::Value>().await.map_err(|e| {
                        ProviderError::new(
                            provider,
                            Some(status.as_u16()),
                            format!("invalid response body: {}", e),
                        )
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = ProviderError::new(provider, Some(status.as_u16()), truncate(&body_text));

                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(provider, attempt, status = status.as_u16(), "retryable provider error");
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(e) => {
                tracing::warn!(provider, attempt, error = %e, "provider request failed");
                last_err = Some(ProviderError::new(
                    provider,
                    e.status().map(|s| s.as_u16()),
                    e.to_string(),
                ));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::new(provider, None, "failed after retries")))
}

fn truncate(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// A client with the given request timeout.
pub fn client(timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ProviderError::new("http", None, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Serve `statuses` in order, one per connection, repeating the last.
    /// Returns the base URL and a count of requests seen.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = seen.fetch_add(1, Ordering::SeqCst);
                let status = statuses[n.min(statuses.len() - 1)];
                read_request(&mut socket).await;

                let body = format!("{{\"status\":{}}}", status);
                let reply = format!(
                    "HTTP/1.1 {} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (url, hits)
    }

    /// Consume the request head and its JSON body.
    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let Ok(n) = socket.read(&mut chunk).await else {
                return;
            };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let body_len = text[..head_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + body_len {
                    return;
                }
            }
        }
    }

    async fn call(url: &str, max_attempts: u32) -> Result<serde_json::Value, ProviderError> {
        let client = client(5).unwrap();
        let policy = BackoffPolicy::new(max_attempts, Duration::from_millis(1));
        send_with_backoff(&policy, "stub", || {
            client
                .post(format!("{}/chat/completions", url))
                .json(&serde_json::json!({ "model": "m" }))
        })
        .await
    }

    #[tokio::test]
    async fn rate_limits_are_retried_until_success() {
        let (url, hits) = scripted_server(vec![429, 429, 200]).await;
        let json = call(&url, 3).await.unwrap();
        assert_eq!(json["status"], 200);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_fail_on_the_first_try() {
        let (url, hits) = scripted_server(vec![400, 200]).await;
        let err = call(&url, 3).await.unwrap_err();
        assert_eq!(err.status, Some(400));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_report_the_last_status() {
        let (url, hits) = scripted_server(vec![429, 503]).await;
        let err = call(&url, 4).await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(err.provider, "stub");
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unreachable_host_is_retried_then_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = call(&url, 2).await.unwrap_err();
        assert_eq!(err.status, None);
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = BackoffPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::ZERO);
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for(4), Duration::from_millis(400));
        assert_eq!(policy.delay_for(7), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(9), Duration::from_millis(3200));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(BackoffPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "é".repeat(400);
        let short = truncate(&body);
        assert!(short.ends_with("..."));
        assert!(short.len() <= 503);
    }
}
