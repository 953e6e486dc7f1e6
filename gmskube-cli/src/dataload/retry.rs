use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;

/// Retries applied to every request sent to the loader service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 20,
            backoff_factor: Duration::from_millis(200),
            max_backoff: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based). The first retry is
    /// immediate, later ones double from `2 * backoff_factor`.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(31);
        self.backoff_factor
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }

    /// Send the request built by `build`, retrying on 404 and on connection
    /// failures. The request is rebuilt for every attempt; after the last
    /// retry the final response or error is returned as is.
    pub async fn send<F>(&self, mut build: F) -> Result<Response, reqwest::Error>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut retry = 0;
        loop {
            match build().send().await {
                Ok(response) if response.status() == StatusCode::NOT_FOUND && retry < self.max_retries => {
                    debug!("{} returned 404, retrying", response.url());
                }
                Ok(response) => return Ok(response),
                Err(e) if is_retryable(&e) && retry < self.max_retries => {
                    debug!("Request failed, retrying: {e}");
                }
                Err(e) => return Err(e),
            }
            retry += 1;
            tokio::time::sleep(self.backoff(retry)).await;
        }
    }
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1600));
        assert_eq!(policy.backoff(10), Duration::from_secs(102) + Duration::from_millis(400));
        assert_eq!(policy.backoff(11), Duration::from_secs(120));
        assert_eq!(policy.backoff(20), Duration::from_secs(120));
    }
}
