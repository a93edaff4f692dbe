//! Backoff policy for transient provider failures

use std::time::Duration;

use reqwest::Response;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;

use crate::error::AiError;

/// Longest slice of an error body kept in [`AiError::LlmHttp`].
const MAX_ERROR_BODY: usize = 512;

/// Caps the exponent so doubling never overflows.
const MAX_DOUBLINGS: u32 = 16;

/// How a provider client spaces out repeated requests.
///
/// Delays double from `base_delay_ms` and never exceed `max_delay_ms`,
/// including waits the server asks for via `Retry-After`. Loaded from the
/// `[retry]` table of the CLI config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra requests after the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Total requests the policy allows for one completion.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32, server_hint: Option<Duration>) -> Duration {
        let ceiling = Duration::from_millis(self.max_delay_ms);
        if let Some(hint) = server_hint {
            return hint.min(ceiling);
        }
        let doublings = retry.saturating_sub(1).min(MAX_DOUBLINGS);
        let delay = self.base_delay_ms.saturating_mul(1u64 << doublings);
        Duration::from_millis(delay).min(ceiling)
    }
}

/// `Retry-After` in whole seconds; HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn clip_body(body: String) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut cut = MAX_ERROR_BODY;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}... [truncated]", &body[..cut])
}

/// Convert a non-success response into [`AiError::LlmHttp`].
pub(crate) async fn http_error(response: Response, provider: &str) -> AiError {
    let status = response.status().as_u16();
    let retry_after_secs = retry_after(response.headers());
    let message = clip_body(response.text().await.unwrap_or_default());

    AiError::LlmHttp {
        provider: provider.to_string(),
        status,
        message,
        retry_after_secs,
    }
}
