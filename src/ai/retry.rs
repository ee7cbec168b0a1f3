use std::time::Duration;

use tracing::warn;

use crate::error::AppError;

const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 529];

/// Doubling stops here; a shift past this would overflow for large
/// configured retry counts anyway.
const MAX_BACKOFF_EXPONENT: u32 = 6;

fn is_transient(status: reqwest::StatusCode) -> bool {
    TRANSIENT_STATUSES.contains(&status.as_u16())
}

/// Exponential backoff: 1s, 2s, 4s, ... capped at 64s.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(MAX_BACKOFF_EXPONENT))
}

/// Send an HTTP request with automatic retry on transient errors (429, 500, 502, 503, 529).
///
/// `build_request` is called fresh on each attempt because `RequestBuilder` is not cloneable.
/// Retries use exponential backoff: 1s, 2s, 4s, ... capped at 64s.
pub async fn send_with_retry(
    build_request: impl Fn() -> reqwest::RequestBuilder,
    provider_name: &str,
    max_retries: u32,
) -> Result<reqwest::Response, AppError> {
    let mut last_error = None;

    for attempt in 0..=max_retries {
        let result = build_request()
            .send()
            .await
            .map_err(|e| AppError::GeneratorError(format!("HTTP request failed: {}", e)));

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                // Network-level failure (DNS, connection refused, etc.) is not retryable
                return Err(e);
            }
        };

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        if is_transient(status) && attempt < max_retries {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "could not read body".into());
            let delay = backoff_delay(attempt);
            warn!(
                provider = provider_name,
                status = status.as_u16(),
                attempt = attempt + 1,
                total = max_retries + 1,
                "transient provider error, retrying in {:?}: {}",
                delay,
                body.chars().take(200).collect::<String>(),
            );
            last_error = Some(format!("{} API error ({}): {}", provider_name, status, body));
            tokio::time::sleep(delay).await;
            continue;
        }

        // Non-transient error, or final attempt: read body and fail
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "could not read body".into());
        return Err(AppError::GeneratorError(format!(
            "{} API error ({}): {}",
            provider_name, status, body
        )));
    }

    // Should only be reached if all retries exhausted on transient errors
    Err(AppError::GeneratorError(
        last_error.unwrap_or_else(|| format!("{}: all retries exhausted", provider_name)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(1), Duration::from_secs(2));
        assert_eq!(backoff_delay(2), Duration::from_secs(4));
        assert_eq!(backoff_delay(6), Duration::from_secs(64));
        assert_eq!(backoff_delay(100), Duration::from_secs(64));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient(reqwest::StatusCode::UNAUTHORIZED));
        assert!(!is_transient(reqwest::StatusCode::BAD_REQUEST));
    }
}
