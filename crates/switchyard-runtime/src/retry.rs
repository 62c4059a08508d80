use std::future::{ready, Future};
use std::time::Duration;

use futures::{stream, StreamExt, TryStreamExt};

use crate::error::{RelayError, RelayResult};
use crate::llm::streaming::RawStream;
use crate::types::Provider;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY_MS: u64 = 2000;

/// Fixed-delay retry for starting an upstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

/// Open a raw stream, retrying until its first event arrives.
///
/// An attempt fails if opening errors, the first item is an error, or the
/// stream ends empty. Only retryable failures get another attempt. Once the
/// first event is in hand the stream is returned and later errors surface as
/// `ProviderStream` without retry.
pub async fn open_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: Provider,
    mut open: F,
) -> RelayResult<RawStream<T>>
where
    T: Send + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = RelayResult<RawStream<T>>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            tracing::info!(
                provider = %provider,
                attempt,
                delay_ms = policy.delay.as_millis() as u64,
                "Retrying upstream call"
            );
            tokio::time::sleep(policy.delay).await;
        }

        let started = match open().await {
            Ok(mut raw) => match raw.next().await {
                Some(Ok(first)) => Ok((first, raw)),
                Some(Err(e)) => Err(e),
                None => Err(RelayError::ProviderStream {
                    provider,
                    message: "upstream stream ended before the first event".to_string(),
                }),
            },
            Err(e) => Err(e),
        };

        match started {
            Ok((first, rest)) => {
                if attempt > 1 {
                    tracing::info!(
                        provider = %provider,
                        attempt,
                        "Upstream call started after retry"
                    );
                }
                let rest = rest.map_err(move |e| e.into_stream_error(provider));
                return Ok(stream::once(ready(Ok(first))).chain(rest).boxed());
            }
            Err(e) => {
                let retryable = e.is_retryable();
                tracing::warn!(
                    provider = %provider,
                    attempt,
                    max_attempts,
                    retryable,
                    error = %e,
                    "Upstream call failed to start"
                );
                last_error = Some((attempt, e));
                if !retryable {
                    break;
                }
            }
        }
    }

    let (attempts, cause) = last_error
        .unwrap_or_else(|| (0, RelayError::internal("no attempt was made")));
    Err(RelayError::ProviderTransport {
        provider,
        attempts,
        message: cause.to_string(),
        status: cause.status(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn events(items: Vec<RelayResult<u32>>) -> RawStream<u32> {
        stream::iter(items).boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let started = tokio::time::Instant::now();

        let counter = calls.clone();
        let result = open_with_retry(&policy, Provider::OpenAI, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<RawStream<u32>, _>(RelayError::Provider {
                    name: "server_error".into(),
                    message: "upstream unavailable".into(),
                    status: Some(503),
                })
            }
        })
        .await;

        let err = result.err().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(err.name(), "ProviderTransportError");
        assert_eq!(err.status(), Some(503));
        assert!(err.to_string().contains("3 attempt(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_item_error_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let raw = open_with_retry(&RetryPolicy::default(), Provider::Gemini, || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(events(vec![Err(RelayError::internal("reset"))]))
                } else {
                    Ok(events(vec![Ok(1), Ok(2)]))
                }
            }
        })
        .await
        .unwrap();

        let items: Vec<u32> = raw.try_collect().await.unwrap();
        assert_eq!(items, vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_after_first_item_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let raw = open_with_retry(&RetryPolicy::default(), Provider::Anthropic, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(events(vec![
                    Ok(1),
                    Err(RelayError::internal("connection reset")),
                ]))
            }
        })
        .await
        .unwrap();

        let items: Vec<RelayResult<u32>> = raw.collect().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(items.len(), 2);
        let err = items[1].as_ref().unwrap_err();
        assert_eq!(err.name(), "ProviderStreamError");
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = tokio::time::Instant::now();

        let result = open_with_retry(&RetryPolicy::default(), Provider::OpenAI, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<RawStream<u32>, _>(RelayError::Provider {
                    name: "invalid_api_key".into(),
                    message: "Incorrect API key provided".into(),
                    status: Some(401),
                })
            }
        })
        .await;

        let err = result.err().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("1 attempt(s)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_stream_counts_as_failed_start() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let result =
            open_with_retry(&policy, Provider::Gemini, || async { Ok(events(vec![])) }).await;
        match result {
            Err(RelayError::ProviderTransport { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected transport error, got {:?}", other.map(|_| ())),
        }
    }
}
