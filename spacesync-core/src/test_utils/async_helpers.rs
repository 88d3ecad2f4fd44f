//! Async test helpers

use std::fmt;
use std::future::Future;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Closed,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "timed out waiting for condition"),
            WaitError::Closed => write!(f, "channel closed while waiting"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Receive broadcast events until one matches, or time out.
pub async fn wait_for_event<T, F>(
    rx: &mut broadcast::Receiver<T>,
    duration: Duration,
    mut matches: F,
) -> Result<T, WaitError>
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(WaitError::Timeout);
        }
        match timeout(remaining, rx.recv()).await {
            Ok(Ok(event)) if matches(&event) => return Ok(event),
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => return Err(WaitError::Closed),
            Err(_) => return Err(WaitError::Timeout),
        }
    }
}

/// Poll an async predicate until it returns true, or time out.
pub async fn wait_until<F, Fut>(duration: Duration, mut condition: F) -> Result<(), WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if condition().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(WaitError::Timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
