use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::AdapterError;

#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    /// Total attempts. Zero is treated as one.
    pub max_attempts: usize,
    pub sleep: Duration,
}

impl RetryConfig {
    pub const fn new(max_attempts: usize, sleep: Duration) -> Self {
        Self {
            max_attempts,
            sleep,
        }
    }

    pub const fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::single_attempt()
    }
}

/// Runs `f` until it succeeds or the attempts run out. With a single
/// attempt the error is returned unchanged.
pub fn call_with_retry<F, T>(label: &str, config: &RetryConfig, mut f: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Result<T, AdapterError>,
{
    let attempts = config.attempts();
    let mut last_error: Option<AdapterError> = None;

    for attempt in 1..=attempts {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) if attempts == 1 => return Err(err),
            Err(err) => {
                warn!("[{label}] attempt {attempt}/{attempts} failed: {err}");
                if attempt < attempts {
                    thread::sleep(config.sleep);
                }
                last_error = Some(err);
            }
        }
    }

    let err = last_error.unwrap_or(AdapterError::EmptyResponse);
    Err(AdapterError::retry_exhausted(attempts, err))
}
