//! Client configuration.

use std::time::Duration;

use crate::bridge::codec::{DEFAULT_CAPACITY, LENGTH_PREFIX_LEN};

/// Environment override for the default per-call timeout, in milliseconds.
pub const CALL_TIMEOUT_ENV: &str = "HELPER_PIPE_CALL_TIMEOUT_MS";

/// Environment override for the shutdown timeout, in milliseconds.
pub const SHUTDOWN_TIMEOUT_ENV: &str = "HELPER_PIPE_SHUTDOWN_TIMEOUT_MS";

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Receive buffer size; bounds prefix + body of every frame.
    pub capacity: usize,
    /// Deadline applied by `Client::call`. `None` waits indefinitely.
    pub call_timeout: Option<Duration>,
    /// How long `close` waits for the helper to exit before killing it.
    /// Also bounds the `stop` exchange itself.
    pub shutdown_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            call_timeout: millis_from_env(CALL_TIMEOUT_ENV),
            shutdown_timeout: millis_from_env(SHUTDOWN_TIMEOUT_ENV)
                .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the receive capacity (prefix + body).
    ///
    /// Values with no room for a body behind the prefix are raised to the
    /// smallest usable capacity. Keep it at or below the platform's atomic
    /// pipe write size (`PIPE_BUF`, 4096 on Linux): above it a frame may be
    /// written short, leaving a partial frame on the pipe.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        let min = LENGTH_PREFIX_LEN + 1;
        if capacity < min {
            tracing::warn!(capacity, min, "Capacity leaves no room for a body, raising");
        }
        self.capacity = capacity.max(min);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn without_call_timeout(mut self) -> Self {
        self.call_timeout = None;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

fn millis_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}
