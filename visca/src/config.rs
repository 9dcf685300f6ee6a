//! Dispatcher settings.
use std::time::Duration;

/// Timing and concurrency settings for a [Dispatcher][crate::Dispatcher].
///
/// The defaults suit a Sony-compatible camera on a 9600 baud serial link, or a
/// VISCA-over-IP bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DispatcherConfig {
    /// Number of commands which may be outstanding on a device at once.
    ///
    /// VISCA devices have two command buffers.
    pub max_sockets: usize,

    /// How long to wait for an Ack (or a direct answer) after sending.
    pub ack_timeout: Duration,

    /// How long to wait for a Completion after an Ack. Movements to a
    /// position can take several seconds.
    pub completion_timeout: Duration,

    /// Number of times a command is sent again after a timeout or a "command
    /// buffer full" error.
    pub retry_limit: u8,

    /// Delay before sending a command again after a "command buffer full"
    /// error.
    pub retry_delay: Duration,

    /// How often timeouts are checked.
    pub tick_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_sockets: 2,
            ack_timeout: Duration::from_millis(500),
            completion_timeout: Duration::from_secs(5),
            retry_limit: 2,
            retry_delay: Duration::from_millis(100),
            tick_interval: Duration::from_millis(20),
        }
    }
}

impl DispatcherConfig {
    pub fn with_max_sockets(mut self, max_sockets: usize) -> Self {
        self.max_sockets = max_sockets.max(1);
        self
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u8) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }
}
