use std::fmt;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// What the broadcaster does when a watcher's inbound queue is full
///
/// The broadcaster never waits on a subscriber; this only decides how the
/// stalled subscriber is treated.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlowConsumerPolicy {
    /// Evict the watcher. Already queued events are still delivered, then the
    /// stream ends and `stop_reason()` reports `SlowConsumer` so the client
    /// re-lists and re-watches.
    #[default]
    Disconnect,

    /// Keep the watcher and drop the event for it only. The client sees a gap.
    Drop,
}

impl fmt::Display for SlowConsumerPolicy {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            SlowConsumerPolicy::Disconnect => write!(f, "disconnect"),
            SlowConsumerPolicy::Drop => write!(f, "drop"),
        }
    }
}

/// Configuration for the watch fan-out engine
///
/// # Configuration Example
///
/// ```toml
/// [watch]
/// startup_buffer_capacity = 64
/// startup_buffer_limit = 4096
/// inbound_queue_size = 100
/// result_buffer_size = 10
/// slow_consumer_policy = "disconnect"
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchSetConfig {
    /// Initial allocation of the startup buffer
    ///
    /// **Default**: 64
    #[serde(default = "default_startup_buffer_capacity")]
    pub startup_buffer_capacity: usize,

    /// Maximum number of events retained for startup replay
    ///
    /// Once exceeded the oldest events are evicted, and watches asking to
    /// resume from an evicted version fail with `ResourceVersionTooOld`.
    /// `0` keeps every event.
    ///
    /// **Default**: 4096
    #[serde(default = "default_startup_buffer_limit")]
    pub startup_buffer_limit: usize,

    /// Depth of each watcher's inbound queue
    ///
    /// Tolerates brief subscriber stalls before `slow_consumer_policy` kicks in.
    ///
    /// **Default**: 100
    #[serde(default = "default_inbound_queue_size")]
    pub inbound_queue_size: usize,

    /// Depth of each watcher's result channel
    ///
    /// **Default**: 10
    #[serde(default = "default_result_buffer_size")]
    pub result_buffer_size: usize,

    /// **Default**: disconnect
    #[serde(default)]
    pub slow_consumer_policy: SlowConsumerPolicy,
}

impl Default for WatchSetConfig {
    fn default() -> Self {
        Self {
            startup_buffer_capacity: default_startup_buffer_capacity(),
            startup_buffer_limit: default_startup_buffer_limit(),
            inbound_queue_size: default_inbound_queue_size(),
            result_buffer_size: default_result_buffer_size(),
            slow_consumer_policy: SlowConsumerPolicy::default(),
        }
    }
}

impl WatchSetConfig {
    /// Validates watch configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.inbound_queue_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.inbound_queue_size must be greater than 0".into(),
            )));
        }

        if self.result_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.result_buffer_size must be greater than 0".into(),
            )));
        }

        if self.startup_buffer_limit != 0 && self.startup_buffer_limit < self.startup_buffer_capacity {
            return Err(Error::Config(ConfigError::Message(format!(
                "watch.startup_buffer_limit ({}) must be 0 or at least startup_buffer_capacity ({})",
                self.startup_buffer_limit, self.startup_buffer_capacity
            ))));
        }

        if self.startup_buffer_limit == 0 {
            warn!("watch.startup_buffer_limit is 0: startup buffer grows without bound");
        }

        if self.inbound_queue_size > 100_000 {
            warn!(
                "watch.inbound_queue_size ({}) is very large. Every watcher allocates a queue of this depth",
                self.inbound_queue_size
            );
        }

        Ok(())
    }
}

const fn default_startup_buffer_capacity() -> usize {
    64
}

const fn default_startup_buffer_limit() -> usize {
    4096
}

const fn default_inbound_queue_size() -> usize {
    100
}

const fn default_result_buffer_size() -> usize {
    10
}
