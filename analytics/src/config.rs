use serde::Deserialize;
use shared::units::{ByteSize, HumanDuration};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("At least one analytics account is required")]
    NoAccounts,

    #[error("Account {index} has an empty code")]
    EmptyAccountCode { index: usize },

    #[error("Account {index} needs a publisher_id or a site_app_id")]
    UnscopedAccount { index: usize },

    #[error("Buffer threshold cannot be 0: {0}")]
    ZeroThreshold(&'static str),

    #[error("Buffer timeout {0:?} exceeds the maximum of {MAX_BUFFER_TIMEOUT:?}")]
    TimeoutTooLarge(Duration),

    #[error("Endpoint timeout cannot be 0")]
    ZeroTimeout,

    #[error("Queue capacity cannot be 0")]
    ZeroQueueCapacity,
}

/// Longest accepted `buffers.timeout`.
pub const MAX_BUFFER_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1024
}

/// Agma analytics configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AnalyticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub endpoint: EndpointConfig,
    pub buffers: BufferConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    /// Only track requests that carry a TCF consent string
    #[serde(default)]
    pub require_consent: bool,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.timeout.as_duration().is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        self.buffers.validate()?;
        if self.queue.capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }
        for (index, account) in self.accounts.iter().enumerate() {
            if account.code.is_empty() {
                return Err(ConfigError::EmptyAccountCode { index });
            }
            if account.publisher_id.is_empty() && account.site_app_id.is_empty() {
                return Err(ConfigError::UnscopedAccount { index });
            }
        }

        Ok(())
    }
}

/// Where batches are posted
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Invalid URLs are rejected during config deserialization.
    pub url: Url,
    /// Per-request timeout, e.g. `2s`
    pub timeout: HumanDuration,
    #[serde(default)]
    pub gzip: bool,
}

/// Flush thresholds. Whichever is reached first triggers a flush.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BufferConfig {
    pub event_count: usize,
    /// e.g. `100KB`
    pub buffer_size: ByteSize,
    /// Longest time an event may wait in the buffer, e.g. `15m`
    pub timeout: HumanDuration,
}

impl BufferConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_count == 0 {
            return Err(ConfigError::ZeroThreshold("event_count"));
        }
        if self.buffer_size.as_u64() == 0 {
            return Err(ConfigError::ZeroThreshold("buffer_size"));
        }
        if self.timeout.as_duration().is_zero() {
            return Err(ConfigError::ZeroThreshold("timeout"));
        }
        if self.timeout.as_duration() > MAX_BUFFER_TIMEOUT {
            return Err(ConfigError::TimeoutTooLarge(self.timeout.as_duration()));
        }
        Ok(())
    }

    pub fn flush_limits(&self) -> FlushLimits {
        FlushLimits {
            max_events: self.event_count,
            max_bytes: usize::try_from(self.buffer_size.as_u64()).unwrap_or(usize::MAX),
            max_dwell: self.timeout.as_duration(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushLimits {
    pub max_events: usize,
    pub max_bytes: usize,
    pub max_dwell: Duration,
}

/// What `log_event` does when the controller queue is full
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the event and count it.
    #[default]
    Drop,
    /// Wait for room in the queue.
    Block,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct QueueConfig {
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Maps a publisher, a site/app or both to an Agma account code
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AccountConfig {
    #[serde(default)]
    pub publisher_id: String,
    pub code: String,
    #[serde(default)]
    pub site_app_id: String,
}
