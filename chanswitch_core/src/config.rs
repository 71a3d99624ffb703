//! Protocol configuration supplied at session creation.

use chanswitch_env::{Channel, ChannelMask};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be non-zero")]
    ZeroDuration(&'static str),

    #[error("Channel mask is empty")]
    EmptyMask,

    #[error("Initial channel {0} is not in the channel mask")]
    InitialChannelNotPermitted(Channel),

    #[error("Ack delay ({ack_delay:?}) must be shorter than the change-ack timeout ({timeout:?})")]
    AckDelayTooLong { ack_delay: Duration, timeout: Duration },
}

/// Timing and channel parameters for one session.
///
/// Both roles read the same structure; each ignores the fields that only
/// concern the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Minimum spacing between two scan triggers on one session (default: 5s)
    pub backoff_window: Duration,

    /// Responder: how long to wait for ChangeAck before switching anyway (default: 200ms)
    pub change_ack_timeout: Duration,

    /// Responder: how long to wait for VerifyAck before rolling back (default: 500ms)
    pub verify_ack_timeout: Duration,

    /// Initiator: delay between sending ChangeAck and retuning (default: 20ms)
    pub ack_delay: Duration,

    /// Initiator: trigger a scan as soon as the connection opens (default: true)
    pub initial_scan: bool,

    /// Channels this station may use (default: channels 1-11)
    pub channel_mask: ChannelMask,

    /// Channel both stations start on (default: 1)
    pub initial_channel: Channel,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            backoff_window: Duration::from_secs(5),
            change_ack_timeout: Duration::from_millis(200),
            verify_ack_timeout: Duration::from_millis(500),
            ack_delay: Duration::from_millis(20),
            initial_scan: true,
            channel_mask: ChannelMask::from_channels((1..=11).map(Channel)),
            initial_channel: Channel(1),
        }
    }
}

impl ProtocolConfig {
    /// Checks the values for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.change_ack_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("change_ack_timeout"));
        }
        if self.verify_ack_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("verify_ack_timeout"));
        }
        if self.ack_delay.is_zero() {
            return Err(ConfigError::ZeroDuration("ack_delay"));
        }
        if self.channel_mask.is_empty() {
            return Err(ConfigError::EmptyMask);
        }
        if !self.channel_mask.contains(self.initial_channel) {
            return Err(ConfigError::InitialChannelNotPermitted(self.initial_channel));
        }
        if self.ack_delay >= self.change_ack_timeout {
            return Err(ConfigError::AckDelayTooLong {
                ack_delay: self.ack_delay,
                timeout: self.change_ack_timeout,
            });
        }
        Ok(())
    }

    /// Upper bound on one failed switch attempt (change-ack + verify-ack wait).
    pub fn retry_period(&self) -> Duration {
        self.change_ack_timeout + self.verify_ack_timeout
    }
}
