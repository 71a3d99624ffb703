//! Common types for the channel-switch environment abstraction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Link-layer identity of a station.
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Creates a new random NodeId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic NodeId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Opaque transport handle for one end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Radio channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Channel(pub u8);

impl Channel {
    /// Returns the index as a `usize` for table lookups.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// Set of channel indices a station may use, one bit per channel (0..16).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChannelMask(pub u16);

impl ChannelMask {
    /// Highest channel count a mask can describe.
    pub const MAX_CHANNELS: u8 = 16;

    /// Mask with every one of the first `count` channels set.
    pub fn first(count: u8) -> Self {
        let count = count.min(Self::MAX_CHANNELS);
        if count == Self::MAX_CHANNELS {
            Self(u16::MAX)
        } else {
            Self((1u16 << count) - 1)
        }
    }

    /// Builds a mask from explicit channels; channels >= 16 are ignored.
    pub fn from_channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        let bits = channels
            .into_iter()
            .filter(|c| c.0 < Self::MAX_CHANNELS)
            .fold(0u16, |acc, c| acc | (1 << c.0));
        Self(bits)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        channel.0 < Self::MAX_CHANNELS && self.0 & (1 << channel.0) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Channels in the mask, ascending.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        (0..Self::MAX_CHANNELS)
            .map(Channel)
            .filter(move |c| self.contains(*c))
    }

    pub fn intersect(&self, other: ChannelMask) -> ChannelMask {
        ChannelMask(self.0 & other.0)
    }
}

/// Interference statistics for one channel from a single sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelInterference {
    /// Mean interference power over the sweep (dB)
    pub average_db: f64,

    /// Peak interference power over the sweep (dB)
    pub worst_db: f64,

    /// Whether this station may move to the channel
    pub switchable: bool,
}

impl ChannelInterference {
    pub fn new(average_db: f64, worst_db: f64, switchable: bool) -> Self {
        Self {
            average_db,
            worst_db,
            switchable,
        }
    }
}

/// Result of a link-layer interference sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Received signal strength of the peer during the sweep (dBm)
    pub tx_rss_dbm: f64,

    /// One entry per channel index, `per_channel[i]` describes channel `i`
    pub per_channel: Vec<ChannelInterference>,

    /// Channel the radio was tuned to when the sweep finished
    pub current_channel: Channel,
}
