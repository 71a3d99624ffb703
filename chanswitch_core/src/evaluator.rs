//! Channel evaluator.
//!
//! Picks the switch target from one interference sweep. Transmit power is
//! constant across the comparison, so the channel with the lowest average
//! interference is also the one with the highest SINR.

use chanswitch_env::{Channel, ChannelInterference};

/// Outcome of scoring one sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Best candidate; equals the current channel only if it is the sole switchable one
    pub channel: Channel,

    /// `tx_rss_dbm - average_db` of the chosen channel
    pub sinr_db: f64,

    /// Noisiest switchable channel seen (diagnostics)
    pub worst_channel: Channel,

    /// Average interference on `worst_channel`
    pub worst_average_db: f64,
}

impl Evaluation {
    /// True when acting on this evaluation would retune to a different channel.
    pub fn is_switch_from(&self, current: Channel) -> bool {
        self.channel != current
    }
}

/// Scores `per_channel` (indexed by channel) and returns the best target.
///
/// Channels are visited in cyclic order starting just after `current`, so
/// ties go to the first channel after the current one. The current channel
/// is only returned when nothing else is switchable. Returns `None` when no
/// channel is switchable at all.
pub fn evaluate(
    current: Channel,
    tx_rss_dbm: f64,
    per_channel: &[ChannelInterference],
) -> Option<Evaluation> {
    let n = per_channel.len();
    if n == 0 {
        return None;
    }

    let mut best: Option<(Channel, f64)> = None;
    let mut worst: Option<(Channel, f64)> = None;
    let mut current_switchable = false;

    for k in 1..=n {
        let idx = (current.index() + k) % n;
        let entry = &per_channel[idx];
        // Entries past the last addressable channel can never be tuned to
        let Ok(channel) = u8::try_from(idx).map(Channel) else {
            continue;
        };
        if !entry.switchable {
            continue;
        }

        if worst.map_or(true, |(_, db)| entry.average_db > db) {
            worst = Some((channel, entry.average_db));
        }

        if channel == current {
            current_switchable = true;
            continue;
        }

        if best.map_or(true, |(_, db)| entry.average_db < db) {
            best = Some((channel, entry.average_db));
        }
    }

    let (channel, average_db) = match best {
        Some(found) => found,
        None if current_switchable => (current, per_channel[current.index()].average_db),
        None => return None,
    };
    let (worst_channel, worst_average_db) = worst.unwrap_or((channel, average_db));

    Some(Evaluation {
        channel,
        sinr_db: tx_rss_dbm - average_db,
        worst_channel,
        worst_average_db,
    })
}
